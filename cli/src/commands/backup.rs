use anyhow::{Result, anyhow};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct BackupCommand {
    #[arg(help = "Directory to bundle and stash")]
    source: String,

    #[arg(help = "Bundle name (remote object becomes <prefix>/<name>.tar.gz)")]
    name: String,
}

impl BackupCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let source = PathBuf::from(&self.source);
        if !source.is_dir() {
            return Err(anyhow!("Source is not a directory: {}", source.display()));
        }

        let coordinator = super::open_coordinator(cli)?;

        info!(source = %source.display(), name = %self.name, "Starting backup");
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        pb.set_message(format!("Stashing {}...", self.name));
        pb.enable_steady_tick(std::time::Duration::from_millis(120));

        let result = coordinator.backup(&source, &self.name).await;
        match result {
            Ok(report) => {
                pb.finish_with_message("Backup complete");
                println!("Stored {} at {}", self.name, report.remote_locator);
                println!("Location: {}", report.location);
                Ok(())
            }
            Err(e) => {
                pb.finish_with_message("Backup failed");
                Err(e.into())
            }
        }
    }
}
