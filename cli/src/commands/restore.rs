use anyhow::Result;
use clap::Args;
use stashpack_stash::RestoreOutcome;
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct RestoreCommand {
    #[arg(help = "Bundle name to fetch")]
    name: String,

    #[arg(help = "Directory to unpack into (existing files are overwritten)")]
    target: String,
}

impl RestoreCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let coordinator = super::open_coordinator(cli)?;
        let target = PathBuf::from(&self.target);

        info!(name = %self.name, target = %target.display(), "Starting restore");
        match coordinator.restore(&self.name, &target).await? {
            RestoreOutcome::Restored {
                location,
                remote_locator,
            } => {
                println!("Restored {} from {}", self.name, remote_locator);
                println!("Location: {}", location);
            }
            RestoreOutcome::NothingToRestore => {
                println!("No stashed bundle named {} was found", self.name);
            }
        }
        Ok(())
    }
}
