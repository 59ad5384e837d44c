mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{backup::BackupCommand, restore::RestoreCommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "stashpack",
    about = "Bundle and stash directory trees to remote storage",
    long_about = "Stashpack packages a directory tree into a tar.gz bundle and moves it \
                  to and from local, sftp, ftp, https, or git-backed stash storage with \
                  bounded retry"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "STASHPACK_CONFIG", help = "Path to the stash config file")]
    config: String,

    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, help = "Enable quiet mode")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Bundle a directory and store it")]
    Backup(BackupCommand),

    #[command(about = "Fetch a stored bundle and unpack it")]
    Restore(RestoreCommand),

    #[command(about = "Check whether a stored bundle exists")]
    Exists {
        #[arg(help = "Bundle name")]
        name: String,
    },

    #[command(about = "Delete a stored bundle")]
    Remove {
        #[arg(help = "Bundle name")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Backup(ref cmd) => cmd.run(&cli).await,
        Commands::Restore(ref cmd) => cmd.run(&cli).await,
        Commands::Exists { ref name } => {
            let coordinator = commands::open_coordinator(&cli)?;
            if coordinator.exists(name).await? {
                println!("{} is stashed", name);
            } else {
                println!("{} is not stashed", name);
            }
            Ok(())
        }
        Commands::Remove { ref name } => {
            let coordinator = commands::open_coordinator(&cli)?;
            if coordinator.remove(name).await? {
                println!("Removed {}", name);
            } else {
                println!("{} was not stashed", name);
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!("stashpack={}", level)))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default subscriber failed");
}
