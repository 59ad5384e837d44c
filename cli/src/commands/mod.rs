pub mod backup;
pub mod restore;

use crate::config::ConfigFile;
use anyhow::Result;
use stashpack_stash::StashCoordinator;
use std::path::Path;

pub fn open_coordinator(cli: &crate::Cli) -> Result<StashCoordinator> {
    let config = ConfigFile::load(Path::new(&cli.config))?;
    Ok(StashCoordinator::new(config.into_stash_config()?))
}
