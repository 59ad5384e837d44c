pub mod coordinator;

pub use coordinator::{BackupReport, RestoreOutcome, StashConfig, StashCoordinator};
