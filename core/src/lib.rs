pub mod bundle;
pub mod error;
pub mod location;

pub use bundle::{ArchiveCodec, BundleArtifact};
pub use error::{Error, Result};
pub use location::{Credentials, Protocol, StashLocation, TransferResult};
