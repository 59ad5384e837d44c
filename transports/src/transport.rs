use async_trait::async_trait;
use stashpack_core::{Protocol, Result, TransferResult};
use std::path::Path;

/// Uniform capability set for moving a named blob to and from a remote
/// store. One variant exists per protocol and is selected once when the
/// owning [`StashLocation`](stashpack_core::StashLocation) is opened, not
/// per call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Uploads a local file under `remote_name`, creating any missing
    /// remote directory structure first.
    async fn put(&self, local_path: &Path, remote_name: &str) -> Result<TransferResult>;

    /// Downloads `remote_name` into `local_path`, creating local parent
    /// directories first. An absent object fails with `NotFound`.
    async fn get(&self, remote_name: &str, local_path: &Path) -> Result<TransferResult>;

    /// Existence probe. "Not found" is a normal `false` result; only a
    /// connectivity failure raises `Transport`.
    async fn exists(&self, remote_name: &str) -> Result<bool>;

    /// Best-effort delete. Returns `false` rather than failing when the
    /// object is already absent.
    async fn remove(&self, remote_name: &str) -> Result<bool>;

    fn protocol(&self) -> Protocol;
}
