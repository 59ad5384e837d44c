use crate::transport::Transport;
use async_trait::async_trait;
use stashpack_core::{Error, Protocol, Result, TransferResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Transport over the local filesystem. Operations are plain copies;
/// only permission and path errors apply, never connectivity failures.
pub struct LocalTransport {
    base_path: PathBuf,
}

impl LocalTransport {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn full_path(&self, remote_name: &str) -> PathBuf {
        self.base_path.join(remote_name)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn put(&self, local_path: &Path, remote_name: &str) -> Result<TransferResult> {
        let target = self.full_path(remote_name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local_path, &target).await?;
        debug!(target = %target.display(), "Stored local copy");
        Ok(TransferResult {
            remote_locator: target.display().to_string(),
        })
    }

    async fn get(&self, remote_name: &str, local_path: &Path) -> Result<TransferResult> {
        let source = self.full_path(remote_name);
        if !fs::try_exists(&source).await? {
            return Err(Error::NotFound {
                remote: source.display().to_string(),
            });
        }
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&source, local_path).await?;
        Ok(TransferResult {
            remote_locator: source.display().to_string(),
        })
    }

    async fn exists(&self, remote_name: &str) -> Result<bool> {
        Ok(fs::try_exists(self.full_path(remote_name)).await?)
    }

    async fn remove(&self, remote_name: &str) -> Result<bool> {
        let target = self.full_path(remote_name);
        match fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn protocol(&self) -> Protocol {
        Protocol::Local
    }
}
