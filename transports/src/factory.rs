use crate::{FtpTransport, GitTransport, HttpsTransport, LocalTransport, SftpTransport, Transport};
use stashpack_core::{Error, Protocol, Result, StashLocation};
use std::path::PathBuf;

/// Builds the transport variant for a location. The variant is chosen
/// once per location, at open time, never per call. The trait seam also
/// lets tests substitute scripted transports.
pub trait TransportFactory: Send + Sync {
    fn open(&self, location: &StashLocation) -> Result<Box<dyn Transport>>;
}

/// Factory dispatching on the location's protocol.
///
/// Git locations receive a working copy under `git_clone_root`, one
/// directory per remote prefix. Reusing the same directory across calls
/// is what caches the clone for the life of the process; directories for
/// distinct prefixes are never shared. Access to one prefix's clone is
/// not internally locked, so concurrent use of a single prefix must be
/// serialized by the caller.
pub struct DefaultTransportFactory {
    git_clone_root: PathBuf,
}

impl DefaultTransportFactory {
    pub fn new(git_clone_root: impl Into<PathBuf>) -> Self {
        Self {
            git_clone_root: git_clone_root.into(),
        }
    }

    fn git_clone_dir(&self, remote_prefix: &str) -> PathBuf {
        let key: String = remote_prefix
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        self.git_clone_root.join(key)
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn open(&self, location: &StashLocation) -> Result<Box<dyn Transport>> {
        let host = || {
            location.host.clone().ok_or_else(|| {
                Error::UnsupportedProtocol(format!(
                    "{} location requires a host",
                    location.protocol
                ))
            })
        };
        Ok(match location.protocol {
            Protocol::Local => Box::new(LocalTransport::new(&location.base_path)),
            Protocol::Sftp => Box::new(SftpTransport::new(
                host()?,
                location.port,
                &location.base_path,
                location.credentials.clone(),
            )),
            Protocol::Ftp => Box::new(FtpTransport::new(
                host()?,
                location.port,
                &location.base_path,
                location.credentials.clone(),
            )),
            Protocol::Https => Box::new(HttpsTransport::new(
                &location.base_path,
                location.credentials.clone(),
            )),
            Protocol::Git => Box::new(GitTransport::new(
                self.git_clone_dir(&location.remote_prefix),
                &location.base_path,
                location.branch.clone(),
                location.credentials.token.clone(),
            )),
        })
    }
}
