use crate::transport::Transport;
use async_trait::async_trait;
use stashpack_core::{Credentials, Error, Protocol, Result, TransferResult};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Status};
use tokio::task;
use tracing::debug;

/// Transport speaking plain FTP. Sessions are opened per call, mirroring
/// the SFTP variant; protocol reply codes are translated into the shared
/// error taxonomy (550 is a normal "not found", 530 an auth failure).
pub struct FtpTransport {
    host: String,
    port: u16,
    base_path: String,
    credentials: Credentials,
}

impl FtpTransport {
    pub fn new(
        host: impl Into<String>,
        port: Option<u16>,
        base_path: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            host: host.into(),
            port: port.unwrap_or(21),
            base_path: base_path.into(),
            credentials,
        }
    }

    fn remote_path(&self, remote_name: &str) -> String {
        format!("{}/{}", self.base_path.trim_end_matches('/'), remote_name)
    }

    fn connect(host: &str, port: u16, credentials: &Credentials) -> Result<FtpStream> {
        let mut ftp = FtpStream::connect(format!("{}:{}", host, port))
            .map_err(|e| Error::Transport(format!("ftp connect to {}:{}: {}", host, port, e)))?;
        let username = credentials.username.as_deref().unwrap_or("anonymous");
        let password = credentials.password.as_deref().unwrap_or("");
        ftp.login(username, password)
            .map_err(|e| Error::Auth(format!("ftp login for {}: {}", username, e)))?;
        ftp.transfer_type(FileType::Binary)
            .map_err(|e| Error::Transport(format!("ftp transfer type: {}", e)))?;
        Ok(ftp)
    }

    fn make_remote_dirs(ftp: &mut FtpStream, remote_path: &str) {
        let path = Path::new(remote_path);
        let mut ancestors: Vec<&Path> = path.ancestors().skip(1).collect();
        ancestors.reverse();
        for dir in ancestors {
            if dir.as_os_str().is_empty() || dir == Path::new("/") {
                continue;
            }
            // Already-existing directories answer with an error reply.
            if let Err(e) = ftp.mkdir(&dir.to_string_lossy()) {
                debug!(dir = %dir.display(), error = %e, "ftp mkdir skipped");
            }
        }
    }
}

fn classify(err: FtpError, remote: &str) -> Error {
    match &err {
        FtpError::UnexpectedResponse(response) => match response.status {
            Status::FileUnavailable => Error::NotFound {
                remote: remote.to_string(),
            },
            Status::NotLoggedIn => Error::Auth(format!("ftp {}: {}", remote, err)),
            _ => Error::Transport(format!("ftp {}: {}", remote, err)),
        },
        _ => Error::Transport(format!("ftp {}: {}", remote, err)),
    }
}

#[async_trait]
impl Transport for FtpTransport {
    async fn put(&self, local_path: &Path, remote_name: &str) -> Result<TransferResult> {
        let host = self.host.clone();
        let port = self.port;
        let credentials = self.credentials.clone();
        let remote_path = self.remote_path(remote_name);
        let local: PathBuf = local_path.to_path_buf();

        task::spawn_blocking(move || {
            let mut ftp = Self::connect(&host, port, &credentials)?;
            Self::make_remote_dirs(&mut ftp, &remote_path);
            let data = std::fs::read(&local)?;
            let mut reader = Cursor::new(data);
            ftp.put_file(&remote_path, &mut reader)
                .map_err(|e| classify(e, &remote_path))?;
            let _ = ftp.quit();
            debug!(remote = %remote_path, "ftp upload complete");
            Ok(TransferResult {
                remote_locator: remote_path,
            })
        })
        .await
        .map_err(|e| Error::Other(format!("ftp task failed: {}", e)))?
    }

    async fn get(&self, remote_name: &str, local_path: &Path) -> Result<TransferResult> {
        let host = self.host.clone();
        let port = self.port;
        let credentials = self.credentials.clone();
        let remote_path = self.remote_path(remote_name);
        let local: PathBuf = local_path.to_path_buf();

        task::spawn_blocking(move || {
            let mut ftp = Self::connect(&host, port, &credentials)?;
            let buffer = ftp
                .retr_as_buffer(&remote_path)
                .map_err(|e| classify(e, &remote_path))?;
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&local, buffer.into_inner())?;
            let _ = ftp.quit();
            Ok(TransferResult {
                remote_locator: remote_path,
            })
        })
        .await
        .map_err(|e| Error::Other(format!("ftp task failed: {}", e)))?
    }

    async fn exists(&self, remote_name: &str) -> Result<bool> {
        let host = self.host.clone();
        let port = self.port;
        let credentials = self.credentials.clone();
        let remote_path = self.remote_path(remote_name);

        task::spawn_blocking(move || {
            let mut ftp = Self::connect(&host, port, &credentials)?;
            let outcome = match ftp.size(&remote_path) {
                Ok(_) => Ok(true),
                Err(e) => match classify(e, &remote_path) {
                    Error::NotFound { .. } => Ok(false),
                    other => Err(other),
                },
            };
            let _ = ftp.quit();
            outcome
        })
        .await
        .map_err(|e| Error::Other(format!("ftp task failed: {}", e)))?
    }

    async fn remove(&self, remote_name: &str) -> Result<bool> {
        let host = self.host.clone();
        let port = self.port;
        let credentials = self.credentials.clone();
        let remote_path = self.remote_path(remote_name);

        task::spawn_blocking(move || {
            let mut ftp = Self::connect(&host, port, &credentials)?;
            let outcome = match ftp.rm(&remote_path) {
                Ok(()) => Ok(true),
                Err(e) => match classify(e, &remote_path) {
                    Error::NotFound { .. } => Ok(false),
                    other => Err(other),
                },
            };
            let _ = ftp.quit();
            outcome
        })
        .await
        .map_err(|e| Error::Other(format!("ftp task failed: {}", e)))?
    }

    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }
}
