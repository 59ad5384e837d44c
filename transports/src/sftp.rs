use crate::transport::Transport;
use async_trait::async_trait;
use ssh2::{ErrorCode, Session, Sftp};
use stashpack_core::{Credentials, Error, Protocol, Result, TransferResult};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{debug, warn};

// libssh2 SFTP status for a missing remote path.
const SFTP_NO_SUCH_FILE: i32 = 2;

/// Transport speaking SFTP through libssh2. A session is opened per call
/// and torn down afterwards; authentication uses a password or a private
/// key file from the supplied credentials.
pub struct SftpTransport {
    host: String,
    port: u16,
    base_path: String,
    credentials: Credentials,
}

struct SftpSession {
    // Held so the underlying SSH transport outlives the SFTP channel.
    _session: Session,
    sftp: Sftp,
}

impl SftpTransport {
    pub fn new(
        host: impl Into<String>,
        port: Option<u16>,
        base_path: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            host: host.into(),
            port: port.unwrap_or(22),
            base_path: base_path.into(),
            credentials,
        }
    }

    fn remote_path(&self, remote_name: &str) -> String {
        format!("{}/{}", self.base_path.trim_end_matches('/'), remote_name)
    }

    fn connect(host: &str, port: u16, credentials: &Credentials) -> Result<SftpSession> {
        let tcp = TcpStream::connect((host, port))
            .map_err(|e| Error::Transport(format!("sftp connect to {}:{}: {}", host, port, e)))?;
        let mut session =
            Session::new().map_err(|e| Error::Transport(format!("sftp session: {}", e)))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| Error::Transport(format!("sftp handshake with {}: {}", host, e)))?;

        let username = credentials
            .username
            .as_deref()
            .ok_or_else(|| Error::Auth("sftp requires a username".to_string()))?;
        if let Some(key_file) = &credentials.key_file {
            session
                .userauth_pubkey_file(username, None, key_file, None)
                .map_err(|e| Error::Auth(format!("sftp key auth for {}: {}", username, e)))?;
        } else if let Some(password) = &credentials.password {
            session
                .userauth_password(username, password)
                .map_err(|e| Error::Auth(format!("sftp password auth for {}: {}", username, e)))?;
        } else {
            return Err(Error::Auth("sftp requires a password or key file".to_string()));
        }

        let sftp = session
            .sftp()
            .map_err(|e| Error::Transport(format!("sftp channel: {}", e)))?;
        Ok(SftpSession {
            _session: session,
            sftp,
        })
    }

    /// Creates each missing ancestor of `remote_path`. Existing
    /// directories surface as errors from the server and are ignored.
    fn make_remote_dirs(sftp: &Sftp, remote_path: &str) -> Result<()> {
        let path = Path::new(remote_path);
        let mut ancestors: Vec<&Path> = path.ancestors().skip(1).collect();
        ancestors.reverse();
        for dir in ancestors {
            if dir.as_os_str().is_empty() || dir == Path::new("/") {
                continue;
            }
            if sftp.stat(dir).is_err() {
                if let Err(e) = sftp.mkdir(dir, 0o755) {
                    debug!(dir = %dir.display(), error = %e, "sftp mkdir skipped");
                }
            }
        }
        Ok(())
    }
}

fn classify(err: ssh2::Error, remote: &str) -> Error {
    match err.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => Error::NotFound {
            remote: remote.to_string(),
        },
        _ => Error::Transport(format!("sftp {}: {}", remote, err)),
    }
}

#[async_trait]
impl Transport for SftpTransport {
    async fn put(&self, local_path: &Path, remote_name: &str) -> Result<TransferResult> {
        let host = self.host.clone();
        let port = self.port;
        let credentials = self.credentials.clone();
        let remote_path = self.remote_path(remote_name);
        let local: PathBuf = local_path.to_path_buf();

        task::spawn_blocking(move || {
            let conn = Self::connect(&host, port, &credentials)?;
            Self::make_remote_dirs(&conn.sftp, &remote_path)?;
            let data = std::fs::read(&local)?;
            let mut remote_file = conn
                .sftp
                .create(Path::new(&remote_path))
                .map_err(|e| classify(e, &remote_path))?;
            remote_file
                .write_all(&data)
                .map_err(|e| Error::Transport(format!("sftp write {}: {}", remote_path, e)))?;
            debug!(remote = %remote_path, bytes = data.len(), "sftp upload complete");
            Ok(TransferResult {
                remote_locator: remote_path,
            })
        })
        .await
        .map_err(|e| Error::Other(format!("sftp task failed: {}", e)))?
    }

    async fn get(&self, remote_name: &str, local_path: &Path) -> Result<TransferResult> {
        let host = self.host.clone();
        let port = self.port;
        let credentials = self.credentials.clone();
        let remote_path = self.remote_path(remote_name);
        let local: PathBuf = local_path.to_path_buf();

        task::spawn_blocking(move || {
            let conn = Self::connect(&host, port, &credentials)?;
            let mut remote_file = conn
                .sftp
                .open(Path::new(&remote_path))
                .map_err(|e| classify(e, &remote_path))?;
            let mut data = Vec::new();
            remote_file
                .read_to_end(&mut data)
                .map_err(|e| Error::Transport(format!("sftp read {}: {}", remote_path, e)))?;
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&local, &data)?;
            Ok(TransferResult {
                remote_locator: remote_path,
            })
        })
        .await
        .map_err(|e| Error::Other(format!("sftp task failed: {}", e)))?
    }

    async fn exists(&self, remote_name: &str) -> Result<bool> {
        let host = self.host.clone();
        let port = self.port;
        let credentials = self.credentials.clone();
        let remote_path = self.remote_path(remote_name);

        task::spawn_blocking(move || {
            let conn = Self::connect(&host, port, &credentials)?;
            match conn.sftp.stat(Path::new(&remote_path)) {
                Ok(_) => Ok(true),
                Err(e) => match classify(e, &remote_path) {
                    Error::NotFound { .. } => Ok(false),
                    other => Err(other),
                },
            }
        })
        .await
        .map_err(|e| Error::Other(format!("sftp task failed: {}", e)))?
    }

    async fn remove(&self, remote_name: &str) -> Result<bool> {
        let host = self.host.clone();
        let port = self.port;
        let credentials = self.credentials.clone();
        let remote_path = self.remote_path(remote_name);

        task::spawn_blocking(move || {
            let conn = Self::connect(&host, port, &credentials)?;
            match conn.sftp.unlink(Path::new(&remote_path)) {
                Ok(()) => Ok(true),
                Err(e) => match classify(e, &remote_path) {
                    Error::NotFound { .. } => Ok(false),
                    other => {
                        warn!(remote = %remote_path, error = %other, "sftp remove failed");
                        Err(other)
                    }
                },
            }
        })
        .await
        .map_err(|e| Error::Other(format!("sftp task failed: {}", e)))?
    }

    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }
}
