use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Transfer protocol backing a stash location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Local,
    Sftp,
    Ftp,
    Https,
    Git,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Local => "local",
            Protocol::Sftp => "sftp",
            Protocol::Ftp => "ftp",
            Protocol::Https => "https",
            Protocol::Git => "git",
        };
        write!(f, "{}", name)
    }
}

/// Opaque access bundle for a remote store. Secrets are redacted from
/// debug output so they can never leak through logging.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub token: Option<String>,
}

impl Credentials {
    pub fn with_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    pub fn with_key_file(username: impl Into<String>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            username: Some(username.into()),
            key_file: Some(key_file.into()),
            ..Default::default()
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Default::default()
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_file", &self.key_file)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Where a stash lives: protocol, endpoint, base path, and the namespace
/// prefix that isolates this dataset from others under the same base.
///
/// Immutable once constructed; the coordinator owns it for the duration of
/// one backup or restore call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StashLocation {
    pub protocol: Protocol,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Filesystem path for local, remote directory for sftp/ftp, full base
    /// URL for https, clone URL for git.
    pub base_path: String,
    /// Branch for git locations. `None` means the remote default.
    pub branch: Option<String>,
    /// Namespace segment under `base_path`. Two different prefixes never
    /// read or write each other's objects.
    pub remote_prefix: String,
    #[serde(default)]
    pub credentials: Credentials,
}

impl StashLocation {
    pub fn local(base_path: impl Into<String>, remote_prefix: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Local,
            host: None,
            port: None,
            base_path: base_path.into(),
            branch: None,
            remote_prefix: remote_prefix.into(),
            credentials: Credentials::default(),
        }
    }

    /// Parses a URL-style location string.
    ///
    /// Supported forms:
    /// - `/abs/path` or `local:/abs/path`
    /// - `sftp://host[:port]/base/path`
    /// - `ftp://host[:port]/base/path`
    /// - `https://host/base`
    /// - `git+https://host/owner/repo[#branch]`
    pub fn from_url(
        url: &str,
        remote_prefix: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Self> {
        let remote_prefix = remote_prefix.into();
        if let Some(rest) = url.strip_prefix("git+") {
            let (remote, branch) = match rest.split_once('#') {
                Some((remote, branch)) => (remote.to_string(), Some(branch.to_string())),
                None => (rest.to_string(), None),
            };
            return Ok(Self {
                protocol: Protocol::Git,
                host: None,
                port: None,
                base_path: remote,
                branch,
                remote_prefix,
                credentials,
            });
        }
        if url.starts_with("https://") || url.starts_with("http://") {
            return Ok(Self {
                protocol: Protocol::Https,
                host: None,
                port: None,
                base_path: url.trim_end_matches('/').to_string(),
                branch: None,
                remote_prefix,
                credentials,
            });
        }
        for (scheme, protocol) in [("sftp://", Protocol::Sftp), ("ftp://", Protocol::Ftp)] {
            if let Some(rest) = url.strip_prefix(scheme) {
                let (authority, path) = match rest.find('/') {
                    Some(idx) => (&rest[..idx], &rest[idx..]),
                    None => (rest, "/"),
                };
                let (host, port) = match authority.split_once(':') {
                    Some((host, port)) => {
                        let port = port.parse::<u16>().map_err(|_| {
                            Error::UnsupportedProtocol(format!("bad port in {}", url))
                        })?;
                        (host.to_string(), Some(port))
                    }
                    None => (authority.to_string(), None),
                };
                return Ok(Self {
                    protocol,
                    host: Some(host),
                    port,
                    base_path: path.to_string(),
                    branch: None,
                    remote_prefix,
                    credentials,
                });
            }
        }
        if let Some(path) = url.strip_prefix("local:") {
            return Ok(Self::local(path, remote_prefix).with_credentials(credentials));
        }
        if url.starts_with('/') || url.starts_with("./") {
            return Ok(Self::local(url, remote_prefix).with_credentials(credentials));
        }
        Err(Error::UnsupportedProtocol(url.to_string()))
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Short human-readable label used in logs and outcome reports.
    pub fn describe(&self) -> String {
        match &self.host {
            Some(host) => format!("{}://{}{}", self.protocol, host, self.base_path),
            None => format!("{}:{}", self.protocol, self.base_path),
        }
    }
}

/// Outcome of a single successful transport operation.
#[derive(Debug, Clone)]
pub struct TransferResult {
    /// Fully resolved remote locator for the transferred object.
    pub remote_locator: String,
}
