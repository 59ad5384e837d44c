use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source directory not found: {path}")]
    SourceNotFound { path: String },

    #[error("Source directory is empty: {path}")]
    EmptySource { path: String },

    #[error("Corrupt archive {path}: {reason}")]
    CorruptArchive { path: String, reason: String },

    #[error("Remote object not found: {remote}")]
    NotFound { remote: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Remote history has diverged for {remote}; manual resolution required")]
    DivergedHistory { remote: String },

    #[error("Transfer failed after {attempts} attempts: {source}")]
    TransferExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transient transport faults are the only errors worth retrying.
    /// `NotFound` is a valid negative result and everything else is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
