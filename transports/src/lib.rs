pub mod factory;
pub mod ftp;
pub mod git;
pub mod https;
pub mod local;
pub mod retry;
pub mod sftp;
pub mod transport;

pub use factory::{DefaultTransportFactory, TransportFactory};
pub use ftp::FtpTransport;
pub use git::GitTransport;
pub use https::HttpsTransport;
pub use local::LocalTransport;
pub use retry::RetryPolicy;
pub use sftp::SftpTransport;
pub use transport::Transport;
