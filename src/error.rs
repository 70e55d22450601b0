use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("iothub: file does not exist: {}", .0.display())]
    NotFound(PathBuf),
    #[error("iothub: failed to read: {0}")]
    Io(#[from] std::io::Error),
    #[error("iothub: failed to decode PEM certificate: {0}")]
    DecodeError(String),
    #[error("iothub: failed to parse certificate: {0}")]
    ParseError(String),
    #[error("iothub: {0}")]
    ConfigError(String),
    #[error("iothub: TLS setup failed: {0}")]
    TlsError(#[from] openssl::error::ErrorStack),
}

impl Error {
    /// Maps a read failure on `path`, turning a missing file into `NotFound`.
    pub(crate) fn from_read(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.to_path_buf())
        } else {
            Error::Io(err)
        }
    }
}
