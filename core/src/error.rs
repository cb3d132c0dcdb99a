//! Error types for the IRC daemon

use thiserror::Error;

/// Main error type for the IRC daemon
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message parsing error: {0}")]
    MessageParse(String),

    /// Write failure on a server link. The link must be torn down and a fresh
    /// burst started on reconnect.
    #[error("Link error: {0}")]
    Link(String),

    #[error("Link to {0} is closed")]
    LinkClosed(String),

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Duplicate UID allocated: {0}")]
    DuplicateUid(String),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Generic(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(s)
    }
}
