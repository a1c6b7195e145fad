//! Error types for the transport layer

use std::io;
use thiserror::Error;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on a transport
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("dial failed: {0}")]
    Dial(String),

    #[error("listen failed: {0}")]
    Listen(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("invalid frame length {0} (max {max})", max = crate::MAX_MESSAGE_LEN)]
    FrameTooLarge(u32),

    #[error("connection closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}
