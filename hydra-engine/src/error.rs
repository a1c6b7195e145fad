//! Error types for the engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the server or client core
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Protocol(#[from] hydra_protocol::Error),

    #[error(transparent)]
    Transport(#[from] hydra_transport::Error),

    #[error(transparent)]
    Tun(#[from] hydra_tun::Error),
}

impl Error {
    /// Whether the client should retry after this error
    ///
    /// Transport-level failures and handshake timeouts are transient;
    /// configuration and protocol errors are not.
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Handshake(_)
                | Error::HandshakeTimeout
                | Error::Transport(_)
        )
    }
}
