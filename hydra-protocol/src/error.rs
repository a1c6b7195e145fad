//! Error types for the HydraVPN protocol

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during protocol operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("invalid magic bytes {0:02x?}")]
    BadMagic([u8; 2]),

    #[error("unsupported protocol version {0}")]
    BadVersion(u8),

    #[error("payload length mismatch: header declares {declared}, packet carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("handshake body too short: expected {expected} bytes, got {actual}")]
    BodyTooShort { expected: usize, actual: usize },

    #[error("low-order peer public key produced an all-zero shared secret")]
    LowOrderPoint,

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("address pool exhausted")]
    PoolExhausted,

    #[error("address pool error: {0}")]
    Pool(String),

    #[error("invalid session state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}
