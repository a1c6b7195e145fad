//! HydraVPN Protocol Implementation
//!
//! The wire protocol for a point-to-multipoint layer-3 VPN: typed packet
//! framing, the handshake message bodies, the X25519/HKDF/XChaCha20-Poly1305
//! session cryptography, the server's tunnel address pool, and the session
//! state machines shared by both peers.

pub mod crypto;
mod error;
mod handshake;
mod packet;
mod pool;
mod session;

pub use crypto::{
    derive_session_keys, generate_salt, KeyPair, Opener, Role, Sealer, SessionKeys, KEY_LEN,
    NONCE_LEN, SALT_LEN, TAG_LEN,
};
pub use error::{Error, Result};
pub use handshake::{
    HandshakeInit, HandshakeResponse, HANDSHAKE_INIT_LEN, HANDSHAKE_RESPONSE_LEN,
};
pub use packet::{Packet, PacketType, HEADER_LEN, MAGIC, MAX_PAYLOAD, PROTOCOL_VERSION};
pub use pool::Ipv4Pool;
pub use session::{ClientState, Session, SessionId, SessionState};

use std::time::Duration;

/// Deadline for a handshake to complete
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between client keepalive frames
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Default tunnel MTU, leaving room for the outer transport overhead
pub const DEFAULT_MTU: u16 = 1400;
