//! Interchangeable message transports for HydraVPN
//!
//! A transport carries framed packets between client and server as
//! reliable, ordered, message-oriented bytes: every [`Connection::write`]
//! is delivered to exactly one [`Connection::read`] on the peer with the
//! same length, or both sides observe an error. Three wire variants
//! implement the contract — QUIC, WebSocket binary frames, and a
//! length-prefixed XOR-obfuscated TLS stream — plus an in-memory variant
//! for tests. A client and server must run the same variant.

mod error;
pub mod memory;
pub mod obfs;
pub mod quic;
mod tls;
pub mod websocket;

pub use error::{Error, Result};
pub use memory::MemoryTransport;
pub use obfs::ObfuscatedTransport;
pub use quic::QuicTransport;
pub use websocket::WebSocketTransport;

use std::net::SocketAddr;
use std::str::FromStr;

use async_trait::async_trait;

/// Largest message a transport will carry
pub const MAX_MESSAGE_LEN: usize = 65535;

/// A transport factory: dials out or listens for peers
#[async_trait]
pub trait Transport: Send + Sync {
    /// The transport's wire name
    fn name(&self) -> &'static str;

    /// Connect to a remote listener
    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>>;

    /// Start listening for incoming connections
    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>>;
}

/// An established bidirectional message stream
///
/// `read` and `write` take `&self` and lock independent halves internally,
/// so one connection can be shared between a reader task and writer tasks.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Receive the next whole message
    async fn read(&self) -> Result<Vec<u8>>;

    /// Send one message
    async fn write(&self, msg: &[u8]) -> Result<()>;

    /// Close the connection (best effort, idempotent)
    async fn close(&self);

    /// Local socket address, when the variant has one
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Remote socket address, when the variant has one
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// A transport listener
#[async_trait]
pub trait Listener: Send + Sync {
    /// Accept the next incoming connection
    async fn accept(&self) -> Result<Box<dyn Connection>>;

    /// Stop accepting (best effort)
    async fn close(&self);

    /// Bound address, when the variant has one
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Which wire variant to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    Quic,
    #[default]
    WebSocket,
    Obfuscated,
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quic" => Ok(TransportKind::Quic),
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "obfuscated" | "obfs" => Ok(TransportKind::Obfuscated),
            other => Err(Error::Transport(format!("unknown transport: {}", other))),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Quic => write!(f, "quic"),
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::Obfuscated => write!(f, "obfuscated"),
        }
    }
}

/// Construct the transport for a configured kind
pub fn build_transport(kind: TransportKind) -> Box<dyn Transport> {
    match kind {
        TransportKind::Quic => Box::new(QuicTransport::new()),
        TransportKind::WebSocket => Box::new(WebSocketTransport::new()),
        TransportKind::Obfuscated => Box::new(ObfuscatedTransport::new()),
    }
}

/// Resolve a dial/listen string, accepting the `:port` shorthand
pub(crate) async fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };

    let result = tokio::net::lookup_host(&full)
        .await?
        .next()
        .ok_or_else(|| Error::Dial(format!("could not resolve {}", addr)));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("quic".parse::<TransportKind>().unwrap(), TransportKind::Quic);
        assert_eq!(
            "websocket".parse::<TransportKind>().unwrap(),
            TransportKind::WebSocket
        );
        assert_eq!("ws".parse::<TransportKind>().unwrap(), TransportKind::WebSocket);
        assert_eq!(
            "obfuscated".parse::<TransportKind>().unwrap(),
            TransportKind::Obfuscated
        );
        assert_eq!(
            "obfs".parse::<TransportKind>().unwrap(),
            TransportKind::Obfuscated
        );
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(TransportKind::Quic.to_string(), "quic");
        assert_eq!(TransportKind::WebSocket.to_string(), "websocket");
        assert_eq!(TransportKind::Obfuscated.to_string(), "obfuscated");
    }

    #[tokio::test]
    async fn test_resolve_port_shorthand() {
        let addr = resolve_addr(":8443").await.unwrap();
        assert_eq!(addr.port(), 8443);
    }
}
