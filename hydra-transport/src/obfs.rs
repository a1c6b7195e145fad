//! Obfuscated TLS transport
//!
//! The wire is ordinary TLS (the security boundary and the DPI
//! camouflage). Inside the TLS stream every message is a 4-byte big-endian
//! length prefix plus body, with both XORed against a 32-byte rolling key.
//! The key position advances over everything written and restarts per
//! connection; the XOR only disrupts fingerprinting of the inner framing.
//!
//! The reader decodes the length prefix with a temporary cursor so an
//! invalid length can be rejected without committing key state, then
//! advances the real cursor past the prefix and decodes the body.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};

use crate::tls;
use crate::{resolve_addr, Connection, Error, Listener, Result, Transport, MAX_MESSAGE_LEN};

/// Rolling key length
pub const OBFS_KEY_LEN: usize = 32;

/// Default rolling key, shared by client and server
///
/// Not a secret: TLS carries the confidentiality. Override with
/// [`ObfuscatedTransport::with_key`] to vary the fingerprint.
pub const DEFAULT_OBFS_KEY: [u8; OBFS_KEY_LEN] = [
    0x9e, 0x3a, 0x71, 0xc4, 0x5d, 0x08, 0xb2, 0xef, 0x16, 0x8b, 0xd9, 0x42, 0x7c, 0xa1, 0x30,
    0xf5, 0x64, 0x2e, 0x97, 0x0b, 0xc8, 0x53, 0xaa, 0x1f, 0xe0, 0x79, 0x36, 0x8d, 0x4b, 0xd2,
    0x05, 0xbe,
];

/// Byte length of the message length prefix
const LEN_PREFIX: usize = 4;

/// Rolling XOR state
#[derive(Debug, Clone)]
struct XorState {
    key: [u8; OBFS_KEY_LEN],
    pos: usize,
}

impl XorState {
    fn new(key: [u8; OBFS_KEY_LEN]) -> Self {
        Self { key, pos: 0 }
    }

    /// XOR `buf` in place, advancing the key position
    fn apply(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte ^= self.key[self.pos];
            self.pos = (self.pos + 1) % OBFS_KEY_LEN;
        }
    }

    /// Advance the key position without touching data
    fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n) % OBFS_KEY_LEN;
    }
}

/// Obfuscated TLS transport factory
pub struct ObfuscatedTransport {
    key: [u8; OBFS_KEY_LEN],
}

impl Default for ObfuscatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ObfuscatedTransport {
    pub fn new() -> Self {
        Self {
            key: DEFAULT_OBFS_KEY,
        }
    }

    /// Use a custom rolling key (must match on client and server)
    pub fn with_key(key: [u8; OBFS_KEY_LEN]) -> Self {
        Self { key }
    }
}

#[async_trait]
impl Transport for ObfuscatedTransport {
    fn name(&self) -> &'static str {
        "obfuscated"
    }

    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>> {
        tls::ensure_crypto_provider();
        let remote = resolve_addr(addr).await?;

        let tcp = TcpStream::connect(remote)
            .await
            .map_err(|e| Error::Dial(format!("obfuscated dial failed: {}", e)))?;
        let local = tcp.local_addr().ok();

        let connector = TlsConnector::from(Arc::new(tls::client_tls_config(&[])?));
        let server_name = rustls::pki_types::ServerName::try_from("hydravpn".to_string())
            .map_err(|e| Error::Tls(e.to_string()))?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Dial(format!("TLS handshake failed: {}", e)))?;

        Ok(Box::new(ObfsConnection::new(
            TlsStream::Client(stream),
            self.key,
            local,
            Some(remote),
        )))
    }

    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>> {
        tls::ensure_crypto_provider();
        let bind_addr = resolve_addr(addr).await?;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::Listen(format!("tcp bind failed: {}", e)))?;
        let local = listener.local_addr().ok();

        let acceptor = TlsAcceptor::from(Arc::new(tls::server_tls_config(&[])?));

        Ok(Box::new(ObfsListener {
            listener,
            acceptor,
            key: self.key,
            local,
        }))
    }
}

/// One obfuscated connection; each half owns its own XOR cursor
pub struct ObfsConnection {
    reader: Mutex<(ReadHalf<TlsStream<TcpStream>>, XorState)>,
    writer: Mutex<(WriteHalf<TlsStream<TcpStream>>, XorState)>,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
}

impl ObfsConnection {
    fn new(
        stream: TlsStream<TcpStream>,
        key: [u8; OBFS_KEY_LEN],
        local: Option<SocketAddr>,
        peer: Option<SocketAddr>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: Mutex::new((read_half, XorState::new(key))),
            writer: Mutex::new((write_half, XorState::new(key))),
            local,
            peer,
        }
    }
}

#[async_trait]
impl Connection for ObfsConnection {
    async fn read(&self) -> Result<Vec<u8>> {
        let mut guard = self.reader.lock().await;
        let (read_half, xor) = &mut *guard;

        let mut len_buf = [0u8; LEN_PREFIX];
        read_half
            .read_exact(&mut len_buf)
            .await
            .map_err(|_| Error::Closed)?;

        // Temporary cursor: reject a bad length without committing state
        let mut probe = xor.clone();
        probe.apply(&mut len_buf);
        let len = u32::from_be_bytes(len_buf);
        if len as usize > MAX_MESSAGE_LEN {
            return Err(Error::FrameTooLarge(len));
        }
        xor.skip(LEN_PREFIX);

        let mut body = vec![0u8; len as usize];
        read_half
            .read_exact(&mut body)
            .await
            .map_err(|_| Error::Closed)?;
        xor.apply(&mut body);

        Ok(body)
    }

    async fn write(&self, msg: &[u8]) -> Result<()> {
        if msg.len() > MAX_MESSAGE_LEN {
            return Err(Error::FrameTooLarge(msg.len() as u32));
        }

        let mut guard = self.writer.lock().await;
        let (write_half, xor) = &mut *guard;

        let mut framed = Vec::with_capacity(LEN_PREFIX + msg.len());
        framed.extend_from_slice(&(msg.len() as u32).to_be_bytes());
        framed.extend_from_slice(msg);
        xor.apply(&mut framed);

        write_half.write_all(&framed).await?;
        write_half.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        let mut guard = self.writer.lock().await;
        let _ = guard.0.shutdown().await;
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// TLS listener handing out obfuscated connections
pub struct ObfsListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    key: [u8; OBFS_KEY_LEN],
    local: Option<SocketAddr>,
}

#[async_trait]
impl Listener for ObfsListener {
    async fn accept(&self) -> Result<Box<dyn Connection>> {
        loop {
            let (tcp, peer) = self.listener.accept().await?;
            let local = tcp.local_addr().ok();

            match self.acceptor.accept(tcp).await {
                Ok(stream) => {
                    return Ok(Box::new(ObfsConnection::new(
                        TlsStream::Server(stream),
                        self.key,
                        local,
                        Some(peer),
                    )));
                }
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "TLS accept failed");
                    continue;
                }
            }
        }
    }

    async fn close(&self) {
        // Dropping the listener closes the socket
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_is_symmetric() {
        let mut enc = XorState::new(DEFAULT_OBFS_KEY);
        let mut dec = XorState::new(DEFAULT_OBFS_KEY);

        let original = b"obfuscate me".to_vec();
        let mut buf = original.clone();
        enc.apply(&mut buf);
        assert_ne!(buf, original);
        dec.apply(&mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn test_xor_position_rolls_across_calls() {
        let mut enc = XorState::new(DEFAULT_OBFS_KEY);
        let mut dec = XorState::new(DEFAULT_OBFS_KEY);

        for chunk_len in [3usize, 40, 1, 64] {
            let original = vec![0x5A; chunk_len];
            let mut buf = original.clone();
            enc.apply(&mut buf);
            dec.apply(&mut buf);
            assert_eq!(buf, original);
        }
        assert_eq!(enc.pos, dec.pos);
    }

    #[test]
    fn test_skip_matches_apply_distance() {
        let mut skipped = XorState::new(DEFAULT_OBFS_KEY);
        let mut applied = XorState::new(DEFAULT_OBFS_KEY);

        skipped.skip(LEN_PREFIX);
        applied.apply(&mut [0u8; LEN_PREFIX]);
        assert_eq!(skipped.pos, applied.pos);
    }

    async fn obfs_pair() -> (Box<dyn Connection>, Box<dyn Connection>) {
        let transport = ObfuscatedTransport::new();
        let listener = transport.listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dial = tokio::spawn(async move {
            ObfuscatedTransport::new()
                .dial(&addr.to_string())
                .await
                .unwrap()
        });

        let server = listener.accept().await.unwrap();
        let client = dial.await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let (client, server) = obfs_pair().await;

        client.write(b"hello").await.unwrap();
        assert_eq!(server.read().await.unwrap(), b"hello");

        server.write(b"world").await.unwrap();
        assert_eq!(client.read().await.unwrap(), b"world");
    }

    #[tokio::test]
    async fn test_many_messages_keep_cursor_aligned() {
        let (client, server) = obfs_pair().await;

        for i in 0..100u32 {
            let msg = vec![i as u8; (i as usize % 50) + 1];
            client.write(&msg).await.unwrap();
            assert_eq!(server.read().await.unwrap(), msg);
        }
    }

    #[tokio::test]
    async fn test_oversized_write_rejected() {
        let (client, _server) = obfs_pair().await;
        let oversized = vec![0u8; MAX_MESSAGE_LEN + 1];
        assert!(matches!(
            client.write(&oversized).await.unwrap_err(),
            Error::FrameTooLarge(_)
        ));
    }
}
