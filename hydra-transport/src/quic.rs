//! QUIC transport
//!
//! One bidirectional stream per connection carries the whole session.
//! QUIC streams are byte streams, so each message is framed with a 4-byte
//! big-endian length prefix; that is what upholds the transport layer's
//! message-boundary contract. Idle timeout 30 s, keepalive 10 s, datagrams
//! enabled but unused.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::tls;
use crate::{resolve_addr, Connection, Error, Listener, Result, Transport, MAX_MESSAGE_LEN};

/// ALPN identifier for the HydraVPN QUIC transport
pub const ALPN: &[u8] = b"hydravpn";

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(10);

/// QUIC transport factory
#[derive(Default)]
pub struct QuicTransport;

impl QuicTransport {
    pub fn new() -> Self {
        Self
    }
}

fn transport_config() -> quinn::TransportConfig {
    let mut config = quinn::TransportConfig::default();
    config.max_idle_timeout(IDLE_TIMEOUT.try_into().ok());
    config.keep_alive_interval(Some(KEEPALIVE_PERIOD));
    // Datagrams are negotiated for future use; the dataplane runs on the
    // stream.
    config.datagram_receive_buffer_size(Some(65536));
    config.datagram_send_buffer_size(65536);
    config
}

#[async_trait]
impl Transport for QuicTransport {
    fn name(&self) -> &'static str {
        "quic"
    }

    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>> {
        tls::ensure_crypto_provider();
        let remote = resolve_addr(addr).await?;

        let bind: SocketAddr = if remote.is_ipv6() {
            "[::]:0".parse().expect("static addr")
        } else {
            "0.0.0.0:0".parse().expect("static addr")
        };
        let mut endpoint =
            quinn::Endpoint::client(bind).map_err(|e| Error::Dial(e.to_string()))?;

        let tls_config = tls::client_tls_config(&[ALPN])?;
        let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(tls_config)
            .map_err(|e| Error::Tls(e.to_string()))?;
        let mut client_config = quinn::ClientConfig::new(Arc::new(crypto));
        client_config.transport_config(Arc::new(transport_config()));
        endpoint.set_default_client_config(client_config);

        let connection = endpoint
            .connect(remote, "hydravpn")
            .map_err(|e| Error::Dial(e.to_string()))?
            .await
            .map_err(|e| Error::Dial(e.to_string()))?;

        let (send, recv) = connection
            .open_bi()
            .await
            .map_err(|e| Error::Dial(format!("failed to open QUIC stream: {}", e)))?;

        let local = endpoint.local_addr().ok();
        Ok(Box::new(QuicConnection {
            _endpoint: Some(endpoint),
            connection,
            send: Mutex::new(send),
            recv: Mutex::new(recv),
            local,
        }))
    }

    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>> {
        tls::ensure_crypto_provider();
        let bind_addr = resolve_addr(addr).await?;

        let tls_config = tls::server_tls_config(&[ALPN])?;
        let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(Arc::new(tls_config))
            .map_err(|e| Error::Tls(e.to_string()))?;
        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        server_config.transport_config(Arc::new(transport_config()));

        let endpoint = quinn::Endpoint::server(server_config, bind_addr)
            .map_err(|e| Error::Listen(e.to_string()))?;
        let local = endpoint.local_addr().ok();

        Ok(Box::new(QuicListener { endpoint, local }))
    }
}

/// A QUIC connection: the session's single bidirectional stream
pub struct QuicConnection {
    /// Dial-side endpoint, kept alive for the connection's lifetime
    _endpoint: Option<quinn::Endpoint>,
    connection: quinn::Connection,
    send: Mutex<quinn::SendStream>,
    recv: Mutex<quinn::RecvStream>,
    local: Option<SocketAddr>,
}

impl QuicConnection {
    fn from_accept(
        connection: quinn::Connection,
        send: quinn::SendStream,
        recv: quinn::RecvStream,
        local: Option<SocketAddr>,
    ) -> Self {
        Self {
            _endpoint: None,
            connection,
            send: Mutex::new(send),
            recv: Mutex::new(recv),
            local,
        }
    }
}

#[async_trait]
impl Connection for QuicConnection {
    async fn read(&self) -> Result<Vec<u8>> {
        let mut recv = self.recv.lock().await;

        let mut len_buf = [0u8; 4];
        recv.read_exact(&mut len_buf)
            .await
            .map_err(|_| Error::Closed)?;

        let len = u32::from_be_bytes(len_buf);
        if len as usize > MAX_MESSAGE_LEN {
            return Err(Error::FrameTooLarge(len));
        }

        let mut buf = vec![0u8; len as usize];
        recv.read_exact(&mut buf).await.map_err(|_| Error::Closed)?;
        Ok(buf)
    }

    async fn write(&self, msg: &[u8]) -> Result<()> {
        if msg.len() > MAX_MESSAGE_LEN {
            return Err(Error::FrameTooLarge(msg.len() as u32));
        }

        let mut framed = Vec::with_capacity(4 + msg.len());
        framed.extend_from_slice(&(msg.len() as u32).to_be_bytes());
        framed.extend_from_slice(msg);

        self.send
            .lock()
            .await
            .write_all(&framed)
            .await
            .map_err(|e| Error::Transport(format!("quic write: {}", e)))
    }

    async fn close(&self) {
        // Stream first, then the connection
        let _ = self.send.lock().await.finish();
        self.connection.close(0u32.into(), b"closed");
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.connection.remote_address())
    }
}

/// QUIC listener: accepts a connection, then its one stream
pub struct QuicListener {
    endpoint: quinn::Endpoint,
    local: Option<SocketAddr>,
}

#[async_trait]
impl Listener for QuicListener {
    async fn accept(&self) -> Result<Box<dyn Connection>> {
        let incoming = self.endpoint.accept().await.ok_or(Error::Closed)?;

        let connection = incoming
            .await
            .map_err(|e| Error::Listen(format!("quic accept: {}", e)))?;

        // The stream materializes with the client's first bytes
        let (send, recv) = connection
            .accept_bi()
            .await
            .map_err(|e| Error::Listen(format!("quic accept stream: {}", e)))?;

        Ok(Box::new(QuicConnection::from_accept(
            connection, send, recv, self.local,
        )))
    }

    async fn close(&self) {
        self.endpoint.close(0u32.into(), b"closed");
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn quic_pair() -> (Box<dyn Connection>, Box<dyn Connection>) {
        let transport = QuicTransport::new();
        let listener = transport.listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dial = tokio::spawn(async move {
            let client = QuicTransport::new().dial(&addr.to_string()).await.unwrap();
            // accept_bi only completes once the client writes, so write
            // the first message before the pair is handed out
            client.write(b"hello").await.unwrap();
            client
        });

        let server = listener.accept().await.unwrap();
        let client = dial.await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let (client, server) = quic_pair().await;

        assert_eq!(server.read().await.unwrap(), b"hello");

        server.write(b"world").await.unwrap();
        assert_eq!(client.read().await.unwrap(), b"world");
    }

    #[tokio::test]
    async fn test_message_boundaries() {
        let (client, server) = quic_pair().await;
        assert_eq!(server.read().await.unwrap(), b"hello");

        client.write(&[0x11; 1400]).await.unwrap();
        client.write(&[0x22; 7]).await.unwrap();

        assert_eq!(server.read().await.unwrap(), vec![0x11; 1400]);
        assert_eq!(server.read().await.unwrap(), vec![0x22; 7]);
    }

    #[tokio::test]
    async fn test_oversized_write_rejected() {
        let (client, _server) = quic_pair().await;
        let oversized = vec![0u8; MAX_MESSAGE_LEN + 1];
        assert!(matches!(
            client.write(&oversized).await.unwrap_err(),
            Error::FrameTooLarge(_)
        ));
    }
}
