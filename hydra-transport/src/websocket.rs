//! WebSocket transport
//!
//! The listener is a plain TCP listener with an HTTP upgrade at `/hydra`;
//! every message travels as one binary frame. The dialer tries `wss://`
//! first and falls back to `ws://` when the TLS handshake fails, which
//! keeps local testing against a non-TLS listener working.

use std::net::SocketAddr;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async, WebSocketStream};

use crate::{resolve_addr, Connection, Error, Listener, Result, Transport};

/// HTTP path the upgrade is served at
pub const WS_PATH: &str = "/hydra";

/// WebSocket transport factory
#[derive(Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>> {
        crate::tls::ensure_crypto_provider();
        let secure_url = format!("wss://{}{}", addr, WS_PATH);

        let ws = match connect_async(secure_url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                tracing::debug!(error = %e, "wss dial failed, falling back to ws");
                let plain_url = format!("ws://{}{}", addr, WS_PATH);
                let (ws, _) = connect_async(plain_url.as_str())
                    .await
                    .map_err(|e| Error::Dial(format!("websocket dial failed: {}", e)))?;
                ws
            }
        };

        let (local, peer) = match ws.get_ref() {
            tokio_tungstenite::MaybeTlsStream::Plain(s) => {
                (s.local_addr().ok(), s.peer_addr().ok())
            }
            _ => (None, None),
        };

        Ok(Box::new(WsConnection::new(ws, local, peer)))
    }

    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>> {
        let bind_addr = resolve_addr(addr).await?;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::Listen(format!("tcp bind failed: {}", e)))?;
        let local = listener.local_addr().ok();

        Ok(Box::new(WsListener { listener, local }))
    }
}

/// An accepted or dialed WebSocket connection
pub struct WsConnection<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WsConnection<S> {
    fn new(ws: WebSocketStream<S>, local: Option<SocketAddr>, peer: Option<SocketAddr>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            local,
            peer,
        }
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send + 'static> Connection for WsConnection<S> {
    async fn read(&self) -> Result<Vec<u8>> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                None => return Err(Error::Closed),
                Some(Err(e)) => {
                    return Err(Error::Transport(format!("websocket read: {}", e)))
                }
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Close(_))) => return Err(Error::Closed),
                // Control and text frames are not part of the protocol
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn write(&self, msg: &[u8]) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Binary(msg.to_vec()))
            .await
            .map_err(|e| Error::Transport(format!("websocket write: {}", e)))
    }

    async fn close(&self) {
        let _ = self.sink.lock().await.send(Message::Close(None)).await;
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Listener accepting upgrades at [`WS_PATH`]
pub struct WsListener {
    listener: TcpListener,
    local: Option<SocketAddr>,
}

#[async_trait]
impl Listener for WsListener {
    async fn accept(&self) -> Result<Box<dyn Connection>> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let local = stream.local_addr().ok();

            let check_path = |req: &Request, resp: Response| {
                if req.uri().path() == WS_PATH {
                    Ok(resp)
                } else {
                    let reject: ErrorResponse = Response::builder()
                        .status(404)
                        .body(None)
                        .expect("static response");
                    Err(reject)
                }
            };

            match accept_hdr_async(stream, check_path).await {
                Ok(ws) => {
                    return Ok(Box::new(WsConnection::new(ws, local, Some(peer))));
                }
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "rejected websocket upgrade");
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

    async fn ws_pair() -> (Box<dyn Connection>, Box<dyn Connection>) {
        let transport = WebSocketTransport::new();
        let listener = transport.listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dial = tokio::spawn(async move {
            WebSocketTransport::new()
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
        let (client, server) = ws_pair().await;

        client.write(b"hello").await.unwrap();
        assert_eq!(server.read().await.unwrap(), b"hello");

        server.write(b"world").await.unwrap();
        assert_eq!(client.read().await.unwrap(), b"world");
    }

    #[tokio::test]
    async fn test_message_boundaries() {
        let (client, server) = ws_pair().await;

        client.write(&[0xAA; 100]).await.unwrap();
        client.write(&[0xBB; 200]).await.unwrap();

        assert_eq!(server.read().await.unwrap(), vec![0xAA; 100]);
        assert_eq!(server.read().await.unwrap(), vec![0xBB; 200]);
    }

    #[tokio::test]
    async fn test_close_observed_by_peer() {
        let (client, server) = ws_pair().await;

        client.close().await;
        assert!(server.read().await.is_err());
    }
}
