//! In-process transport for tests
//!
//! Connections are pairs of bounded channels registered under a string
//! address, with the same message semantics as the wire variants. Used by
//! the engine's integration tests to run full client/server flows without
//! sockets.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::{Connection, Error, Listener, Result, Transport};

/// Per-connection channel capacity
const CHANNEL_DEPTH: usize = 64;

/// Channel-backed transport; clones share one listener registry
#[derive(Clone, Default)]
pub struct MemoryTransport {
    listeners: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<MemoryConnection>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>> {
        let accept_tx = {
            let listeners = self.listeners.lock().await;
            listeners
                .get(addr)
                .cloned()
                .ok_or_else(|| Error::Dial(format!("connection refused: {}", addr)))?
        };

        let (up_tx, up_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (down_tx, down_rx) = mpsc::channel(CHANNEL_DEPTH);

        let server_side = MemoryConnection::new(down_tx, up_rx);
        let client_side = MemoryConnection::new(up_tx, down_rx);

        accept_tx
            .send(server_side)
            .map_err(|_| Error::Dial(format!("listener gone: {}", addr)))?;

        Ok(Box::new(client_side))
    }

    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>> {
        let mut listeners = self.listeners.lock().await;
        if listeners.contains_key(addr) {
            return Err(Error::Listen(format!("address in use: {}", addr)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        listeners.insert(addr.to_string(), tx);

        Ok(Box::new(MemoryListener {
            addr: addr.to_string(),
            accept_rx: Mutex::new(rx),
            registry: self.listeners.clone(),
        }))
    }
}

/// One side of an in-memory connection
pub struct MemoryConnection {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl MemoryConnection {
    fn new(tx: mpsc::Sender<Vec<u8>>, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn read(&self) -> Result<Vec<u8>> {
        self.rx.lock().await.recv().await.ok_or(Error::Closed)
    }

    async fn write(&self, msg: &[u8]) -> Result<()> {
        let tx = self.tx.lock().await;
        let tx = tx.as_ref().ok_or(Error::Closed)?;
        tx.send(msg.to_vec()).await.map_err(|_| Error::Closed)
    }

    async fn close(&self) {
        // Dropping the sender lets the peer's read drain and then fail
        self.tx.lock().await.take();
        self.rx.lock().await.close();
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Listener side of the in-memory transport
pub struct MemoryListener {
    addr: String,
    accept_rx: Mutex<mpsc::UnboundedReceiver<MemoryConnection>>,
    registry: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<MemoryConnection>>>>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&self) -> Result<Box<dyn Connection>> {
        let conn = self
            .accept_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::Closed)?;
        Ok(Box::new(conn))
    }

    async fn close(&self) {
        self.registry.lock().await.remove(&self.addr);
        self.accept_rx.lock().await.close();
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dial_listen_roundtrip() {
        let transport = MemoryTransport::new();
        let listener = transport.listen("server").await.unwrap();

        let dialer = transport.clone();
        let client_task =
            tokio::spawn(async move { dialer.dial("server").await.unwrap() });

        let server_conn = listener.accept().await.unwrap();
        let client_conn = client_task.await.unwrap();

        client_conn.write(b"ping").await.unwrap();
        assert_eq!(server_conn.read().await.unwrap(), b"ping");

        server_conn.write(b"pong").await.unwrap();
        assert_eq!(client_conn.read().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_dial_unknown_address() {
        let transport = MemoryTransport::new();
        assert!(transport.dial("nowhere").await.is_err());
    }

    #[tokio::test]
    async fn test_double_listen_fails() {
        let transport = MemoryTransport::new();
        let _listener = transport.listen("server").await.unwrap();
        assert!(transport.listen("server").await.is_err());
    }

    #[tokio::test]
    async fn test_close_propagates_to_peer() {
        let transport = MemoryTransport::new();
        let listener = transport.listen("server").await.unwrap();

        let dialer = transport.clone();
        let client_task =
            tokio::spawn(async move { dialer.dial("server").await.unwrap() });
        let server_conn = listener.accept().await.unwrap();
        let client_conn = client_task.await.unwrap();

        client_conn.close().await;
        assert!(matches!(server_conn.read().await.unwrap_err(), Error::Closed));
    }

    #[tokio::test]
    async fn test_message_boundaries_preserved() {
        let transport = MemoryTransport::new();
        let listener = transport.listen("server").await.unwrap();

        let dialer = transport.clone();
        let client_task =
            tokio::spawn(async move { dialer.dial("server").await.unwrap() });
        let server_conn = listener.accept().await.unwrap();
        let client_conn = client_task.await.unwrap();

        client_conn.write(&[1; 10]).await.unwrap();
        client_conn.write(&[2; 20]).await.unwrap();

        assert_eq!(server_conn.read().await.unwrap().len(), 10);
        assert_eq!(server_conn.read().await.unwrap().len(), 20);
    }
}
