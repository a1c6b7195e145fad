//! Server core: accept loop, handshake handler, session table, and the
//! tunnel-to-session demultiplexer
//!
//! One task per accepted connection plus a single reader on the server's
//! tunnel interface. Sessions live in an id-keyed table with an
//! address-keyed index beside it; the per-connection task is the only
//! place a session is created and the only place it is torn down.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use hydra_protocol::{
    derive_session_keys, generate_salt, HandshakeInit, HandshakeResponse, Ipv4Pool, KeyPair,
    Opener, Packet, PacketType, Role, Sealer, Session, SessionId, HANDSHAKE_TIMEOUT,
};
use hydra_transport::{build_transport, Connection, Listener, Transport};
use hydra_tun::{TunConfig, TunDevice, TunIo, MAX_PACKET_SIZE};

use crate::config::ServerConfig;
use crate::error::{Error, Result};

/// A connected client as the server sees it
struct ClientSession {
    id: u64,
    addr: Ipv4Addr,
    conn: Arc<dyn Connection>,
    /// Send-direction AEAD state; the demux task is its only writer, the
    /// mutex keeps the counter exclusive
    sealer: Mutex<Sealer>,
    /// Lifetime state and liveness record
    session: Mutex<Session>,
}

/// State shared between the accept loop, session tasks, and the demux task
struct Shared {
    key_pair: KeyPair,
    pool: Mutex<Ipv4Pool>,
    sessions: RwLock<HashMap<u64, Arc<ClientSession>>>,
    /// Assigned address to session id, for the tunnel demux
    by_addr: RwLock<HashMap<Ipv4Addr, u64>>,
    tun: RwLock<Option<Arc<dyn TunIo>>>,
    server_addr: Ipv4Addr,
    prefix_len: u8,
}

/// The HydraVPN server
pub struct Server {
    config: ServerConfig,
    transport: Box<dyn Transport>,
    injected_tun: Option<Arc<dyn TunIo>>,
    shared: Arc<Shared>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    running: bool,
}

impl Server {
    /// Create a server; generates the server key pair and the address pool
    pub fn new(config: ServerConfig) -> Result<Self> {
        let pool = Ipv4Pool::from_cidr(&config.tunnel_network)
            .map_err(|e| Error::Config(format!("invalid tunnel network: {}", e)))?;
        let server_addr = pool.server_addr();
        let prefix_len = pool.prefix_len();

        let transport = build_transport(config.transport);
        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            config,
            transport,
            injected_tun: None,
            shared: Arc::new(Shared {
                key_pair: KeyPair::generate(),
                pool: Mutex::new(pool),
                sessions: RwLock::new(HashMap::new()),
                by_addr: RwLock::new(HashMap::new()),
                tun: RwLock::new(None),
                server_addr,
                prefix_len,
            }),
            shutdown,
            tasks: Vec::new(),
            local_addr: None,
            running: false,
        })
    }

    /// Replace the wire transport (used by tests)
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Use an already-open tunnel interface instead of creating one
    pub fn with_tun(mut self, tun: Arc<dyn TunIo>) -> Self {
        self.injected_tun = Some(tun);
        self
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The server's tunnel address (`.1` of the pool subnet)
    pub fn tunnel_addr(&self) -> Ipv4Addr {
        self.shared.server_addr
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.shared.sessions.read().await.len()
    }

    /// Open the tunnel, bind the listener, and spawn the server loops
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(Error::AlreadyRunning);
        }

        info!(
            listen = %self.config.listen,
            transport = self.transport.name(),
            "starting HydraVPN server"
        );

        // A missing tunnel device degrades to tunnel-only mode: sessions
        // and keepalives work, inner traffic has nowhere to go.
        let tun = match self.injected_tun.clone() {
            Some(tun) => Some(tun),
            None => match self.open_tun().await {
                Ok(tun) => Some(tun),
                Err(e) => {
                    warn!(error = %e, "failed to create TUN device, running in tunnel-only mode");
                    None
                }
            },
        };
        *self.shared.tun.write().await = tun.clone();

        let listener = self
            .transport
            .listen(&self.config.listen)
            .await
            .map_err(|e| Error::Connection(format!("failed to start listener: {}", e)))?;
        self.local_addr = listener.local_addr();
        info!(addr = ?self.local_addr, "server listening");

        if let Some(tun) = tun {
            let shared = self.shared.clone();
            let shutdown_rx = self.shutdown.subscribe();
            self.tasks
                .push(tokio::spawn(demux_loop(shared, tun, shutdown_rx)));
        }

        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        self.tasks
            .push(tokio::spawn(accept_loop(shared, listener, shutdown)));

        self.running = true;
        Ok(())
    }

    async fn open_tun(&self) -> Result<Arc<dyn TunIo>> {
        #[allow(unused_mut)]
        let mut builder = TunConfig::builder();
        #[cfg(not(target_os = "macos"))]
        {
            builder = builder.name(&self.config.tun_name);
        }

        let config = builder
            .ipv4(self.shared.server_addr, self.shared.prefix_len)
            .mtu(self.config.mtu)
            .build()?;

        let device = TunDevice::create(config).await?;
        Ok(Arc::new(device))
    }

    /// Cancel all tasks, close the listener and tunnel, and wait
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }

        info!("stopping server");
        let _ = self.shutdown.send(());

        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        *self.shared.tun.write().await = None;
        self.running = false;
        info!("server stopped");
    }
}

/// Accept connections until shutdown; each gets its own session task
async fn accept_loop(
    shared: Arc<Shared>,
    listener: Box<dyn Listener>,
    shutdown: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    let mut session_tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok(conn) => {
                        let conn: Arc<dyn Connection> = Arc::from(conn);
                        debug!(peer = ?conn.remote_addr(), "new connection");
                        session_tasks.spawn(handle_connection(
                            shared.clone(),
                            conn,
                            shutdown.subscribe(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "listener closed");
                        break;
                    }
                }
            }
            // Reap finished session tasks as they go
            Some(_) = session_tasks.join_next(), if !session_tasks.is_empty() => {}
        }
    }

    listener.close().await;
    while session_tasks.join_next().await.is_some() {}
}

/// Run one connection from handshake to teardown
async fn handle_connection(
    shared: Arc<Shared>,
    conn: Arc<dyn Connection>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if let Err(e) = serve_connection(&shared, &conn, &mut shutdown_rx).await {
        debug!(error = %e, "session ended");
    }
    conn.close().await;
}

async fn serve_connection(
    shared: &Arc<Shared>,
    conn: &Arc<dyn Connection>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<()> {
    // The first message must be a HandshakeInit, within the deadline.
    // Every failure up to registration closes the connection silently.
    let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.read())
        .await
        .map_err(|_| Error::HandshakeTimeout)?
        .map_err(Error::Transport)?;

    let packet = Packet::parse(&first)?;
    if packet.kind() != Some(PacketType::HandshakeInit) {
        return Err(Error::Handshake(format!(
            "expected handshake init, got type {}",
            packet.packet_type
        )));
    }
    let init = HandshakeInit::parse(&packet.payload)?;

    let mut session = Session::new(SessionId::random());
    session.begin_handshake()?;
    let session_id = session.id.value();

    let shared_secret = shared.key_pair.shared_secret(&init.client_public)?;
    let salt = generate_salt();
    let keys = derive_session_keys(&shared_secret, &salt, Role::Responder)?;
    let (sealer, opener) = keys.into_cipher_pair();

    // Pool exhaustion rejects the client before anything is registered
    let client_addr = shared.pool.lock().await.allocate()?;

    let entry = Arc::new(ClientSession {
        id: session_id,
        addr: client_addr,
        conn: conn.clone(),
        sealer: Mutex::new(sealer),
        session: Mutex::new(session),
    });

    shared
        .sessions
        .write()
        .await
        .insert(session_id, entry.clone());
    shared.by_addr.write().await.insert(client_addr, session_id);

    // From here on the session owns an address; release it on every exit
    let result = established(shared, conn, &entry, &opener, salt, shutdown_rx).await;

    shared.sessions.write().await.remove(&session_id);
    shared.by_addr.write().await.remove(&client_addr);
    shared.pool.lock().await.release(client_addr);
    let _ = entry.session.lock().await.close();
    info!(
        session = %SessionId::new(session_id),
        addr = %client_addr,
        "session closed, address released"
    );

    result
}

async fn established(
    shared: &Arc<Shared>,
    conn: &Arc<dyn Connection>,
    entry: &Arc<ClientSession>,
    opener: &Opener,
    salt: [u8; hydra_protocol::SALT_LEN],
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<()> {
    let response = HandshakeResponse::new(
        shared.key_pair.public_bytes(),
        entry.id,
        entry.addr,
        shared.server_addr,
        shared.prefix_len,
        salt,
    );
    conn.write(&Packet::handshake_response(entry.id, response.marshal()).marshal())
        .await
        .map_err(Error::Transport)?;

    entry.session.lock().await.establish(entry.addr)?;
    info!(
        session = %SessionId::new(entry.id),
        addr = %entry.addr,
        "session established"
    );

    // Data loop: dispatch by type, drop malformed frames, exit on
    // transport error or Disconnect
    loop {
        let raw = tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            read = conn.read() => read.map_err(Error::Transport)?,
        };

        let packet = match Packet::parse(&raw) {
            Ok(p) => p,
            Err(e) => {
                debug!(session = %SessionId::new(entry.id), error = %e, "dropping malformed frame");
                continue;
            }
        };

        match packet.kind() {
            Some(PacketType::Data) => {
                let plaintext = match opener.open(&packet.payload) {
                    Ok(p) => p,
                    Err(_) => {
                        debug!(session = %SessionId::new(entry.id), "dropping undecryptable packet");
                        continue;
                    }
                };
                entry.session.lock().await.touch();

                let tun = shared.tun.read().await.clone();
                if let Some(tun) = tun {
                    if let Err(e) = tun.send(&plaintext).await {
                        warn!(error = %e, "tunnel write failed");
                    }
                }
            }
            Some(PacketType::KeepAlive) => {
                entry.session.lock().await.touch();
                conn.write(&Packet::keepalive(entry.id).marshal())
                    .await
                    .map_err(Error::Transport)?;
            }
            Some(PacketType::Disconnect) => {
                info!(session = %SessionId::new(entry.id), "client disconnected");
                return Ok(());
            }
            _ => {
                debug!(
                    session = %SessionId::new(entry.id),
                    packet_type = packet.packet_type,
                    "dropping unexpected packet type"
                );
            }
        }
    }
}

/// Single reader on the server tunnel: seal each datagram for the session
/// that owns its destination address
async fn demux_loop(
    shared: Arc<Shared>,
    tun: Arc<dyn TunIo>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let n = tokio::select! {
            _ = shutdown_rx.recv() => return,
            read = tun.recv(&mut buf) => match read {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "tunnel read failed, stopping demux");
                    return;
                }
            },
        };

        // Too short to carry an IPv4 header
        if n < 20 {
            continue;
        }
        let dst = Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]);

        let session = {
            let by_addr = shared.by_addr.read().await;
            match by_addr.get(&dst) {
                Some(&id) => shared.sessions.read().await.get(&id).cloned(),
                None => None,
            }
        };

        // No session owns this destination: drop silently
        let Some(session) = session else { continue };

        let sealed = {
            let mut sealer = session.sealer.lock().await;
            match sealer.seal(&buf[..n]) {
                Ok(sealed) => sealed,
                Err(e) => {
                    warn!(error = %e, "seal failed");
                    continue;
                }
            }
        };

        let frame = Packet::data(session.id, sealed).marshal();
        if let Err(e) = session.conn.write(&frame).await {
            // The session task will observe the same failure and clean up
            debug!(session = %SessionId::new(session.id), error = %e, "session write failed");
        }
    }
}
