//! Client core: dial, handshake, tunnel pump, keepalive, reconnect
//!
//! Three tasks run per connection: tunnel-read → seal → send, transport
//! read → open → tunnel-write, and the keepalive timer. They share only the
//! connection handle, the `connected` flag, and a cancellation channel.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hydra_protocol::{
    derive_session_keys, ClientState, HandshakeResponse, KeyPair, Opener, Packet, PacketType,
    Role, Sealer, SessionId, HANDSHAKE_TIMEOUT, KEEPALIVE_INTERVAL,
};
use hydra_transport::{build_transport, Connection, Transport};
use hydra_tun::{DnsOverride, RoutePolicy, TunConfig, TunDevice, TunIo, MAX_PACKET_SIZE};

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// An established link to the server
struct Link {
    session_id: u64,
    assigned_addr: Ipv4Addr,
    server_addr: Ipv4Addr,
    conn: Arc<dyn Connection>,
    /// Gates the keepalive timer against a concurrent disconnect
    connected: Arc<RwLock<bool>>,
    /// Per-link cancellation; dropped links never outlive their tasks
    cancel: broadcast::Sender<()>,
    /// Fatal errors reported by the link tasks
    fail_rx: mpsc::Receiver<Error>,
    tasks: Vec<JoinHandle<()>>,
    route_policy: Option<RoutePolicy>,
    dns: Option<DnsOverride>,
}

/// The HydraVPN client
pub struct Client {
    config: ClientConfig,
    transport: Box<dyn Transport>,
    injected_tun: Option<Arc<dyn TunIo>>,
    state: ClientState,
    link: Option<Link>,
    shutdown: broadcast::Sender<()>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let transport = build_transport(config.transport);
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            transport,
            injected_tun: None,
            state: ClientState::Idle,
            link: None,
            shutdown,
        }
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

    /// Current lifecycle state
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// The tunnel address assigned by the server, while connected
    pub fn assigned_addr(&self) -> Option<Ipv4Addr> {
        self.link.as_ref().map(|l| l.assigned_addr)
    }

    /// The server's tunnel address, while connected
    pub fn server_tunnel_addr(&self) -> Option<Ipv4Addr> {
        self.link.as_ref().map(|l| l.server_addr)
    }

    /// Handle that interrupts [`Client::run`] from another task
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Dial, handshake, open the tunnel, and spawn the link tasks
    pub async fn connect(&mut self) -> Result<()> {
        self.state = self.state.transition_to(ClientState::Dialing)?;

        match self.establish().await {
            Ok(link) => {
                self.link = Some(link);
                self.state = ClientState::Established;
                info!("VPN tunnel established");
                Ok(())
            }
            Err(e) => {
                self.state = ClientState::Idle;
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<Link> {
        info!(
            server = %self.config.server,
            transport = self.transport.name(),
            "connecting"
        );

        let conn: Arc<dyn Connection> = Arc::from(
            self.transport
                .dial(&self.config.server)
                .await
                .map_err(|e| Error::Connection(format!("failed to connect: {}", e)))?,
        );
        self.state = self.state.transition_to(ClientState::Handshaking)?;

        let (response, keys) = match self.handshake(&conn).await {
            Ok(result) => result,
            Err(e) => {
                conn.close().await;
                return Err(e);
            }
        };
        let (sealer, opener) = keys.into_cipher_pair();

        info!(
            session = %SessionId::new(response.session_id),
            assigned = %response.client_addr,
            server = %response.server_addr,
            "handshake complete"
        );

        // A missing tunnel device degrades to tunnel-only mode: the link
        // stays up, inner traffic has nowhere to go.
        let tun = match self.injected_tun.clone() {
            Some(tun) => Some(tun),
            None => match self.open_tun(&response).await {
                Ok(tun) => Some(tun),
                Err(e) => {
                    warn!(error = %e, "failed to create TUN device, running in tunnel-only mode");
                    None
                }
            },
        };

        let (route_policy, dns) = self.apply_host_policy(&conn, &response, tun.as_deref()).await;

        let connected = Arc::new(RwLock::new(true));
        let (cancel, _) = broadcast::channel(1);
        let (fail_tx, fail_rx) = mpsc::channel(4);
        let mut tasks = Vec::new();

        // Tunnel → seal → transport
        if let Some(tun) = tun.clone() {
            tasks.push(tokio::spawn(tun_to_transport(
                tun,
                conn.clone(),
                sealer,
                response.session_id,
                fail_tx.clone(),
                cancel.subscribe(),
            )));
        }

        // Transport → open → tunnel
        tasks.push(tokio::spawn(transport_to_tun(
            conn.clone(),
            tun,
            opener,
            fail_tx.clone(),
            cancel.subscribe(),
        )));

        // Keepalive timer
        tasks.push(tokio::spawn(keepalive_loop(
            conn.clone(),
            response.session_id,
            connected.clone(),
            cancel.subscribe(),
        )));

        Ok(Link {
            session_id: response.session_id,
            assigned_addr: response.client_addr,
            server_addr: response.server_addr,
            conn,
            connected,
            cancel,
            fail_rx,
            tasks,
            route_policy,
            dns,
        })
    }

    async fn handshake(
        &self,
        conn: &Arc<dyn Connection>,
    ) -> Result<(HandshakeResponse, hydra_protocol::SessionKeys)> {
        let key_pair = KeyPair::generate();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let init = hydra_protocol::HandshakeInit::new(key_pair.public_bytes(), timestamp);
        conn.write(&Packet::handshake_init(init.marshal()).marshal())
            .await
            .map_err(|e| Error::Handshake(format!("failed to send handshake init: {}", e)))?;

        let raw = tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.read())
            .await
            .map_err(|_| Error::HandshakeTimeout)?
            .map_err(|e| Error::Handshake(format!("failed to read handshake response: {}", e)))?;

        let packet = Packet::parse(&raw)?;
        if packet.kind() != Some(PacketType::HandshakeResponse) {
            return Err(Error::Handshake(format!(
                "unexpected packet type {}",
                packet.packet_type
            )));
        }

        let response = HandshakeResponse::parse(&packet.payload)?;
        let shared_secret = key_pair.shared_secret(&response.server_public)?;
        let keys = derive_session_keys(&shared_secret, &response.salt, Role::Initiator)?;

        Ok((response, keys))
    }

    async fn open_tun(&self, response: &HandshakeResponse) -> Result<Arc<dyn TunIo>> {
        #[allow(unused_mut)]
        let mut builder = TunConfig::builder();
        #[cfg(not(target_os = "macos"))]
        {
            builder = builder.name(&self.config.tun_name);
        }

        let config = builder
            .ipv4(response.client_addr, response.prefix_len)
            .destination(response.server_addr)
            .mtu(self.config.mtu)
            .build()?;

        let device = TunDevice::create(config).await?;
        Ok(Arc::new(device))
    }

    /// Apply the optional route and DNS overrides; failures degrade with a
    /// warning rather than dropping the connection
    async fn apply_host_policy(
        &self,
        conn: &Arc<dyn Connection>,
        response: &HandshakeResponse,
        tun: Option<&dyn TunIo>,
    ) -> (Option<RoutePolicy>, Option<DnsOverride>) {
        let Some(tun) = tun else {
            return (None, None);
        };

        let mut route_policy = None;
        if self.config.route_all_traffic {
            match (RoutePolicy::new(), conn.remote_addr()) {
                (Ok(mut policy), Some(remote)) => {
                    match policy
                        .route_all(remote.ip(), response.server_addr, tun.name())
                        .await
                    {
                        Ok(()) => route_policy = Some(policy),
                        Err(e) => warn!(error = %e, "failed to apply route policy"),
                    }
                }
                (Err(e), _) => warn!(error = %e, "failed to create route manager"),
                (_, None) => warn!("transport has no remote address, skipping route policy"),
            }
        }

        let mut dns = None;
        if self.config.override_dns {
            let mut override_state = DnsOverride::new();
            match override_state.apply(tun.name()).await {
                Ok(()) => dns = Some(override_state),
                Err(e) => warn!(error = %e, "failed to apply DNS override"),
            }
        }

        (route_policy, dns)
    }

    /// Connect and keep the link up, redialing per configuration
    ///
    /// Returns on shutdown, on a non-transient error, or when
    /// auto-reconnect is disabled and the link drops.
    pub async fn run(&mut self) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            match self.connect().await {
                Ok(()) => {
                    let outcome = {
                        let link = match self.link.as_mut() {
                            Some(link) => link,
                            None => return Ok(()),
                        };
                        tokio::select! {
                            _ = shutdown_rx.recv() => None,
                            failure = link.fail_rx.recv() => {
                                Some(failure.unwrap_or(Error::Transport(
                                    hydra_transport::Error::Closed,
                                )))
                            }
                        }
                    };

                    match outcome {
                        // Shutdown requested
                        None => {
                            self.disconnect().await;
                            return Ok(());
                        }
                        Some(error) => {
                            warn!(error = %error, "connection lost");
                            self.disconnect().await;
                            if !(self.config.auto_reconnect && error.should_reconnect()) {
                                return Err(error);
                            }
                        }
                    }
                }
                Err(e) => {
                    if !(self.config.auto_reconnect && e.should_reconnect()) {
                        return Err(e);
                    }
                    warn!(error = %e, "connect failed");
                }
            }

            info!(delay = ?self.config.reconnect_delay, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown_rx.recv() => return Ok(()),
            }
        }
    }

    /// Tear the link down: best-effort Disconnect frame, close, unwind
    pub async fn disconnect(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };

        if self.state == ClientState::Established {
            self.state = ClientState::Closing;
        }
        info!("disconnecting");

        *link.connected.write().await = false;

        // Best effort; the connection may already be gone
        let _ = link
            .conn
            .write(&Packet::disconnect(link.session_id).marshal())
            .await;
        link.conn.close().await;

        let _ = link.cancel.send(());
        for task in link.tasks.drain(..) {
            let _ = task.await;
        }

        if let Some(mut dns) = link.dns.take() {
            dns.restore().await;
        }
        if let Some(mut policy) = link.route_policy.take() {
            policy.restore().await;
        }

        self.state = ClientState::Idle;
        info!("disconnected");
    }
}

/// Tunnel → seal → Data frame → transport
async fn tun_to_transport(
    tun: Arc<dyn TunIo>,
    conn: Arc<dyn Connection>,
    mut sealer: Sealer,
    session_id: u64,
    fail_tx: mpsc::Sender<Error>,
    mut cancel: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let n = tokio::select! {
            _ = cancel.recv() => return,
            read = tun.recv(&mut buf) => match read {
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "tunnel read ended");
                    return;
                }
            },
        };

        let sealed = match sealer.seal(&buf[..n]) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(error = %e, "seal failed");
                continue;
            }
        };

        if let Err(e) = conn.write(&Packet::data(session_id, sealed).marshal()).await {
            let _ = fail_tx.send(Error::Transport(e)).await;
            return;
        }
    }
}

/// Transport → open → tunnel
async fn transport_to_tun(
    conn: Arc<dyn Connection>,
    tun: Option<Arc<dyn TunIo>>,
    opener: Opener,
    fail_tx: mpsc::Sender<Error>,
    mut cancel: broadcast::Receiver<()>,
) {
    loop {
        let raw = tokio::select! {
            _ = cancel.recv() => return,
            read = conn.read() => match read {
                Ok(raw) => raw,
                Err(e) => {
                    let _ = fail_tx.send(Error::Transport(e)).await;
                    return;
                }
            },
        };

        let packet = match Packet::parse(&raw) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = %e, "dropping malformed frame");
                continue;
            }
        };

        match packet.kind() {
            Some(PacketType::Data) => {
                let plaintext = match opener.open(&packet.payload) {
                    Ok(plaintext) => plaintext,
                    Err(_) => {
                        debug!("dropping undecryptable packet");
                        continue;
                    }
                };
                if let Some(ref tun) = tun {
                    if let Err(e) = tun.send(&plaintext).await {
                        warn!(error = %e, "tunnel write failed");
                    }
                }
            }
            // The server acknowledged a keepalive
            Some(PacketType::KeepAlive) => {}
            Some(PacketType::Disconnect) => {
                info!("server disconnected");
                let _ = fail_tx
                    .send(Error::Connection("server disconnected".into()))
                    .await;
                return;
            }
            _ => {
                debug!(packet_type = packet.packet_type, "dropping unexpected packet type");
            }
        }
    }
}

/// Send a keepalive frame every [`KEEPALIVE_INTERVAL`] while connected
async fn keepalive_loop(
    conn: Arc<dyn Connection>,
    session_id: u64,
    connected: Arc<RwLock<bool>>,
    mut cancel: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
    // The first tick fires immediately; skip it
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.recv() => return,
            _ = ticker.tick() => {
                if !*connected.read().await {
                    return;
                }
                if let Err(e) = conn.write(&Packet::keepalive(session_id).marshal()).await {
                    warn!(error = %e, "keepalive send failed");
                }
            }
        }
    }
}
