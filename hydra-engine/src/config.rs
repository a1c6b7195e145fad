//! Server and client configuration

use std::time::Duration;

use hydra_transport::TransportKind;

/// Default listen address for the server
pub const DEFAULT_LISTEN_ADDR: &str = ":8443";

/// Default server address for the client
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8443";

/// Default tunnel subnet
pub const DEFAULT_TUNNEL_NETWORK: &str = "10.8.0.0/24";

/// Default tunnel interface name
pub const DEFAULT_TUN_NAME: &str = "hydra0";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the transport listener
    pub listen: String,
    /// Wire transport variant
    pub transport: TransportKind,
    /// Subnet the address pool allocates from; `.1` is the server
    pub tunnel_network: String,
    /// Tunnel interface name (ignored on macOS, which assigns `utunN`)
    pub tun_name: String,
    /// Tunnel MTU
    pub mtu: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN_ADDR.to_string(),
            transport: TransportKind::default(),
            tunnel_network: DEFAULT_TUNNEL_NETWORK.to_string(),
            tun_name: DEFAULT_TUN_NAME.to_string(),
            mtu: hydra_protocol::DEFAULT_MTU,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address to dial
    pub server: String,
    /// Wire transport variant; must match the server
    pub transport: TransportKind,
    /// Tunnel interface name (ignored on macOS)
    pub tun_name: String,
    /// Tunnel MTU
    pub mtu: u16,
    /// Redial automatically after transport-level failures
    pub auto_reconnect: bool,
    /// Pause between reconnect attempts
    pub reconnect_delay: Duration,
    /// Replace the host's default route with the tunnel
    pub route_all_traffic: bool,
    /// Point the host at public resolvers while connected
    pub override_dns: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER_ADDR.to_string(),
            transport: TransportKind::default(),
            tun_name: DEFAULT_TUN_NAME.to_string(),
            mtu: hydra_protocol::DEFAULT_MTU,
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(5),
            route_all_traffic: false,
            override_dns: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.listen, ":8443");
        assert_eq!(server.transport, TransportKind::WebSocket);
        assert_eq!(server.tunnel_network, "10.8.0.0/24");
        assert_eq!(server.tun_name, "hydra0");
        assert_eq!(server.mtu, 1400);

        let client = ClientConfig::default();
        assert_eq!(client.server, "127.0.0.1:8443");
        assert!(client.auto_reconnect);
        assert_eq!(client.reconnect_delay, Duration::from_secs(5));
        assert!(!client.route_all_traffic);
    }
}
