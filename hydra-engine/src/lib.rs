//! HydraVPN server and client cores
//!
//! The server terminates many clients, assigns each an address from the
//! tunnel pool, and forwards IPv4 datagrams between their sessions and the
//! host tunnel interface. The client holds one session, pumping its tunnel
//! interface in both directions and keeping the link alive. Both sides are
//! generic over the wire transport and the tunnel interface so the full
//! dataplane runs in-process under test.

mod client;
mod config;
mod error;
mod server;

pub use client::Client;
pub use config::{
    ClientConfig, ServerConfig, DEFAULT_LISTEN_ADDR, DEFAULT_SERVER_ADDR, DEFAULT_TUNNEL_NETWORK,
    DEFAULT_TUN_NAME,
};
pub use error::{Error, Result};
pub use server::Server;
