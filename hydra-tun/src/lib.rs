//! Tunnel interface integration for HydraVPN
//!
//! Creates and drives the host TUN device, abstracts packet I/O behind the
//! [`TunIo`] trait (with an in-memory mock for tests), and carries the
//! optional client-side host policy: default-route override and DNS
//! override, both fully reversible.
//!
//! # Platform Requirements
//!
//! - **Linux**: root or `CAP_NET_ADMIN`, `/dev/net/tun` present
//! - **macOS**: root; the system assigns `utunN` names

pub mod config;
pub mod device;
pub mod dns;
pub mod error;
pub mod io;
pub mod mock;
pub mod route;

pub use config::{TunConfig, TunConfigBuilder};
pub use device::{DeviceInfo, TunDevice};
pub use dns::DnsOverride;
pub use error::{Error, Result};
pub use io::TunIo;
pub use route::{Route, RouteManager, RoutePolicy};

/// Default MTU, leaving room for the outer transport overhead
pub const DEFAULT_MTU: u16 = 1400;

/// Largest IP packet a tunnel read must be able to hold
pub const MAX_PACKET_SIZE: usize = 65535;
