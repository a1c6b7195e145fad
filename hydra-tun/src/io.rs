//! Packet I/O abstraction over the tunnel interface
//!
//! The engine reads and writes whole IPv4 datagrams through this trait so
//! that the dataplane can run against a real TUN device or against
//! [`crate::mock::MemoryTun`] in tests.

use async_trait::async_trait;

use crate::error::Result;

/// One-datagram-at-a-time packet I/O on a tunnel interface
#[async_trait]
pub trait TunIo: Send + Sync {
    /// Receive one IP packet from the interface
    ///
    /// Blocks until a packet is available or the interface is closed.
    /// Cancel-safe: a cancelled read loses no data.
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Send one IP packet to the interface
    async fn send(&self, buf: &[u8]) -> Result<usize>;

    /// Interface name (e.g. "hydra0", "utun3")
    fn name(&self) -> &str;

    /// Maximum transmission unit
    fn mtu(&self) -> u16;
}
