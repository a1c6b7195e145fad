//! In-memory tunnel interface for tests
//!
//! Simulates a TUN device with two queues: packets injected by the test are
//! what the OS "sends into the tunnel" (drained by [`TunIo::recv`]), and
//! packets the VPN writes back come out of [`MemoryTun::outbound`].

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::io::TunIo;

/// Channel-backed mock tunnel interface
pub struct MemoryTun {
    name: String,
    mtu: u16,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryTun {
    pub fn new(name: impl Into<String>, mtu: u16) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            mtu,
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
        }
    }

    /// Queue a packet as if the OS routed it into the tunnel
    pub fn inject(&self, packet: Vec<u8>) {
        let _ = self.inbound_tx.send(packet);
    }

    /// Await the next packet the VPN wrote to the interface
    pub async fn outbound(&self) -> Option<Vec<u8>> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Non-blocking drain of everything written so far
    pub async fn drain_outbound(&self) -> Vec<Vec<u8>> {
        let mut rx = self.outbound_rx.lock().await;
        let mut out = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            out.push(packet);
        }
        out
    }
}

#[async_trait]
impl TunIo for MemoryTun {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        let packet = self
            .inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::Io(std::io::Error::other("tun closed")))?;

        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        Ok(n)
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.outbound_tx
            .send(buf.to_vec())
            .map_err(|_| Error::Io(std::io::Error::other("tun closed")))?;
        Ok(buf.len())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}

/// Build a minimal IPv4 datagram: 20-byte header, no options, zero checksum
///
/// Enough for dataplane tests, which only ever look at the destination
/// address bytes.
pub fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
    let total_len = 20 + payload.len();
    let mut packet = Vec::with_capacity(total_len);

    packet.push(0x45); // version 4, IHL 5
    packet.push(0); // DSCP/ECN
    packet.extend_from_slice(&(total_len as u16).to_be_bytes());
    packet.extend_from_slice(&[0, 0, 0, 0]); // id, flags, fragment offset
    packet.push(64); // TTL
    packet.push(0xFD); // protocol: reserved for experimentation
    packet.extend_from_slice(&[0, 0]); // checksum (unverified by the mock)
    packet.extend_from_slice(&src.octets());
    packet.extend_from_slice(&dst.octets());
    packet.extend_from_slice(payload);

    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inject_and_recv() {
        let tun = MemoryTun::new("mock0", 1400);
        tun.inject(vec![1, 2, 3]);

        let mut buf = [0u8; 16];
        let n = tun.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_send_and_outbound() {
        let tun = MemoryTun::new("mock0", 1400);
        tun.send(&[9, 8, 7]).await.unwrap();

        assert_eq!(tun.outbound().await.unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_ipv4_packet_layout() {
        let packet = ipv4_packet(
            Ipv4Addr::new(10, 8, 0, 2),
            Ipv4Addr::new(10, 8, 0, 1),
            &[0xAA, 0xBB],
        );

        assert_eq!(packet.len(), 22);
        assert_eq!(packet[0], 0x45);
        assert_eq!(&packet[12..16], &[10, 8, 0, 2]);
        assert_eq!(&packet[16..20], &[10, 8, 0, 1]);
        assert_eq!(&packet[20..], &[0xAA, 0xBB]);
    }
}
