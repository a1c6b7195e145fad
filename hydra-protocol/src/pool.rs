//! IP address pool for tunnel address allocation
//!
//! The server hands every client one address out of a fixed IPv4 subnet.
//! Host `.1` is reserved for the server's tunnel endpoint; the network and
//! broadcast addresses are never issued. Allocation scans forward from a
//! monotonic cursor so released addresses are not immediately reused (the
//! pool is cycle-biased toward fresh addresses).

use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::{Error, Result};

/// First host number handed to clients (`.1` belongs to the server)
const FIRST_HOST: u32 = 2;

/// IPv4 address pool
#[derive(Debug)]
pub struct Ipv4Pool {
    /// Network address (e.g. 10.8.0.0)
    network: Ipv4Addr,
    /// Prefix length in CIDR notation (e.g. 24)
    prefix_len: u8,
    /// Allocated host numbers
    used: HashSet<u32>,
    /// Next host number to try
    cursor: u32,
}

impl Ipv4Pool {
    /// Create a pool over `network/prefix_len`
    ///
    /// The subnet must be at least a /30 so that one client host number
    /// exists beyond the network, server, and broadcast addresses.
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 30 {
            return Err(Error::Pool(format!(
                "subnet /{} too small for client addresses (need at least /30)",
                prefix_len
            )));
        }

        let base = u32::from(network);
        let mask = !0u32 << (32 - prefix_len);
        if base & !mask != 0 {
            return Err(Error::Pool(format!(
                "{}/{} is not a network address",
                network, prefix_len
            )));
        }

        Ok(Self {
            network,
            prefix_len,
            used: HashSet::new(),
            cursor: FIRST_HOST,
        })
    }

    /// Create from CIDR notation (e.g. "10.8.0.0/24")
    pub fn from_cidr(cidr: &str) -> Result<Self> {
        let (addr, prefix) = cidr
            .split_once('/')
            .ok_or_else(|| Error::Pool(format!("invalid CIDR notation: {}", cidr)))?;

        let network: Ipv4Addr = addr
            .parse()
            .map_err(|_| Error::Pool(format!("invalid IPv4 address: {}", addr)))?;
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| Error::Pool(format!("invalid prefix length: {}", prefix)))?;

        Self::new(network, prefix_len)
    }

    /// Highest host number handed to clients (one below broadcast)
    fn last_host(&self) -> u32 {
        (1u32 << (32 - self.prefix_len)) - 2
    }

    /// Total number of assignable client addresses
    pub fn capacity(&self) -> u32 {
        self.last_host() - FIRST_HOST + 1
    }

    /// Number of currently unallocated addresses
    pub fn available(&self) -> u32 {
        self.capacity() - self.used.len() as u32
    }

    /// Number of allocated addresses
    pub fn allocated_count(&self) -> usize {
        self.used.len()
    }

    /// Whether every assignable address is in use
    pub fn is_exhausted(&self) -> bool {
        self.used.len() as u32 >= self.capacity()
    }

    /// The network address
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// The prefix length
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// The server's reserved tunnel address (host `.1`)
    pub fn server_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) + 1)
    }

    /// Allocate the next free address
    ///
    /// Scans forward from the cursor through host numbers, wrapping once.
    /// Every address returned is unused at the time of the call; otherwise
    /// the pool is exhausted.
    pub fn allocate(&mut self) -> Result<Ipv4Addr> {
        let span = self.capacity();
        if self.used.len() as u32 >= span {
            return Err(Error::PoolExhausted);
        }

        for i in 0..span {
            let host = FIRST_HOST + (self.cursor - FIRST_HOST + i) % span;
            if !self.used.contains(&host) {
                self.used.insert(host);
                self.cursor = if host >= self.last_host() {
                    FIRST_HOST
                } else {
                    host + 1
                };
                return Ok(Ipv4Addr::from(u32::from(self.network) + host));
            }
        }

        Err(Error::PoolExhausted)
    }

    /// Return an address to the pool
    ///
    /// Does not rewind the cursor. Returns `false` if the address was not
    /// allocated from this pool.
    pub fn release(&mut self, addr: Ipv4Addr) -> bool {
        let offset = u32::from(addr).wrapping_sub(u32::from(self.network));
        if !(FIRST_HOST..=self.last_host()).contains(&offset) {
            return false;
        }
        self.used.remove(&offset)
    }

    /// Whether an address is currently allocated
    pub fn is_allocated(&self, addr: Ipv4Addr) -> bool {
        let offset = u32::from(addr).wrapping_sub(u32::from(self.network));
        self.used.contains(&offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation() {
        let pool = Ipv4Pool::new(Ipv4Addr::new(10, 8, 0, 0), 24).unwrap();
        assert_eq!(pool.network(), Ipv4Addr::new(10, 8, 0, 0));
        assert_eq!(pool.prefix_len(), 24);
        assert_eq!(pool.server_addr(), Ipv4Addr::new(10, 8, 0, 1));
        // /24: hosts .2 through .254
        assert_eq!(pool.capacity(), 253);
        assert_eq!(pool.available(), 253);
    }

    #[test]
    fn test_from_cidr() {
        let pool = Ipv4Pool::from_cidr("10.8.0.0/24").unwrap();
        assert_eq!(pool.network(), Ipv4Addr::new(10, 8, 0, 0));

        assert!(Ipv4Pool::from_cidr("10.8.0.0").is_err());
        assert!(Ipv4Pool::from_cidr("not-an-ip/24").is_err());
        assert!(Ipv4Pool::from_cidr("10.8.0.0/abc").is_err());
    }

    #[test]
    fn test_rejects_non_network_address() {
        assert!(Ipv4Pool::new(Ipv4Addr::new(10, 8, 0, 1), 24).is_err());
    }

    #[test]
    fn test_rejects_tiny_subnets() {
        assert!(Ipv4Pool::new(Ipv4Addr::new(10, 8, 0, 0), 31).is_err());
        assert!(Ipv4Pool::new(Ipv4Addr::new(10, 8, 0, 0), 32).is_err());
    }

    #[test]
    fn test_sequential_allocation() {
        let mut pool = Ipv4Pool::from_cidr("10.8.0.0/24").unwrap();
        assert_eq!(pool.allocate().unwrap(), Ipv4Addr::new(10, 8, 0, 2));
        assert_eq!(pool.allocate().unwrap(), Ipv4Addr::new(10, 8, 0, 3));
        assert_eq!(pool.allocate().unwrap(), Ipv4Addr::new(10, 8, 0, 4));
        assert_eq!(pool.allocated_count(), 3);
        assert_eq!(pool.available(), 250);
    }

    #[test]
    fn test_exhaustion_after_253_allocations() {
        let mut pool = Ipv4Pool::from_cidr("10.8.0.0/24").unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..253 {
            let addr = pool.allocate().unwrap();
            assert!(seen.insert(addr), "address {} issued twice", addr);
        }

        assert!(pool.is_exhausted());
        assert!(matches!(pool.allocate().unwrap_err(), Error::PoolExhausted));

        // Network, server, and broadcast addresses were never issued
        assert!(!seen.contains(&Ipv4Addr::new(10, 8, 0, 0)));
        assert!(!seen.contains(&Ipv4Addr::new(10, 8, 0, 1)));
        assert!(!seen.contains(&Ipv4Addr::new(10, 8, 0, 255)));
    }

    #[test]
    fn test_release_makes_address_allocatable() {
        let mut pool = Ipv4Pool::from_cidr("10.8.0.0/30").unwrap();
        assert_eq!(pool.capacity(), 1);

        let addr = pool.allocate().unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 8, 0, 2));
        assert!(pool.is_exhausted());

        assert!(pool.release(addr));
        assert!(!pool.is_exhausted());
        assert_eq!(pool.allocate().unwrap(), addr);
    }

    #[test]
    fn test_cursor_does_not_rewind_on_release() {
        let mut pool = Ipv4Pool::from_cidr("10.8.0.0/24").unwrap();

        let first = pool.allocate().unwrap(); // .2
        let _second = pool.allocate().unwrap(); // .3
        assert!(pool.release(first));

        // The cursor keeps moving forward; .2 is only reissued after a wrap
        assert_eq!(pool.allocate().unwrap(), Ipv4Addr::new(10, 8, 0, 4));
    }

    #[test]
    fn test_cursor_wraps() {
        let mut pool = Ipv4Pool::from_cidr("10.8.0.0/29").unwrap();
        // /29: hosts .2 through .6
        assert_eq!(pool.capacity(), 5);

        let mut addrs = Vec::new();
        for _ in 0..5 {
            addrs.push(pool.allocate().unwrap());
        }
        assert!(pool.is_exhausted());

        pool.release(addrs[0]);
        pool.release(addrs[1]);

        // Cursor wrapped past .6 back to the start of the range
        assert_eq!(pool.allocate().unwrap(), addrs[0]);
        assert_eq!(pool.allocate().unwrap(), addrs[1]);
    }

    #[test]
    fn test_release_foreign_address() {
        let mut pool = Ipv4Pool::from_cidr("10.8.0.0/24").unwrap();
        assert!(!pool.release(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(!pool.release(Ipv4Addr::new(10, 8, 0, 1))); // server address
        assert!(!pool.release(Ipv4Addr::new(10, 8, 0, 2))); // never allocated
    }

    #[test]
    fn test_is_allocated() {
        let mut pool = Ipv4Pool::from_cidr("10.8.0.0/24").unwrap();
        let addr = pool.allocate().unwrap();
        assert!(pool.is_allocated(addr));
        pool.release(addr);
        assert!(!pool.is_allocated(addr));
    }
}
