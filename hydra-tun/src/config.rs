//! TUN device configuration

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::DEFAULT_MTU;

/// Configuration for creating a TUN device
///
/// HydraVPN tunnels are IPv4 point-to-point: the local address is the
/// peer's pool assignment (or the server's `.1`), the destination is the
/// other end of the tunnel.
#[derive(Debug, Clone)]
pub struct TunConfig {
    /// Interface name (auto-assigned by the OS if not specified)
    pub name: Option<String>,
    /// Local tunnel address
    pub address: Ipv4Addr,
    /// Network prefix length (e.g. 24 for /24)
    pub prefix_len: u8,
    /// Peer address for the point-to-point link
    pub destination: Option<Ipv4Addr>,
    /// Maximum transmission unit
    pub mtu: u16,
}

impl TunConfig {
    /// Create a new configuration builder
    pub fn builder() -> TunConfigBuilder {
        TunConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.prefix_len > 32 {
            return Err(Error::InvalidPrefix(format!(
                "prefix length {} is invalid (max 32)",
                self.prefix_len
            )));
        }

        if self.mtu < 576 {
            return Err(Error::Config(format!(
                "MTU {} is too small (minimum 576)",
                self.mtu
            )));
        }

        Ok(())
    }
}

/// Builder for [`TunConfig`]
#[derive(Debug)]
pub struct TunConfigBuilder {
    name: Option<String>,
    address: Ipv4Addr,
    prefix_len: u8,
    destination: Option<Ipv4Addr>,
    mtu: u16,
}

impl Default for TunConfigBuilder {
    fn default() -> Self {
        Self {
            name: None,
            address: Ipv4Addr::UNSPECIFIED,
            prefix_len: 24,
            destination: None,
            mtu: DEFAULT_MTU,
        }
    }
}

impl TunConfigBuilder {
    /// Set the interface name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the local IPv4 address and prefix length
    pub fn ipv4(mut self, address: Ipv4Addr, prefix_len: u8) -> Self {
        self.address = address;
        self.prefix_len = prefix_len;
        self
    }

    /// Set the point-to-point destination address
    pub fn destination(mut self, dest: Ipv4Addr) -> Self {
        self.destination = Some(dest);
        self
    }

    /// Set the MTU
    pub fn mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<TunConfig> {
        if self.address == Ipv4Addr::UNSPECIFIED {
            return Err(Error::Config("tunnel address must be set".into()));
        }

        let config = TunConfig {
            name: self.name,
            address: self.address,
            prefix_len: self.prefix_len,
            destination: self.destination,
            mtu: self.mtu,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = TunConfig::builder()
            .name("hydra0")
            .ipv4(Ipv4Addr::new(10, 8, 0, 2), 24)
            .destination(Ipv4Addr::new(10, 8, 0, 1))
            .mtu(1400)
            .build()
            .unwrap();

        assert_eq!(config.name.as_deref(), Some("hydra0"));
        assert_eq!(config.address, Ipv4Addr::new(10, 8, 0, 2));
        assert_eq!(config.prefix_len, 24);
        assert_eq!(config.destination, Some(Ipv4Addr::new(10, 8, 0, 1)));
        assert_eq!(config.mtu, 1400);
    }

    #[test]
    fn test_missing_address() {
        assert!(TunConfig::builder().name("hydra0").build().is_err());
    }

    #[test]
    fn test_invalid_prefix() {
        let result = TunConfig::builder()
            .ipv4(Ipv4Addr::new(10, 8, 0, 2), 33)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_tiny_mtu_rejected() {
        let result = TunConfig::builder()
            .ipv4(Ipv4Addr::new(10, 8, 0, 2), 24)
            .mtu(100)
            .build();
        assert!(result.is_err());
    }
}
