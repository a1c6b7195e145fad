//! TUN device wrapper
//!
//! A thin layer over `tun-rs`, which handles the platform-specific parts of
//! interface creation: address assignment, MTU, bringing the interface up,
//! and the point-to-point route on macOS/BSD.

use std::net::Ipv4Addr;

use async_trait::async_trait;

#[cfg(unix)]
use std::os::unix::io::RawFd;

use crate::config::TunConfig;
use crate::error::{Error, Result};
use crate::io::TunIo;

/// Information about an open TUN device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Interface name
    pub name: String,
    /// MTU
    pub mtu: u16,
    /// Local tunnel address
    pub address: Ipv4Addr,
}

/// An open TUN device
pub struct TunDevice {
    inner: tun_rs::AsyncDevice,
    info: DeviceInfo,
}

impl TunDevice {
    /// Create and configure a new TUN device
    ///
    /// Requires root (or `CAP_NET_ADMIN` on Linux) and a usable
    /// `/dev/net/tun`.
    pub async fn create(config: TunConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = tun_rs::DeviceBuilder::new();

        if let Some(ref name) = config.name {
            builder = builder.name(name);
        }

        builder = builder
            .ipv4(config.address, config.prefix_len, config.destination)
            .mtu(config.mtu);

        let device = builder
            .build_async()
            .map_err(|e| Error::DeviceCreation(e.to_string()))?;

        let name = device
            .name()
            .map_err(|e| Error::DeviceCreation(e.to_string()))?;

        tracing::info!(
            name = %name,
            address = %config.address,
            mtu = config.mtu,
            "created TUN device"
        );

        Ok(Self {
            inner: device,
            info: DeviceInfo {
                name,
                mtu: config.mtu,
                address: config.address,
            },
        })
    }

    /// Wrap an externally configured tunnel file descriptor
    ///
    /// Used when the launcher (or a platform tunnel framework) already
    /// created and configured the interface and hands the core a ready
    /// descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open TUN file descriptor that stays valid for
    /// the lifetime of the device and is not closed elsewhere.
    #[cfg(unix)]
    pub unsafe fn from_fd(
        fd: RawFd,
        name: impl Into<String>,
        mtu: u16,
        address: Ipv4Addr,
    ) -> Result<Self> {
        let device = tun_rs::AsyncDevice::from_fd(fd)
            .map_err(|e| Error::DeviceCreation(format!("failed to wrap fd: {}", e)))?;

        let name = name.into();
        tracing::info!(fd, name = %name, mtu, "wrapped TUN device from fd");

        Ok(Self {
            inner: device,
            info: DeviceInfo { name, mtu, address },
        })
    }

    /// Device information
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Local tunnel address
    pub fn address(&self) -> Ipv4Addr {
        self.info.address
    }
}

#[async_trait]
impl TunIo for TunDevice {
    async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.inner.recv(buf).await.map_err(Error::Io)
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        self.inner.send(buf).await.map_err(Error::Io)
    }

    fn name(&self) -> &str {
        &self.info.name
    }

    fn mtu(&self) -> u16 {
        self.info.mtu
    }
}

impl std::fmt::Debug for TunDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunDevice").field("info", &self.info).finish()
    }
}
