//! Route management and the client's default-route policy
//!
//! Route manipulation goes through the `net-route` crate. The optional
//! "route everything through the VPN" policy pins a host route to the real
//! server address via the pre-existing gateway, then overrides the default
//! route with the two half-space routes `0.0.0.0/1` and `128.0.0.0/1` via
//! the tunnel peer. Overriding instead of replacing means restoration is a
//! plain deletion and the host's own default route is never touched.

#[cfg(unix)]
use std::ffi::CString;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::{IpNet, Ipv4Net};

use crate::error::{Error, Result};

/// Convert an interface name to its index
#[cfg(unix)]
fn interface_index(name: &str) -> Result<u32> {
    let c_name =
        CString::new(name).map_err(|_| Error::Config("invalid interface name".into()))?;

    // SAFETY: if_nametoindex is safe to call with a valid C string
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };

    if index == 0 {
        return Err(Error::Route(format!("interface '{}' not found", name)));
    }

    Ok(index)
}

#[cfg(not(unix))]
fn interface_index(name: &str) -> Result<u32> {
    Err(Error::NotSupported(format!(
        "interface routing by name not supported on this platform: {}",
        name
    )))
}

/// A network route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination network
    pub destination: IpNet,
    /// Gateway address (None for direct/interface routes)
    pub gateway: Option<IpAddr>,
    /// Interface name
    pub interface: Option<String>,
}

impl Route {
    /// Create a new IPv4 route
    pub fn ipv4(dest: Ipv4Addr, prefix_len: u8, gateway: Option<Ipv4Addr>) -> Result<Self> {
        let destination =
            Ipv4Net::new(dest, prefix_len).map_err(|e| Error::InvalidPrefix(e.to_string()))?;

        Ok(Self {
            destination: IpNet::V4(destination),
            gateway: gateway.map(IpAddr::V4),
            interface: None,
        })
    }

    /// Create a host route (/32) via a gateway
    pub fn host_via(dest: Ipv4Addr, gateway: Ipv4Addr) -> Self {
        Self::ipv4(dest, 32, Some(gateway)).unwrap()
    }

    /// Set the interface for this route
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.destination)?;
        if let Some(ref gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        if let Some(ref iface) = self.interface {
            write!(f, " dev {}", iface)?;
        }
        Ok(())
    }
}

/// Route manager for adding/removing routes
///
/// Requires root (Linux: or `CAP_NET_ADMIN`).
pub struct RouteManager {
    handle: net_route::Handle,
}

impl RouteManager {
    pub fn new() -> Result<Self> {
        let handle = net_route::Handle::new()
            .map_err(|e| Error::Route(format!("failed to create route handle: {}", e)))?;
        Ok(Self { handle })
    }

    /// The gateway of the host's current default route, if any
    pub async fn default_gateway(&self) -> Result<Option<IpAddr>> {
        let route = self
            .handle
            .default_route()
            .await
            .map_err(|e| Error::Route(format!("failed to query default route: {}", e)))?;
        Ok(route.and_then(|r| r.gateway))
    }

    /// Add a route to the routing table
    pub async fn add(&self, route: &Route) -> Result<()> {
        let net_route = self.to_net_route(route)?;

        match self.handle.add(&net_route).await {
            Ok(()) => {
                tracing::info!(route = %route, "added route");
                Ok(())
            }
            Err(e) => {
                let err_str = e.to_string();
                // EEXIST: the route is already present, which is fine
                if err_str.contains("File exists") || err_str.contains("os error 17") {
                    tracing::debug!(route = %route, "route already exists");
                    Ok(())
                } else {
                    Err(Error::Route(format!("failed to add route: {}", e)))
                }
            }
        }
    }

    /// Remove a route from the routing table
    pub async fn delete(&self, route: &Route) -> Result<()> {
        let net_route = self.to_net_route(route)?;
        self.handle
            .delete(&net_route)
            .await
            .map_err(|e| Error::Route(format!("failed to delete route: {}", e)))?;
        tracing::info!(route = %route, "deleted route");
        Ok(())
    }

    fn to_net_route(&self, route: &Route) -> Result<net_route::Route> {
        let mut net_route =
            net_route::Route::new(route.destination.addr(), route.destination.prefix_len());

        if let Some(gw) = route.gateway {
            net_route = net_route.with_gateway(gw);
        }

        if let Some(ref iface) = route.interface {
            net_route = net_route.with_ifindex(interface_index(iface)?);
        }

        Ok(net_route)
    }
}

/// The client's optional all-traffic routing policy
///
/// Tracks every route it adds so [`RoutePolicy::restore`] can undo the lot
/// in reverse order.
pub struct RoutePolicy {
    manager: RouteManager,
    added: Vec<Route>,
}

impl RoutePolicy {
    pub fn new() -> Result<Self> {
        Ok(Self {
            manager: RouteManager::new()?,
            added: Vec::new(),
        })
    }

    /// Route all host traffic through the tunnel
    ///
    /// `server_ip` is the real (outer) address of the VPN server,
    /// `tun_gateway` the tunnel peer address, `tun_name` the interface.
    pub async fn route_all(
        &mut self,
        server_ip: IpAddr,
        tun_gateway: Ipv4Addr,
        tun_name: &str,
    ) -> Result<()> {
        // Keep the outer connection reachable: host route to the server
        // via whatever gateway was in place before the override.
        match self.manager.default_gateway().await? {
            Some(IpAddr::V4(prior_gw)) => {
                if let IpAddr::V4(server_v4) = server_ip {
                    let pin = Route::host_via(server_v4, prior_gw);
                    self.manager.add(&pin).await?;
                    self.added.push(pin);
                }
            }
            Some(IpAddr::V6(_)) | None => {
                tracing::warn!(
                    "no IPv4 default gateway found; server route not pinned, \
                     outer traffic may loop through the tunnel"
                );
            }
        }

        // Two half-space routes outrank the default route without
        // replacing it.
        for half in [Ipv4Addr::new(0, 0, 0, 0), Ipv4Addr::new(128, 0, 0, 0)] {
            let route = Route::ipv4(half, 1, Some(tun_gateway))?.with_interface(tun_name);
            self.manager.add(&route).await?;
            self.added.push(route);
        }

        Ok(())
    }

    /// Undo every route added by this policy
    pub async fn restore(&mut self) {
        for route in self.added.drain(..).rev() {
            if let Err(e) = self.manager.delete(&route).await {
                tracing::warn!(route = %route, error = %e, "failed to remove route");
            }
        }
    }
}
