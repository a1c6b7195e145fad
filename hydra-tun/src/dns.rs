//! DNS override policy (client-side, optional)
//!
//! While the tunnel carries all traffic, the host's configured resolvers
//! may sit on the local network and become unreachable. The override points
//! the system at public resolvers and restores the previous configuration
//! on close. Linux uses `resolvectl` scoped to the tunnel interface (which
//! systemd-resolved drops automatically when the interface goes away);
//! macOS rewrites the active network service's resolver list and must put
//! it back explicitly.

use tokio::process::Command;

use crate::error::{Error, Result};

/// Public resolvers installed by the override (Cloudflare, Google)
pub const OVERRIDE_DNS_SERVERS: [&str; 2] = ["1.1.1.1", "8.8.8.8"];

/// Tracks what the override changed so it can be undone
#[derive(Debug, Default)]
pub struct DnsOverride {
    /// macOS network service whose resolvers were replaced
    #[cfg(target_os = "macos")]
    network_service: Option<String>,
    /// Previous resolver list on that service
    #[cfg(target_os = "macos")]
    original_dns: Option<String>,
    applied: bool,
}

impl DnsOverride {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the system at the public resolvers
    #[cfg(target_os = "linux")]
    pub async fn apply(&mut self, tun_name: &str) -> Result<()> {
        let output = Command::new("resolvectl")
            .arg("dns")
            .arg(tun_name)
            .args(OVERRIDE_DNS_SERVERS)
            .output()
            .await
            .map_err(|e| Error::Dns(format!("failed to run resolvectl: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Dns(format!(
                "resolvectl failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        self.applied = true;
        tracing::info!(interface = tun_name, "DNS override applied");
        Ok(())
    }

    /// Restore the previous resolver configuration
    #[cfg(target_os = "linux")]
    pub async fn restore(&mut self) {
        // Interface-scoped resolvers vanish with the interface; nothing to
        // undo beyond marking the override gone.
        self.applied = false;
    }

    #[cfg(target_os = "macos")]
    pub async fn apply(&mut self, _tun_name: &str) -> Result<()> {
        let service = active_network_service().await;

        let current = Command::new("networksetup")
            .args(["-getdnsservers", &service])
            .output()
            .await
            .map_err(|e| Error::Dns(format!("failed to run networksetup: {}", e)))?;
        self.original_dns = Some(String::from_utf8_lossy(&current.stdout).trim().to_string());

        let output = Command::new("networksetup")
            .args(["-setdnsservers", &service])
            .args(OVERRIDE_DNS_SERVERS)
            .output()
            .await
            .map_err(|e| Error::Dns(format!("failed to run networksetup: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Dns(format!(
                "networksetup failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        self.network_service = Some(service);
        self.applied = true;
        tracing::info!("DNS override applied");
        Ok(())
    }

    #[cfg(target_os = "macos")]
    pub async fn restore(&mut self) {
        let Some(service) = self.network_service.take() else {
            return;
        };

        let mut cmd = Command::new("networksetup");
        cmd.args(["-setdnsservers", &service]);

        match self.original_dns.take() {
            Some(original)
                if !original.is_empty() && !original.contains("There aren't any") =>
            {
                cmd.args(original.split_whitespace());
            }
            // No previous static resolvers: hand control back to DHCP
            _ => {
                cmd.arg("Empty");
            }
        }

        if let Err(e) = cmd.output().await {
            tracing::warn!(error = %e, "failed to restore DNS configuration");
        } else {
            tracing::info!("DNS configuration restored");
        }
        self.applied = false;
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    pub async fn apply(&mut self, _tun_name: &str) -> Result<()> {
        Err(Error::NotSupported("DNS override".into()))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    pub async fn restore(&mut self) {}

    /// Whether the override is currently in effect
    pub fn is_applied(&self) -> bool {
        self.applied
    }
}

/// Find the network service that owns the default route (macOS)
#[cfg(target_os = "macos")]
async fn active_network_service() -> String {
    let fallback = "Wi-Fi".to_string();

    let Ok(route) = Command::new("route").args(["-n", "get", "default"]).output().await else {
        return fallback;
    };

    let stdout = String::from_utf8_lossy(&route.stdout);
    let Some(iface) = stdout
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("interface:").map(|i| i.trim().to_string()))
    else {
        return fallback;
    };

    let Ok(ports) = Command::new("networksetup")
        .arg("-listallhardwareports")
        .output()
        .await
    else {
        return fallback;
    };

    let stdout = String::from_utf8_lossy(&ports.stdout);
    let mut current_service = None;
    for line in stdout.lines() {
        if let Some(port) = line.strip_prefix("Hardware Port: ") {
            current_service = Some(port.to_string());
        } else if let Some(device) = line.strip_prefix("Device: ") {
            if device.trim() == iface {
                return current_service.unwrap_or(fallback);
            }
        }
    }

    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unapplied() {
        let dns = DnsOverride::new();
        assert!(!dns.is_applied());
    }
}
