//! Network interface enumeration via `ip -json address show`.

use std::net::IpAddr;
use std::process::Command;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shared::types::NetworkInterfaceInfo;

/// Source of interfaces the web and DNS listeners may bind to
pub trait InterfaceSource: Send + Sync {
    fn list(&self) -> Result<Vec<NetworkInterfaceInfo>>;

    /// Name of the interface that owns `ip`, if any
    fn interface_for_ip(&self, ip: &str) -> Option<String> {
        let interfaces = match self.list() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                tracing::warn!("Failed to list interfaces: {:#}", e);
                return None;
            }
        };

        interfaces
            .into_iter()
            .find(|iface| iface.ip_addresses.iter().any(|addr| addr == ip))
            .map(|iface| iface.name)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IpCommandInterfaces;

impl InterfaceSource for IpCommandInterfaces {
    fn list(&self) -> Result<Vec<NetworkInterfaceInfo>> {
        let output = Command::new("ip")
            .args(["-json", "address", "show"])
            .output()
            .context("Failed to run ip -json address show")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("ip -json address show failed: {}", stderr.trim());
        }

        parse_interfaces(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    mtu: u32,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Deserialize)]
struct IpAddrInfo {
    local: Option<String>,
}

/// Keep usable interfaces only: point-to-point links and link-local
/// addresses are dropped, as are interfaces left with no address.
fn parse_interfaces(json: &str) -> Result<Vec<NetworkInterfaceInfo>> {
    let links: Vec<IpLink> = serde_json::from_str(json).context("Failed to parse ip output")?;

    let interfaces = links
        .into_iter()
        .filter(|link| !link.flags.iter().any(|f| f == "POINTOPOINT"))
        .filter_map(|link| {
            let ip_addresses: Vec<String> = link
                .addr_info
                .iter()
                .filter_map(|info| info.local.as_deref())
                .filter_map(|local| local.parse::<IpAddr>().ok())
                .filter(|ip| !is_link_local(ip))
                .map(|ip| ip.to_string())
                .collect();

            if ip_addresses.is_empty() {
                return None;
            }

            Some(NetworkInterfaceInfo {
                name: link.ifname,
                mtu: link.mtu,
                hardware_address: link.address.unwrap_or_default(),
                flags: link.flags,
                ip_addresses,
            })
        })
        .collect();

    Ok(interfaces)
}

fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}
