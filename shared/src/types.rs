use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

/// A network interface as reported to the install wizard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceInfo {
    /// Interface name, e.g. "eth0"
    pub name: String,

    /// Link MTU
    pub mtu: u32,

    /// MAC address, empty for interfaces without one
    #[serde(default)]
    pub hardware_address: String,

    /// Link flags as reported by the kernel, e.g. ["BROADCAST", "UP"]
    #[serde(default)]
    pub flags: Vec<String>,

    /// Addresses bound to the interface, without prefix length
    pub ip_addresses: Vec<String>,
}

/// Response of `get_addresses`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirstRunData {
    pub web_port: u16,
    pub dns_port: u16,
    pub interfaces: BTreeMap<String, NetworkInterfaceInfo>,
}

/// One listener candidate in a `check_config` request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfigEntry {
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub autofix: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckConfigRequest {
    #[serde(default)]
    pub web: CheckConfigEntry,
    #[serde(default)]
    pub dns: CheckConfigEntry,
}

/// Outcome of probing one listener candidate.
/// An empty `status` means the candidate is free.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfigStatus {
    pub status: String,
    pub can_autofix: bool,
}

impl CheckConfigStatus {
    pub fn is_free(&self) -> bool {
        self.status.is_empty()
    }
}

/// Whether the interface behind the DNS address has a fixed address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaticIpMode {
    /// Not evaluated (DNS candidate skipped or unavailable)
    #[default]
    #[serde(rename = "")]
    Unknown,
    Yes,
    No,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIpReport {
    #[serde(rename = "static")]
    pub mode: StaticIpMode,

    /// Current address in CIDR notation, filled in when the address is dynamic
    #[serde(default)]
    pub ip: String,

    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfigResponse {
    pub web: CheckConfigStatus,
    pub dns: CheckConfigStatus,
    pub static_ip: StaticIpReport,
}

/// Listener address in a `configure` request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindEntry {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigureRequest {
    #[serde(default)]
    pub web: BindEntry,
    #[serde(default)]
    pub dns: BindEntry,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}
