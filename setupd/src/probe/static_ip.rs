//! Static address detection from the dhcpcd configuration.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Command;

use crate::error::{Result, SetupError};

/// Answers whether an interface keeps its address across DHCP renewals
pub trait StaticIpSource: Send + Sync {
    fn has_static_ip(&self, interface: &str) -> Result<bool>;

    /// Current IPv4 address of the interface in CIDR notation
    fn full_ip(&self, interface: &str) -> Option<String>;
}

/// Reads `static ip_address=` lines from a dhcpcd.conf file
pub struct DhcpcdStaticIp {
    path: PathBuf,
}

impl DhcpcdStaticIp {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StaticIpSource for DhcpcdStaticIp {
    fn has_static_ip(&self, interface: &str) -> Result<bool> {
        if cfg!(windows) {
            return Err(SetupError::PlatformUnsupported("Windows"));
        }

        let contents = std::fs::read_to_string(&self.path).map_err(|source| SetupError::Io {
            path: self.path.clone(),
            source,
        })?;

        Ok(parse_static_ip(&contents, interface))
    }

    fn full_ip(&self, interface: &str) -> Option<String> {
        if interface.is_empty() {
            return None;
        }

        let args = ["-oneline", "-family", "inet", "address", "show", interface];
        tracing::trace!("executing ip {:?}", args);
        let output = Command::new("ip").args(args).output().ok()?;
        if !output.status.success() {
            return None;
        }

        parse_full_ip(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Scan dhcpcd.conf for a `static ip_address=` line inside the block of `interface`.
fn parse_static_ip(contents: &str, interface: &str) -> bool {
    let name_line = format!("interface {}", interface);
    let mut in_block = false;

    for line in contents.lines() {
        let line = line.trim();

        // An empty line closes a block that never saw another "interface"
        if line.is_empty() {
            in_block = false;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        if !in_block {
            in_block = line == name_line;
        } else if line.starts_with("interface ") {
            in_block = false;
        } else if line.starts_with("static ip_address=") {
            return true;
        }
    }

    false
}

/// Format: "2: eth0    inet 192.168.1.5/24 brd 192.168.1.255 scope global ..."
fn parse_full_ip(output: &str) -> Option<String> {
    let cidr = output.split_whitespace().nth(3)?;
    is_cidr(cidr).then(|| cidr.to_string())
}

fn is_cidr(value: &str) -> bool {
    let Some((ip, prefix)) = value.split_once('/') else {
        return false;
    };
    let Ok(ip) = ip.parse::<IpAddr>() else {
        return false;
    };
    let max = if ip.is_ipv4() { 32 } else { 128 };
    // reject "+24", which u8 parsing would accept
    prefix.bytes().all(|b| b.is_ascii_digit())
        && prefix.parse::<u8>().is_ok_and(|p| p <= max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_interface_found() {
        let conf = "interface eth0\nstatic ip_address=192.168.1.1/24\n";
        assert!(parse_static_ip(conf, "eth0"));
        assert!(!parse_static_ip(conf, "eth1"));
    }

    #[test]
    fn test_blank_line_closes_block() {
        let conf = "interface eth0\n\nstatic ip_address=192.168.1.1/24\n";
        assert!(!parse_static_ip(conf, "eth0"));
    }

    #[test]
    fn test_next_interface_closes_block() {
        let conf = r#"# A sample configuration for dhcpcd.
hostname
persistent

interface wlan0
static routers=192.168.1.1
interface eth0
  # static for the wired port
  static ip_address=10.0.0.2/8
"#;
        assert!(!parse_static_ip(conf, "wlan0"));
        assert!(parse_static_ip(conf, "eth0"));
    }

    #[test]
    fn test_commented_assignment_ignored() {
        let conf = "interface eth0\n#static ip_address=192.168.1.1/24\n";
        assert!(!parse_static_ip(conf, "eth0"));
    }

    #[test]
    fn test_prefix_name_does_not_match() {
        let conf = "interface eth0.100\nstatic ip_address=192.168.1.1/24\n";
        assert!(!parse_static_ip(conf, "eth0"));
    }

    #[test]
    fn test_file_backed_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dhcpcd.conf");
        std::fs::write(&path, "interface eth0\nstatic ip_address=192.168.1.1/24\n").unwrap();

        let source = DhcpcdStaticIp::new(&path);
        assert!(source.has_static_ip("eth0").unwrap());
        assert!(!source.has_static_ip("eth1").unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = DhcpcdStaticIp::new(dir.path().join("missing.conf"));

        let err = source.has_static_ip("eth0").unwrap_err();
        assert!(matches!(err, SetupError::Io { .. }));
    }

    #[test]
    fn test_parse_full_ip() {
        let output = "2: eth0    inet 192.168.1.5/24 brd 192.168.1.255 scope global dynamic eth0\\       valid_lft 86071sec preferred_lft 86071sec\n";
        assert_eq!(parse_full_ip(output), Some("192.168.1.5/24".to_string()));

        assert_eq!(parse_full_ip("2: eth0 inet"), None);
        assert_eq!(parse_full_ip("2: eth0 inet 192.168.1.5"), None);
        assert_eq!(parse_full_ip("2: eth0 inet 192.168.1.5/33 brd"), None);
    }
}
