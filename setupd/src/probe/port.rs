//! Transient bind probes for TCP and UDP listeners.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

use crate::error::{Result, SetupError};

/// Checks whether a listener address can be bound right now
pub trait PortProbe: Send + Sync {
    fn check_tcp(&self, ip: &str, port: u16) -> Result<()>;
    fn check_udp(&self, ip: &str, port: u16) -> Result<()>;
}

/// Probes by binding a real socket and dropping it immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct OsPortProbe;

impl PortProbe for OsPortProbe {
    fn check_tcp(&self, ip: &str, port: u16) -> Result<()> {
        let addr = socket_addr("tcp", ip, port)?;
        TcpListener::bind(addr)
            .map(drop)
            .map_err(|e| bind_error("tcp", addr, e))
    }

    fn check_udp(&self, ip: &str, port: u16) -> Result<()> {
        let addr = socket_addr("udp", ip, port)?;
        UdpSocket::bind(addr)
            .map(drop)
            .map_err(|e| bind_error("udp", addr, e))
    }
}

/// An empty host means every IPv4 interface.
fn socket_addr(proto: &'static str, ip: &str, port: u16) -> Result<SocketAddr> {
    if ip.is_empty() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    ip.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .map_err(|e| SetupError::Bind {
            proto,
            addr: join_host_port(ip, port),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        })
}

fn bind_error(proto: &'static str, addr: SocketAddr, source: io::Error) -> SetupError {
    let addr = addr.to_string();
    if source.kind() == io::ErrorKind::AddrInUse {
        SetupError::PortInUse { proto, addr, source }
    } else {
        SetupError::Bind { proto, addr, source }
    }
}

/// An empty host and `0.0.0.0` name the same listener
pub fn listen_host(host: &str) -> &str {
    if host.is_empty() {
        "0.0.0.0"
    } else {
        host
    }
}

/// Formats host and port the way socket addresses print, bracketing IPv6 hosts
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
