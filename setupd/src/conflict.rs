//! Classifies proposed listener addresses as free, blocked or autofixable.

use std::sync::Arc;

use shared::types::{
    CheckConfigEntry, CheckConfigRequest, CheckConfigResponse, CheckConfigStatus, StaticIpMode,
    StaticIpReport,
};

use crate::error::Result;
use crate::probe::interfaces::InterfaceSource;
use crate::probe::port::PortProbe;
use crate::probe::static_ip::StaticIpSource;
use crate::probe::stub_listener::StubListenerControl;

/// Progress of the stub-listener remediation within one request.
/// The only transitions are `NotOffered -> Offered -> Consumed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Autofix {
    NotOffered,
    Offered,
    Consumed,
}

impl Autofix {
    pub fn can_autofix(self) -> bool {
        self == Autofix::Offered
    }
}

/// OS-facing capabilities shared by the resolver and the controller
#[derive(Clone)]
pub struct Probes {
    pub ports: Arc<dyn PortProbe>,
    pub stub_listener: Arc<dyn StubListenerControl>,
    pub static_ip: Arc<dyn StaticIpSource>,
    pub interfaces: Arc<dyn InterfaceSource>,
}

pub struct ConflictResolver {
    probes: Probes,
}

impl ConflictResolver {
    pub fn new(probes: Probes) -> Self {
        Self { probes }
    }

    /// Probe both candidates. `current_web_port` is the port the web
    /// listener already holds, which would otherwise always read as taken.
    pub fn check(&self, request: &CheckConfigRequest, current_web_port: u16) -> CheckConfigResponse {
        let mut response = CheckConfigResponse::default();

        let web = &request.web;
        if web.port != 0 && web.port != current_web_port {
            if let Err(e) = self.probes.ports.check_tcp(&web.ip, web.port) {
                response.web.status = e.to_string();
            }
        }

        if request.dns.port != 0 {
            let (dns, dns_result) = self.check_dns(&request.dns);
            response.dns = dns;
            if dns_result.is_ok() {
                response.static_ip = self.static_ip_report(&request.dns.ip);
            }
        }

        response
    }

    fn check_dns(&self, dns: &CheckConfigEntry) -> (CheckConfigStatus, Result<()>) {
        let ports = &self.probes.ports;
        let mut autofix = Autofix::NotOffered;
        let mut result = ports.check_udp(&dns.ip, dns.port);

        if result.as_ref().is_err_and(|e| e.is_addr_in_use()) && self.probes.stub_listener.is_active() {
            autofix = Autofix::Offered;
        }

        if autofix == Autofix::Offered && dns.autofix {
            tracing::info!("Disabling DNSStubListener to free {}", dns.port);
            if let Err(e) = self.probes.stub_listener.disable() {
                tracing::error!("Couldn't disable DNSStubListener: {}", e);
            }
            result = ports.check_udp(&dns.ip, dns.port);
            autofix = Autofix::Consumed;
        }

        if result.is_ok() {
            result = ports.check_tcp(&dns.ip, dns.port);
        }

        let status = CheckConfigStatus {
            status: result.as_ref().err().map(ToString::to_string).unwrap_or_default(),
            can_autofix: autofix.can_autofix(),
        };
        (status, result)
    }

    fn static_ip_report(&self, dns_ip: &str) -> StaticIpReport {
        let interface = self.probes.interfaces.interface_for_ip(dns_ip).unwrap_or_default();

        match self.probes.static_ip.has_static_ip(&interface) {
            Ok(true) => StaticIpReport {
                mode: StaticIpMode::Yes,
                ..Default::default()
            },
            Ok(false) => StaticIpReport {
                mode: StaticIpMode::No,
                ip: self.probes.static_ip.full_ip(&interface).unwrap_or_default(),
                ..Default::default()
            },
            Err(e) => StaticIpReport {
                mode: StaticIpMode::Error,
                error: e.to_string(),
                ..Default::default()
            },
        }
    }
}
