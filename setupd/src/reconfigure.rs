//! Apply a new web + DNS listener configuration to the running service.
//!
//! Every failure either happens before the live record is touched or is
//! followed by a full rollback, so the service is never left running on a
//! configuration that is half applied, unstarted or unpersisted.

use std::sync::Arc;

use shared::types::ConfigureRequest;

use crate::auth::CredentialStore;
use crate::config::{Config, ConfigStore, InstallSettings, SharedConfig};
use crate::error::{Result, SetupError};
use crate::probe::port::{join_host_port, listen_host, PortProbe};
use crate::runtime::dns::DnsLifecycle;
use crate::runtime::http::HttpRestart;

/// A successfully applied configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub restart_http: bool,
}

pub struct Reconfigurer {
    config: SharedConfig,
    ports: Arc<dyn PortProbe>,
    dns: Arc<dyn DnsLifecycle>,
    http: Arc<dyn HttpRestart>,
    users: Arc<dyn CredentialStore>,
    store: Arc<dyn ConfigStore>,
}

impl Reconfigurer {
    pub fn new(
        config: SharedConfig,
        ports: Arc<dyn PortProbe>,
        dns: Arc<dyn DnsLifecycle>,
        http: Arc<dyn HttpRestart>,
        users: Arc<dyn CredentialStore>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            config,
            ports,
            dns,
            http,
            users,
            store,
        }
    }

    /// Validate, apply, start and persist `request`.
    ///
    /// The live record stays locked for the whole call; concurrent calls run
    /// one after another.
    pub fn configure(&self, request: &ConfigureRequest) -> Result<Applied> {
        validate(request)?;

        let mut config = self.config.lock();

        let restart_http = listen_host(&config.web.bind_host) != listen_host(&request.web.ip)
            || config.web.bind_port != request.web.port;

        if restart_http {
            self.ports
                .check_tcp(&request.web.ip, request.web.port)
                .map_err(|e| {
                    SetupError::InvalidInput(format!(
                        "Impossible to listen on IP:port {} due to {}",
                        join_host_port(&request.web.ip, request.web.port),
                        e
                    ))
                })?;
        }

        self.ports.check_udp(&request.dns.ip, request.dns.port)?;
        self.ports.check_tcp(&request.dns.ip, request.dns.port)?;

        let saved = config.install_settings();

        config.setup_incomplete = false;
        config.apply_install_settings(&InstallSettings {
            web_host: request.web.ip.clone(),
            web_port: request.web.port,
            dns_host: request.dns.ip.clone(),
            dns_port: request.dns.port,
        });

        let started = self.dns.reinit(&config.dns).and_then(|()| self.dns.start());
        if let Err(e) = started {
            rollback(&mut config, &saved);
            return Err(SetupError::DnsStart(format!("{:#}", e)));
        }

        if let Err(e) = self.users.add_user(&request.username, &request.password) {
            self.dns.stop();
            rollback(&mut config, &saved);
            return Err(SetupError::Credentials(format!("{:#}", e)));
        }

        if let Err(e) = self.store.write(&config) {
            self.dns.stop();
            rollback(&mut config, &saved);
            return Err(SetupError::Persistence(format!("{:#}", e)));
        }

        tracing::info!(
            web = %join_host_port(&config.web.bind_host, config.web.bind_port),
            dns = %join_host_port(&config.dns.bind_host, config.dns.port),
            "Applied new listener configuration"
        );
        self.config.publish(&config);
        drop(config);

        if restart_http {
            self.http.restart();
        }

        Ok(Applied { restart_http })
    }
}

fn validate(request: &ConfigureRequest) -> Result<()> {
    if request.web.port == 0 || request.dns.port == 0 {
        return Err(SetupError::InvalidInput("port value can't be 0".to_string()));
    }
    if request.username.is_empty() || request.password.is_empty() {
        return Err(SetupError::InvalidInput(
            "username and password can't be empty".to_string(),
        ));
    }
    Ok(())
}

fn rollback(config: &mut Config, saved: &InstallSettings) {
    tracing::warn!("Rolling back listener configuration");
    config.setup_incomplete = true;
    config.apply_install_settings(saved);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use shared::types::BindEntry;
    use crate::conflict::tests::FakePorts;
    use crate::config::DnsConfig;

    #[derive(Default)]
    struct FakeDns {
        fail_start: bool,
        events: Mutex<Vec<String>>,
    }

    impl FakeDns {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl DnsLifecycle for FakeDns {
        fn reinit(&self, config: &DnsConfig) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(format!("reinit {}:{}", config.bind_host, config.port));
            Ok(())
        }

        fn start(&self) -> anyhow::Result<()> {
            self.events.lock().unwrap().push("start".to_string());
            if self.fail_start {
                anyhow::bail!("bind: permission denied");
            }
            Ok(())
        }

        fn stop(&self) {
            self.events.lock().unwrap().push("stop".to_string());
        }
    }

    #[derive(Default)]
    struct FakeHttp {
        restarts: Mutex<u32>,
    }

    impl HttpRestart for FakeHttp {
        fn restart(&self) {
            *self.restarts.lock().unwrap() += 1;
        }
    }

    #[derive(Default)]
    struct FakeUsers {
        fail: bool,
        added: Mutex<Vec<String>>,
    }

    impl CredentialStore for FakeUsers {
        fn add_user(&self, name: &str, _password: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("database is locked");
            }
            self.added.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeStore {
        fail: bool,
        written: Mutex<Vec<Config>>,
    }

    impl ConfigStore for FakeStore {
        fn write(&self, config: &Config) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.written.lock().unwrap().push(config.clone());
            Ok(())
        }
    }

    struct Harness {
        config: SharedConfig,
        ports: Arc<FakePorts>,
        dns: Arc<FakeDns>,
        http: Arc<FakeHttp>,
        users: Arc<FakeUsers>,
        store: Arc<FakeStore>,
    }

    impl Harness {
        fn new() -> Self {
            let mut initial = Config::default();
            initial.web.bind_host = "0.0.0.0".to_string();
            initial.web.bind_port = 3000;
            Self {
                config: SharedConfig::new(initial),
                ports: Arc::new(FakePorts::default()),
                dns: Arc::new(FakeDns::default()),
                http: Arc::new(FakeHttp::default()),
                users: Arc::new(FakeUsers::default()),
                store: Arc::new(FakeStore::default()),
            }
        }

        fn reconfigurer(&self) -> Reconfigurer {
            Reconfigurer::new(
                self.config.clone(),
                self.ports.clone(),
                self.dns.clone(),
                self.http.clone(),
                self.users.clone(),
                self.store.clone(),
            )
        }

        fn restarts(&self) -> u32 {
            *self.http.restarts.lock().unwrap()
        }
    }

    fn request(web_port: u16, dns_port: u16) -> ConfigureRequest {
        ConfigureRequest {
            web: BindEntry {
                ip: "0.0.0.0".to_string(),
                port: web_port,
            },
            dns: BindEntry {
                ip: "192.168.1.5".to_string(),
                port: dns_port,
            },
            username: "admin".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn test_zero_port_rejected_without_side_effects() {
        let h = Harness::new();
        let before = h.config.lock().clone();

        for req in [request(0, 53), request(80, 0)] {
            let err = h.reconfigurer().configure(&req).unwrap_err();
            assert!(matches!(err, SetupError::InvalidInput(_)));
        }

        assert_eq!(h.config.lock().clone(), before);
        assert!(h.ports.calls().is_empty());
        assert!(h.dns.events().is_empty());
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let h = Harness::new();
        let mut req = request(80, 53);
        req.password.clear();

        let err = h.reconfigurer().configure(&req).unwrap_err();
        assert!(err.is_client_error());
        assert!(h.users.added.lock().unwrap().is_empty());
    }

    #[test]
    fn test_apply_success() {
        let h = Harness::new();

        let applied = h.reconfigurer().configure(&request(80, 53)).unwrap();
        assert!(applied.restart_http);

        let config = h.config.lock().clone();
        assert!(!config.setup_incomplete);
        assert_eq!(config.web.bind_port, 80);
        assert_eq!(config.dns.bind_host, "192.168.1.5");
        assert_eq!(config.dns.port, 53);

        assert_eq!(h.dns.events(), vec!["reinit 192.168.1.5:53", "start"]);
        assert_eq!(h.ports.calls(), vec![("tcp", 80), ("udp", 53), ("tcp", 53)]);
        assert_eq!(*h.users.added.lock().unwrap(), vec!["admin"]);
        assert_eq!(*h.store.written.lock().unwrap(), vec![config]);
        assert_eq!(h.restarts(), 1);
        assert!(!h.config.setup_incomplete());
        assert_eq!(h.config.web_bind(), ("0.0.0.0".to_string(), 80));
    }

    #[test]
    fn test_same_web_address_does_not_restart_http() {
        let h = Harness::new();

        let applied = h.reconfigurer().configure(&request(3000, 5353)).unwrap();

        assert!(!applied.restart_http);
        assert_eq!(h.restarts(), 0);
        // the web port is held by ourselves, so it must not be probed
        assert_eq!(h.ports.calls(), vec![("udp", 5353), ("tcp", 5353)]);
        assert_eq!(h.config.lock().clone().dns.port, 5353);
    }

    #[test]
    fn test_empty_web_ip_keeps_unspecified_listener() {
        let h = Harness::new();
        // 0.0.0.0:3000 is held by the running web listener
        h.ports.busy_tcp.lock().unwrap().insert(3000);
        let mut req = request(3000, 5353);
        req.web.ip.clear();

        let applied = h.reconfigurer().configure(&req).unwrap();

        assert!(!applied.restart_http);
        assert_eq!(h.restarts(), 0);
        assert_eq!(h.ports.calls(), vec![("udp", 5353), ("tcp", 5353)]);
        assert!(!h.config.setup_incomplete());
    }

    #[test]
    fn test_identical_request_runs_again() {
        let h = Harness::new();
        h.reconfigurer().configure(&request(3000, 53)).unwrap();
        h.reconfigurer().configure(&request(3000, 53)).unwrap();

        assert_eq!(h.store.written.lock().unwrap().len(), 2);
        assert_eq!(h.dns.events().iter().filter(|e| *e == "start").count(), 2);
        assert_eq!(h.restarts(), 0);
    }

    #[test]
    fn test_busy_web_port_fails_before_mutation() {
        let h = Harness::new();
        h.ports.busy_tcp.lock().unwrap().insert(80);
        let before = h.config.lock().clone();

        let err = h.reconfigurer().configure(&request(80, 53)).unwrap_err();

        assert!(err.to_string().starts_with("Impossible to listen on IP:port 0.0.0.0:80"));
        assert!(err.is_client_error());
        assert_eq!(h.config.lock().clone(), before);
        assert!(h.dns.events().is_empty());
    }

    #[test]
    fn test_busy_dns_port_fails_without_autofix() {
        let h = Harness::new();
        h.ports.busy_udp.lock().unwrap().insert(53);
        let before = h.config.lock().clone();

        let err = h.reconfigurer().configure(&request(80, 53)).unwrap_err();

        assert!(err.is_addr_in_use());
        assert_eq!(h.config.lock().clone(), before);
        assert_eq!(h.restarts(), 0);
    }

    #[test]
    fn test_dns_start_failure_rolls_back() {
        let mut h = Harness::new();
        h.dns = Arc::new(FakeDns {
            fail_start: true,
            ..Default::default()
        });
        let before = h.config.lock().clone();

        let err = h.reconfigurer().configure(&request(80, 53)).unwrap_err();

        assert!(matches!(err, SetupError::DnsStart(_)));
        assert!(err.to_string().contains("permission denied"));
        let after = h.config.lock().clone();
        assert_eq!(after, before);
        assert!(after.setup_incomplete);
        assert!(h.config.setup_incomplete());
        assert!(h.users.added.lock().unwrap().is_empty());
        assert!(h.store.written.lock().unwrap().is_empty());
        assert_eq!(h.restarts(), 0);
    }

    #[test]
    fn test_persistence_failure_stops_dns_and_rolls_back() {
        let mut h = Harness::new();
        h.store = Arc::new(FakeStore {
            fail: true,
            ..Default::default()
        });
        let before = h.config.lock().clone();

        let err = h.reconfigurer().configure(&request(80, 53)).unwrap_err();

        assert!(matches!(err, SetupError::Persistence(_)));
        assert!(!err.is_client_error());
        assert_eq!(h.config.lock().clone(), before);
        assert_eq!(h.dns.events(), vec!["reinit 192.168.1.5:53", "start", "stop"]);
        assert_eq!(h.restarts(), 0);
    }

    #[test]
    fn test_credential_failure_stops_dns_and_rolls_back() {
        let mut h = Harness::new();
        h.users = Arc::new(FakeUsers {
            fail: true,
            ..Default::default()
        });
        let before = h.config.lock().clone();

        let err = h.reconfigurer().configure(&request(80, 53)).unwrap_err();

        assert!(matches!(err, SetupError::Credentials(_)));
        assert_eq!(err.to_string(), "Couldn't add user: database is locked");
        assert!(!err.is_client_error());
        let after = h.config.lock().clone();
        assert_eq!(after, before);
        assert!(after.setup_incomplete);
        assert!(h.config.setup_incomplete());
        assert_eq!(h.dns.events(), vec!["reinit 192.168.1.5:53", "start", "stop"]);
        assert!(h.store.written.lock().unwrap().is_empty());
        assert_eq!(h.restarts(), 0);
    }
}
