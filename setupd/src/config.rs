use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};
use tokio::sync::watch;

/// The service configuration record, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Install-only routes stay reachable while this is set
    #[serde(default = "default_true")]
    pub setup_incomplete: bool,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_web_port")]
    pub bind_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_dns_port")]
    pub port: u16,
}

/// Host files consulted by the conflict probes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_dhcpcd_conf")]
    pub dhcpcd_conf: PathBuf,
    #[serde(default = "default_resolved_conf")]
    pub resolved_conf: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_web_port() -> u16 {
    3000
}

fn default_dns_port() -> u16 {
    53
}

fn default_dhcpcd_conf() -> PathBuf {
    PathBuf::from("/etc/dhcpcd.conf")
}

fn default_resolved_conf() -> PathBuf {
    PathBuf::from("/etc/systemd/resolved.conf")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/setupd/users.db")
}

fn default_log_level() -> String {
    "setupd=info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            setup_incomplete: true,
            web: WebConfig::default(),
            dns: DnsConfig::default(),
            system: SystemConfig::default(),
            auth: AuthConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            bind_port: default_web_port(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            port: default_dns_port(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            dhcpcd_conf: default_dhcpcd_conf(),
            resolved_conf: default_resolved_conf(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load configuration, treating a missing file as a first run
    pub fn load_or_first_run(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn install_settings(&self) -> InstallSettings {
        InstallSettings {
            web_host: self.web.bind_host.clone(),
            web_port: self.web.bind_port,
            dns_host: self.dns.bind_host.clone(),
            dns_port: self.dns.port,
        }
    }

    pub fn apply_install_settings(&mut self, settings: &InstallSettings) {
        self.web.bind_host = settings.web_host.clone();
        self.web.bind_port = settings.web_port;
        self.dns.bind_host = settings.dns_host.clone();
        self.dns.port = settings.dns_port;
    }
}

/// The listener fields a reconfiguration rewrites
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSettings {
    pub web_host: String,
    pub web_port: u16,
    pub dns_host: String,
    pub dns_port: u16,
}

/// The live configuration record, shared by the API and the runtime.
///
/// Exactly one exists per process. Holding the guard returned by
/// [`SharedConfig::lock`] is the only way to mutate it, and the
/// reconfiguration controller keeps that guard for the whole apply.
/// Async readers never take that guard: they read the fields they need from
/// the last record passed to [`SharedConfig::publish`], so they see either
/// the old or the new record and never wait for an apply to finish.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<Mutex<Config>>,
    published: Arc<watch::Sender<Published>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Published {
    setup_incomplete: bool,
    web_host: String,
    web_port: u16,
}

impl Published {
    fn of(config: &Config) -> Self {
        Self {
            setup_incomplete: config.setup_incomplete,
            web_host: config.web.bind_host.clone(),
            web_port: config.web.bind_port,
        }
    }
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        let (published, _) = watch::channel(Published::of(&config));
        Self {
            inner: Arc::new(Mutex::new(config)),
            published: Arc::new(published),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Config> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `config` visible to readers. Called with the lock held, once the
    /// record is committed.
    pub fn publish(&self, config: &Config) {
        self.published.send_replace(Published::of(config));
    }

    pub fn setup_incomplete(&self) -> bool {
        self.published.borrow().setup_incomplete
    }

    pub fn web_bind(&self) -> (String, u16) {
        let published = self.published.borrow();
        (published.web_host.clone(), published.web_port)
    }
}

/// Durable storage for the configuration record
pub trait ConfigStore: Send + Sync {
    fn write(&self, config: &Config) -> Result<()>;
}

/// Writes the record as TOML, replacing the file atomically
pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for TomlConfigStore {
    fn write(&self, config: &Config) -> Result<()> {
        let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, contents)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        tracing::debug!("Wrote config to {}", self.path.display());
        Ok(())
    }
}
