//! Error types for setup and reconfiguration.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("listen {proto} {addr}: address already in use")]
    PortInUse {
        proto: &'static str,
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listen {proto} {addr}: {source}")]
    Bind {
        proto: &'static str,
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("can't detect static IP: not supported on {0}")]
    PlatformUnsupported(&'static str),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Command failed: {command} - {message}")]
    CommandFailed { command: String, message: String },

    #[error("Couldn't start DNS server: {0}")]
    DnsStart(String),

    #[error("Couldn't add user: {0}")]
    Credentials(String),

    #[error("Couldn't write config: {0}")]
    Persistence(String),
}

impl SetupError {
    /// Only an "address in use" bind failure can be cured by autofix.
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, SetupError::PortInUse { .. })
    }

    /// Whether the failure was caused by the request rather than the host.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SetupError::InvalidInput(_) | SetupError::PortInUse { .. } | SetupError::Bind { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SetupError>;
