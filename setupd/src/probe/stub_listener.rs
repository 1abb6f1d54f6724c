//! systemd-resolved DNS stub listener detection and removal.

use std::path::PathBuf;
use std::process::Command;

use crate::error::{Result, SetupError};

const RESOLVED_UNIT: &str = "systemd-resolved";
const STUB_LISTENER_YES: &str = "#?DNSStubListener=yes";
const STUB_LISTENER_SED: &str = "s/#?DNSStubListener=yes/DNSStubListener=no/g";

/// A system DNS forwarder that may hold port 53
pub trait StubListenerControl: Send + Sync {
    /// Never fails: anything that prevents the check reads as "not active".
    fn is_active(&self) -> bool;

    /// Rewrites the resolver configuration and reloads the service.
    /// There is no way back within a session.
    fn disable(&self) -> Result<()>;
}

pub struct ResolvedStubListener {
    conf_path: PathBuf,
    /// Service manager used for the unit checks
    systemctl: String,
}

impl ResolvedStubListener {
    pub fn new(conf_path: impl Into<PathBuf>) -> Self {
        Self {
            conf_path: conf_path.into(),
            systemctl: "systemctl".to_string(),
        }
    }
}

impl StubListenerControl for ResolvedStubListener {
    fn is_active(&self) -> bool {
        let conf = self.conf_path.to_string_lossy().into_owned();
        let checks: [(&str, Vec<&str>); 2] = [
            (self.systemctl.as_str(), vec!["is-enabled", RESOLVED_UNIT]),
            ("grep", vec!["-E", STUB_LISTENER_YES, conf.as_str()]),
        ];

        for (program, args) in &checks {
            if let Err(e) = run(program, args) {
                tracing::error!("{}", e);
                return false;
            }
        }

        true
    }

    fn disable(&self) -> Result<()> {
        let conf = self.conf_path.to_string_lossy().into_owned();
        run("sed", &["-r", "-i.orig", STUB_LISTENER_SED, conf.as_str()])?;
        run(&self.systemctl, &["reload-or-restart", RESOLVED_UNIT])?;

        tracing::info!("Disabled DNSStubListener in {}", conf);
        Ok(())
    }
}

fn run(program: &str, args: &[&str]) -> Result<()> {
    let command = format!("{} {}", program, args.join(" "));
    tracing::trace!("executing {}", command);

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| SetupError::CommandFailed {
            command: command.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        return Err(SetupError::CommandFailed {
            command,
            message: format!("exited with code {}: {}", code, stderr.trim()),
        });
    }

    Ok(())
}
