mod api;
mod auth;
mod config;
mod conflict;
mod error;
mod probe;
mod reconfigure;
mod runtime;

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::auth::db::UserDb;
use crate::auth::manager::UserHandle;
use crate::config::{Config, SharedConfig, TomlConfigStore};
use crate::conflict::{ConflictResolver, Probes};
use crate::probe::interfaces::IpCommandInterfaces;
use crate::probe::port::OsPortProbe;
use crate::probe::static_ip::DhcpcdStaticIp;
use crate::probe::stub_listener::ResolvedStubListener;
use crate::reconfigure::Reconfigurer;
use crate::runtime::dns::{DnsLifecycle, DnsListener};
use crate::runtime::http::HttpListener;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/setupd/setupd.toml".to_string());

    let config = Config::load_or_first_run(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.telemetry.log_level))
        )
        .init();

    tracing::info!("Starting setupd");
    if config.setup_incomplete {
        tracing::info!("No configuration applied yet, install routes enabled");
    } else {
        tracing::info!("Loaded config from {}", config_path);
    }

    // Open user database
    let users = UserHandle::spawn(UserDb::open(&config.auth.db_path)?);
    tracing::info!(
        "Opened user database at {:?} ({} users)",
        config.auth.db_path,
        users.count().await?
    );

    let probes = Probes {
        ports: Arc::new(OsPortProbe),
        stub_listener: Arc::new(ResolvedStubListener::new(&config.system.resolved_conf)),
        static_ip: Arc::new(DhcpcdStaticIp::new(&config.system.dhcpcd_conf)),
        interfaces: Arc::new(IpCommandInterfaces),
    };

    let dns = Arc::new(DnsListener::new(Handle::current()));
    if !config.setup_incomplete {
        dns.reinit(&config.dns)?;
        dns.start().context("Failed to start DNS listener")?;
    }

    let shared = SharedConfig::new(config);
    let http = Arc::new(HttpListener::new(Handle::current()));

    let reconfigurer = Reconfigurer::new(
        shared.clone(),
        probes.ports.clone(),
        dns.clone(),
        http.clone(),
        Arc::new(users.clone()),
        Arc::new(TomlConfigStore::new(&config_path)),
    );

    let app_state = api::routes::AppState {
        config: shared.clone(),
        resolver: Arc::new(ConflictResolver::new(probes.clone())),
        reconfigurer: Arc::new(reconfigurer),
        interfaces: probes.interfaces.clone(),
    };
    let app = api::routes::router(app_state);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let server_cancel = cancel.clone();
    let mut server_handle = tokio::spawn(runtime::http::serve(shared.clone(), app, http, server_cancel));

    // Wait for shutdown signal, or for the server to give up on its own
    let finished = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
            tracing::info!("Shutdown signal received");
            None
        }
        result = &mut server_handle => Some(result),
    };

    cancel.cancel();
    let server_result = match finished {
        Some(result) => result,
        None => server_handle.await,
    };

    match server_result {
        Ok(Err(e)) => tracing::error!("Server error: {:#}", e),
        Err(e) => tracing::error!("Server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    dns.stop();

    if let Err(e) = users.shutdown().await {
        tracing::error!("Failed to shutdown user database: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
