//! Restartable HTTP listener.
//!
//! Each serve iteration binds the web address currently in the live
//! configuration and runs until its token is cancelled. A restart cancels
//! the token; axum then drains in-flight requests and the loop rebinds.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use axum::Router;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::SharedConfig;
use crate::probe::port::{join_host_port, listen_host};

pub trait HttpRestart: Send + Sync {
    /// Ask the listener to shut down and rebind. Returns immediately; the
    /// caller learns nothing about when, or whether, the rebind happened.
    fn restart(&self);
}

pub struct HttpListener {
    handle: Handle,
    current: Mutex<CancellationToken>,
}

impl HttpListener {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            current: Mutex::new(CancellationToken::new()),
        }
    }

    /// Token for the next serve iteration, cancelled by either a restart or `parent`
    fn arm(&self, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }
}

impl HttpRestart for HttpListener {
    fn restart(&self) {
        let token = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        // Shutdown waits for the request that asked for it, so it must not
        // be awaited from that request.
        self.handle.spawn(async move {
            tracing::info!("Stopping HTTP listener to rebind");
            token.cancel();
        });
    }
}

/// Serve `app` until `shutdown` fires, rebinding after every restart
pub async fn serve(
    config: SharedConfig,
    app: Router,
    listener: Arc<HttpListener>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let (host, port) = config.web_bind();
        let addr = join_host_port(listen_host(&host), port);

        let tcp = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        tracing::info!("Web interface listening on {}", addr);

        let token = listener.arm(&shutdown);
        axum::serve(tcp, app.clone())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .context("HTTP server error")?;

        if shutdown.is_cancelled() {
            break;
        }
    }

    Ok(())
}
