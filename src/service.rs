// Service composition - wires config, supervisor and HTTP facade together

use crate::ai::VisionClient;
use crate::config::{ConfigStore, LaunchOverrides};
use crate::http::{self, AppState};
use crate::process::Supervisor;
use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Where the service listens and which config file it owns
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub host: String,
    pub port: u16,
    pub config_path: PathBuf,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            host: http::DEFAULT_HOST.to_string(),
            port: http::DEFAULT_PORT,
            config_path: PathBuf::from("labkeeper.json"),
        }
    }
}

/// Build the shared state for one service instance
pub fn build_state(config_path: &std::path::Path) -> anyhow::Result<AppState> {
    let store = ConfigStore::open(config_path).with_context(|| {
        format!("Failed to load configuration from {}", config_path.display())
    })?;

    let supervisor = Supervisor::new(Arc::new(store));
    let vision = VisionClient::new().context("Failed to create vision client")?;

    Ok(AppState { supervisor, vision })
}

/// Run the service until SIGINT/SIGTERM, then stop the notebook server
pub async fn run(options: ServiceOptions) -> anyhow::Result<()> {
    let state = build_state(&options.config_path)?;
    let supervisor = state.supervisor.clone();

    let addr: SocketAddr = format!("{}:{}", options.host, options.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", options.host, options.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        config = %options.config_path.display(),
        "labkeeper {} starting",
        env!("CARGO_PKG_VERSION")
    );

    if supervisor.config_store().current().auto_start {
        match supervisor.start(LaunchOverrides::default()).await {
            Ok(report) => tracing::info!(pid = ?report.pid, "Auto-started notebook server at {}", report.url),
            Err(e) => tracing::error!("Auto-start failed: {}", e),
        }
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    http::serve(listener, http::router(state), shutdown.cancelled_owned())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Shutting down, stopping notebook server");
    match supervisor.shutdown().await {
        Ok(outcome) => tracing::info!("{}", outcome.message()),
        Err(e) => tracing::error!("Failed to stop notebook server: {}", e),
    }

    tracing::info!("labkeeper stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!("Failed to install signal handlers: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigint.recv() => tracing::info!("Received SIGINT"),
    }

    shutdown.cancel();
}

#[cfg(not(unix))]
async fn wait_for_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C"),
        Err(e) => {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
    }

    shutdown.cancel();
}
