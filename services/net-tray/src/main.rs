//! net-tray
//!
//! Keeps a campus-network login alive and reports its state:
//! 1. Polls the authentication gateway for link status and account info
//! 2. Optionally logs the configured account in whenever the link is free
//! 3. Publishes every state change (log lines, local HTTP surface)
//! 4. Takes menu commands from stdin

mod config;
mod console;
mod error;
mod http;
mod keyring_store;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use probe::HttpProbe;
use reconciler::format::{balance_str, usage_str};
use reconciler::{AccountState, Command, Reconciler, WatchPresenter, spawn_scheduler};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::http::{AppState, build_router};

/// How long in-flight refreshes and HTTP requests get to finish on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting net-tray");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        gateway = %config.probe.base_url,
        account = config.account.username.as_deref(),
        auto_manage = config.polling.auto_manage,
        status_interval_ms = config.polling.status_update_interval_ms,
        info_interval_ms = config.polling.info_update_interval_ms,
        "configuration loaded"
    );

    let probe = HttpProbe::new(
        reqwest::Client::new(),
        &config.probe.base_url,
        config.probe_timeout(),
    )
    .context("invalid probe configuration")?;

    let (presenter, state_rx) = WatchPresenter::new();
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(probe),
        config.credentials(),
        config.polling.auto_manage,
        Arc::new(presenter),
    ));

    let (scheduler, mut scheduler_task) = spawn_scheduler(reconciler.clone(), config.intervals());
    tokio::spawn(log_state_changes(state_rx));

    // Optional local HTTP surface
    let (http_shutdown_tx, http_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = match &config.http {
        Some(http_config) => {
            let app = build_router(
                AppState {
                    reconciler: reconciler.clone(),
                    prometheus: prometheus_handle,
                    started_at: Instant::now(),
                },
                http_config.max_connections,
            );
            let listener = TcpListener::bind(http_config.listen_addr)
                .await
                .with_context(|| format!("failed to bind to {}", http_config.listen_addr))?;
            info!(addr = %http_config.listen_addr, "status surface listening");

            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = http_shutdown_rx.await;
                    })
                    .await
            }))
        }
        None => None,
    };

    tokio::spawn(console::run(
        scheduler.clone(),
        reconciler.clone(),
        config_path.clone(),
    ));

    // Run until a signal arrives or the console asks to quit
    let scheduler_done = tokio::select! {
        _ = shutdown_signal() => false,
        result = &mut scheduler_task => {
            if let Err(e) = result {
                error!(error = %e, "scheduler task panicked");
            }
            info!("quit requested, shutting down");
            true
        }
    };

    if !scheduler_done {
        let _ = scheduler.send(Command::Shutdown).await;
        match tokio::time::timeout(DRAIN_TIMEOUT, scheduler_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "scheduler task panicked"),
            Err(_) => warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "scheduler did not stop in time"
            ),
        }
    }

    let _ = http_shutdown_tx.send(());
    if let Some(handle) = server_handle {
        match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
            Ok(Err(e)) => error!(error = %e, "server task panicked"),
            Err(_) => warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            ),
        }
    }

    info!(status = reconciler.status().await.as_str(), "shutdown complete");
    Ok(())
}

/// Headless presenter: one log line per published state.
async fn log_state_changes(mut rx: watch::Receiver<AccountState>) {
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        info!(
            status = state.status.as_str(),
            label = state.status.label(),
            session_usage = %usage_str(state.current_session.as_ref().map(|s| s.usage_bytes)),
            total_usage = %usage_str(state.total_usage_bytes),
            balance = %balance_str(state.balance),
            sessions = state.sessions.len(),
            "state updated"
        );
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
