mod config;
mod dedup;
mod platform;
mod poller;
mod responder;
mod rules;
mod webhook;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LoggingConfig};
use crate::platform::graph::GraphClient;
use crate::platform::MessagingClient;
use crate::responder::AutoResponder;

/// Console logging, plus a plain-text copy when `[logging] file` is set.
fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dm_autoreply=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Reuse a saved session when possible, otherwise log in and save a new one.
async fn sign_in(client: &dyn MessagingClient, session_path: &Path) -> Result<()> {
    if session_path.exists() {
        info!("Importing existing session from {}", session_path.display());
        match client.import_session(session_path).await {
            Ok(()) => return Ok(()),
            Err(e) => warn!("Failed to import session: {:#}. Trying to login...", e),
        }
    }

    client.login().await.context("Login failed")?;
    client
        .export_session(session_path)
        .await
        .context("Failed to export session")?;

    info!("Login successful");
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Install the shutdown handlers now; the returned future resolves with the
/// name of the first signal received.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    Ok(async move {
        tokio::select! {
            _ = ctrl_c() => "Ctrl-C",
            _ = terminate.recv() => "SIGTERM",
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    Ok(async {
        ctrl_c().await;
        "Ctrl-C"
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Initialize logging
    let _log_guard = init_logging(&config.logging)?;

    info!("Configuration loaded from {}", config_path.display());
    info!("  Response rules: {}", config.responses.rules.len());
    info!(
        "  Polling: {}",
        if config.polling.enabled {
            format!("every {}s", config.polling.check_interval_seconds)
        } else {
            "disabled".to_string()
        }
    );
    info!(
        "  Webhook: {}",
        if config.webhook.enabled {
            config.webhook.bind_address.as_str()
        } else {
            "disabled"
        }
    );

    let client: Arc<dyn MessagingClient> = Arc::new(GraphClient::new(config.account.clone())?);
    sign_in(client.as_ref(), &config.storage.session_path)
        .await
        .context("Error logging in")?;

    let responder = Arc::new(AutoResponder::from_config(client, &config));
    let shutdown = shutdown_signal()?;

    // Webhook server
    let server = if config.webhook.enabled {
        let listener = tokio::net::TcpListener::bind(&config.webhook.bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", config.webhook.bind_address))?;
        let app = webhook::routes(Arc::clone(&responder), &config.webhook.verify_token);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        info!("Webhook server is running on {}", config.webhook.bind_address);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        Some((shutdown_tx, handle))
    } else {
        None
    };

    // Poll loop
    let poller = config
        .polling
        .enabled
        .then(|| poller::spawn_poller(Arc::clone(&responder), config.polling.interval()));

    info!("Bot started");

    let signal = shutdown.await;
    info!("Shutdown requested ({})", signal);

    if let Some(poller) = poller {
        poller.stop().await;
    }

    if let Some((shutdown_tx, handle)) = server {
        let _ = shutdown_tx.send(());
        match handle.await {
            Ok(Ok(())) => info!("Webhook server stopped"),
            Ok(Err(e)) => error!("Webhook server error: {}", e),
            Err(e) => error!("Webhook server task failed: {}", e),
        }
    }

    responder.cleanup().await;

    Ok(())
}
