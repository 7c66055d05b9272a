//! modhost: module broker host.
//!
//! Loads the host configuration, brings up the configured modules, logs
//! their events, and tears everything down on Ctrl-C.

use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use modhost_broker::{Broker, ClosureListener};
use modhost_core::config::{HostConfig, LogFormat};
use modhost_core::error::AppError;
use plugin_waku::ffi::WakuBindings;

#[tokio::main]
async fn main() {
    let env = std::env::var("MODHOST_ENV").unwrap_or_else(|_| "development".to_string());
    let config = match HostConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!("Configuration loaded (env: {})", env);

    if let Err(e) = run(config).await {
        tracing::error!("Host error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &HostConfig) {
    let logging = &config.logging;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(logging.thread_ids)
                .init();
        }
        LogFormat::Pretty => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(logging.thread_ids)
                .init();
        }
    }
}

/// Selects the libwaku implementation.
///
/// With the `native` feature and `MODHOST_LIBWAKU` pointing at the shared
/// library, the real node is used. Otherwise the in-memory mock.
fn waku_bindings() -> Result<Arc<dyn WakuBindings>, AppError> {
    if let Some(native) = native_bindings()? {
        return Ok(native);
    }
    tracing::warn!("Using in-memory mock libwaku");
    Ok(Arc::new(plugin_waku::ffi::MockWaku::new()))
}

#[cfg(feature = "native")]
fn native_bindings() -> Result<Option<Arc<dyn WakuBindings>>, AppError> {
    let Ok(path) = std::env::var("MODHOST_LIBWAKU") else {
        return Ok(None);
    };
    tracing::info!("Loading libwaku from '{}'", path);
    let api = plugin_waku::ffi::LibWakuApi::load(&path)?;
    Ok(Some(Arc::new(api)))
}

#[cfg(not(feature = "native"))]
fn native_bindings() -> Result<Option<Arc<dyn WakuBindings>>, AppError> {
    Ok(None)
}

async fn run(config: HostConfig) -> Result<(), AppError> {
    tracing::info!("Starting modhost v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Broker and module catalog ────────────────────────
    let broker = Broker::new(config.broker.clone());
    plugin_waku::register_waku(&broker, waku_bindings()?);

    // ── Step 2: Bring up configured modules ──────────────────────
    let ready = broker.bootstrap(&config.modules).await?;
    tracing::info!("{} module(s) ready: {}", ready.len(), ready.join(", "));

    // ── Step 3: Log every module's events ────────────────────────
    let proxy = broker.proxy();
    for name in &ready {
        let client = proxy.client(name).await?;
        client
            .on_event(ClosureListener::new("event-log", |event| async move {
                tracing::info!(
                    source = %event.source,
                    kind = ?event.kind,
                    status = event.status,
                    correlation = ?event.correlation_id,
                    "Event"
                );
            }))
            .await?;
    }

    // ── Step 4: Wait for shutdown signal ─────────────────────────
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::internal(format!("Failed to listen for Ctrl-C: {}", e)))?;
    tracing::info!("Shutdown signal received");

    // ── Step 5: Tear down modules ────────────────────────────────
    broker.shutdown().await;
    tracing::info!("modhost stopped");
    Ok(())
}
