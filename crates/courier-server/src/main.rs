//! # courier-server
//!
//! Relays the host's message store to remote clients.
//!
//! This binary provides:
//! - **Change detection** on the store file (filesystem events, with a
//!   polling fallback) feeding an incremental diff against a watermark
//! - **Enrichment** of every outgoing message (codes, links, mentions,
//!   emoji-only)
//! - **WebSocket push** (`/stream`) fanned out by the broadcast hub
//! - **REST API** (axum) for conversations, messages, search, attachments
//!   and sending through host automation
//! - **Optional envelope encryption** of every body and frame, keyed from
//!   the shared secret

mod api;
mod auth;
mod config;
mod detector;
mod envelope;
mod error;
mod host;
mod hub;
mod pagination;
mod store;
mod stream;
mod sync;
mod thumbnail;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier_shared::constants::APP_NAME;
use courier_shared::crypto::EnvelopeCipher;
use courier_shared::enrich::Pipeline;
use courier_store::{Database, DiffEngine};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::detector::ChangeDetector;
use crate::host::CommandHost;
use crate::hub::Hub;
use crate::store::StoreHandle;
use crate::sync::SyncService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,courier_server=debug")),
        )
        .init();

    info!("Starting {} relay v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env()?;
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_read_only(&config.store_path)
        .with_context(|| format!("opening {}", config.store_path.display()))?;
    let engine = Arc::new(DiffEngine::from_store(&db)?);
    let store = StoreHandle::new(db);

    let cipher = EnvelopeCipher::from_secret(&config.secret)?;
    let pipeline = Arc::new(Pipeline::with_defaults());
    info!(processors = ?pipeline.order(), "Enrichment pipeline ready");

    let hub = Hub::new();
    let host = Arc::new(CommandHost::new(config.host_command.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // -----------------------------------------------------------------------
    // 4. Spawn the sync loop and its trigger source
    // -----------------------------------------------------------------------
    let sync = Arc::new(SyncService::new(
        engine.clone(),
        store.clone(),
        pipeline.clone(),
        hub.clone(),
    ));
    let sync_task = sync.clone().spawn(shutdown_rx.clone());

    let detector = match ChangeDetector::start(&config.store_path, config.debounce, sync.trigger()) {
        Ok(detector) => Some(detector),
        Err(e) => {
            warn!(error = %e, "Falling back to polling");
            detector::spawn_poller(config.poll_interval, sync.trigger(), shutdown_rx.clone());
            None
        }
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let state = AppState {
        config: Arc::new(config),
        cipher,
        store,
        pipeline,
        hub,
        engine,
        host,
    };

    let mut server = tokio::spawn(api::serve(state, http_addr, shutdown_rx));

    // The server only finishes on its own if it failed to bind or crashed.
    let finished = tokio::select! {
        result = &mut server => Some(result),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received Ctrl+C, shutting down");
            None
        }
    };

    if let Some(detector) = detector {
        detector.stop();
    }
    let _ = shutdown_tx.send(true);
    sync_task.await?;

    match finished {
        Some(result) => result??,
        None => server.await??,
    }

    Ok(())
}
