//! globe-switchd: cycles keyboard input sources from a single trigger key
//!
//! This daemon runs as a LaunchAgent and provides:
//! - Interception of the trigger key (Globe by default) via CGEventTap
//! - Ordered cycling through enabled keyboard input sources, with retry
//! - IPC server for status queries, manual cycling and notifications

mod config;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod platform;
mod sources;
mod state;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::SwitchEvent;
use crate::hotkey::{HotkeyError, HotkeyListener};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "globe-switchd starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, trigger = %config.trigger, "configuration loaded");

    let shutdown = ShutdownSignal::new();

    // Listener thread -> IPC server (status tracking and notifications)
    let (event_tx, _event_rx) = broadcast::channel::<SwitchEvent>(64);
    let mut status_rx = event_tx.subscribe();

    let hotkeys = Arc::new(HotkeyListener::new(config.trigger, event_tx.clone()));
    let server = Server::new(&config.socket_path, Arc::clone(&hotkeys), event_tx)?;

    match hotkeys.start().await {
        Ok(()) => {
            info!("input source switching armed");
        }
        Err(e @ HotkeyError::Session(_)) => {
            error!(%e, "failed to arm interception");
            warn!("continuing unarmed - grant Accessibility permission and send `start` over IPC");
        }
        Err(e) => {
            error!(%e, "hotkey listener unavailable");
        }
    }

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Fold engine events into the status snapshot
        _ = async {
            loop {
                match status_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "engine event");
                        server.record(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "status receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("event handler exited");
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to install signal handlers"),
            }
        }
    }

    info!("shutting down...");

    // Joining the listener thread blocks
    let listener = Arc::clone(&hotkeys);
    if tokio::task::spawn_blocking(move || listener.stop()).await.is_err() {
        warn!("hotkey listener shutdown task failed");
    }
    server.shutdown().await;

    info!("globe-switchd stopped");

    Ok(())
}
