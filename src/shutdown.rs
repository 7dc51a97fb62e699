//! Graceful Shutdown Module
//!
//! Signal handling and shutdown broadcast. On shutdown the accept loop stops,
//! in-flight connections get a drain window, and temp files of downloads that
//! were cut short are swept from the cache.

use crate::cache_store::CacheStore;
use crate::{ProxyError, Result};
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Shutdown coordinator for graceful system shutdown
pub struct ShutdownCoordinator {
    cache_store: Option<CacheStore>,
    shutdown_sender: broadcast::Sender<()>,
    shutdown_timeout: Duration,
    drain_window: Duration,
}

impl ShutdownCoordinator {
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (shutdown_sender, _) = broadcast::channel(16);

        Self {
            cache_store: None,
            shutdown_sender,
            shutdown_timeout,
            drain_window: crate::http_proxy::CONNECTION_DRAIN_TIMEOUT,
        }
    }

    /// Time granted to in-flight connections before their temp files are swept
    pub fn with_drain_window(mut self, drain_window: Duration) -> Self {
        self.drain_window = drain_window;
        self
    }

    /// Cache whose leftover temp files are removed during shutdown
    pub fn set_cache_store(&mut self, cache_store: CacheStore) {
        self.cache_store = Some(cache_store);
    }

    /// Get shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_sender.subscribe()
    }

    /// Wait for SIGINT or SIGTERM, then shut down
    pub async fn listen_for_shutdown(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        let mut sigint =
            signal::unix::signal(signal::unix::SignalKind::interrupt()).map_err(|e| {
                ProxyError::SystemError(format!("Failed to create SIGINT handler: {}", e))
            })?;

        let mut sigterm =
            signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
                ProxyError::SystemError(format!("Failed to create SIGTERM handler: {}", e))
            })?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }

        self.initiate_shutdown().await
    }

    /// Broadcast shutdown and run the cleanup steps within the shutdown timeout
    pub async fn initiate_shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown sequence");

        if let Err(e) = self.shutdown_sender.send(()) {
            debug!("Shutdown signal not sent (no active receivers): {}", e);
        }

        match timeout(self.shutdown_timeout, self.perform_shutdown()).await {
            Ok(Ok(())) => {
                info!("Graceful shutdown completed successfully");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Error during graceful shutdown: {}", e);
                Err(e)
            }
            Err(_) => {
                error!(
                    "Graceful shutdown timed out after {:?}, forcing shutdown",
                    self.shutdown_timeout
                );
                Err(ProxyError::TimeoutError(
                    "Graceful shutdown timeout".to_string(),
                ))
            }
        }
    }

    async fn perform_shutdown(&self) -> Result<()> {
        // Connections drain inside the listener; give them their window first
        tokio::time::sleep(self.drain_window).await;

        if let Some(store) = self.cache_store.clone() {
            let removed = tokio::task::spawn_blocking(move || store.sweep_orphaned_temp_files())
                .await
                .map_err(|e| ProxyError::SystemError(format!("Temp file sweep failed: {}", e)))?;
            if removed > 0 {
                warn!("Removed {} temp files of interrupted downloads", removed);
            }
        }

        Ok(())
    }
}

/// Shutdown signal wrapper for components
pub struct ShutdownSignal {
    receiver: broadcast::Receiver<()>,
    shutdown_requested: bool,
}

impl ShutdownSignal {
    pub fn new(receiver: broadcast::Receiver<()>) -> Self {
        Self {
            receiver,
            shutdown_requested: false,
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Wait for shutdown signal. A closed or lagged channel counts as shutdown.
    pub async fn wait_for_shutdown(&mut self) {
        let _ = self.receiver.recv().await;
        self.shutdown_requested = true;
    }
}
