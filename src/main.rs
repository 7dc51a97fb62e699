use artifact_caching_proxy::{
    caching_proxy::CachingProxy,
    config::Config,
    http_proxy::HttpProxy,
    logging::LoggerManager,
    shutdown::{ShutdownCoordinator, ShutdownSignal},
    ProxyError, Result,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Upper bound for the drain window plus the temp file sweep
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    let logger = LoggerManager::new(config.logging.clone());
    logger.initialize()?;

    info!(
        "Starting artifact-caching-proxy {} (built {})",
        env!("BUILD_VERSION"),
        env!("BUILD_TIMESTAMP")
    );

    let proxy = Arc::new(CachingProxy::new(&config)?);
    let cache_store = proxy.cache_store().clone();

    // Downloads cut short by a previous process leave temp files behind
    let sweep_store = cache_store.clone();
    tokio::task::spawn_blocking(move || sweep_store.sweep_orphaned_temp_files())
        .await
        .map_err(|e| ProxyError::SystemError(format!("Startup temp file sweep failed: {}", e)))?;

    let listen_addr: SocketAddr = format!("{}:{}", config.server.listen_address, config.server.port)
        .parse()
        .map_err(|e| {
            ProxyError::ConfigError(format!(
                "Invalid listen address {}:{}: {}",
                config.server.listen_address, config.server.port, e
            ))
        })?;

    let mut coordinator = ShutdownCoordinator::new(SHUTDOWN_TIMEOUT);
    coordinator.set_cache_store(cache_store);
    let shutdown_signal = ShutdownSignal::new(coordinator.subscribe());
    let coordinator = Arc::new(coordinator);

    let shutdown_handle = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.listen_for_shutdown().await })
    };

    let http_proxy = HttpProxy::new(listen_addr, proxy);
    if let Err(e) = http_proxy.start(shutdown_signal).await {
        error!("HTTP proxy failed: {}", e);
        shutdown_handle.abort();
        return Err(e);
    }

    match shutdown_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Shutdown finished with error: {}", e),
        Err(e) => error!("Shutdown task failed: {}", e),
    }

    info!("artifact-caching-proxy stopped");
    Ok(())
}
