//! Logging Module
//!
//! Sets up application logging (console plus optional daily rolling file) and
//! defines the named events the proxy attaches to notable log lines.

use crate::config::LoggingConfig;
use crate::proxy_status::ProxyStatus;
use crate::{ProxyError, Result};
use hyper::Method;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Named events, logged in the `event` field so they can be alerted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyEvent {
    NotEnoughFreeDiskSpace,
    MultipleContentEncodings,
    NotSupportedContentEncoding,
    NotAllowedContentType,
    NotMatchedContentLength,
    Timeout,
    NegativeMiss,
    CleanupFailed,
}

impl ProxyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyEvent::NotEnoughFreeDiskSpace => "NotEnoughFreeDiskSpace",
            ProxyEvent::MultipleContentEncodings => "MultipleContentEncodings",
            ProxyEvent::NotSupportedContentEncoding => "NotSupportedContentEncoding",
            ProxyEvent::NotAllowedContentType => "NotAllowedContentType",
            ProxyEvent::NotMatchedContentLength => "NotMatchedContentLength",
            ProxyEvent::Timeout => "Timeout",
            ProxyEvent::NegativeMiss => "NegativeMiss",
            ProxyEvent::CleanupFailed => "CleanupFailed",
        }
    }
}

impl fmt::Display for ProxyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner of the global tracing subscriber
pub struct LoggerManager {
    config: LoggingConfig,
    hostname: String,
}

impl LoggerManager {
    pub fn new(config: LoggingConfig) -> Self {
        Self {
            config,
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
        }
    }

    /// Install the global subscriber. A second call (tests) is a no-op.
    pub fn initialize(&self) -> Result<()> {
        let file_layer = match &self.config.app_log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| {
                    ProxyError::IoError(format!("Failed to create app log directory: {}", e))
                })?;
                let file_appender =
                    RollingFileAppender::new(Rotation::DAILY, dir, self.log_file_prefix());
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(file_appender)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                        .compact(),
                )
            }
            None => None,
        };

        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .with_target(false)
            .with_level(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .compact();

        // RUST_LOG wins over the configured level
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.log_level));

        let result = tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(console_layer)
            .try_init();

        match result {
            Ok(()) => {
                info!("Application logging initialized for host: {}", self.hostname);
                if let Some(dir) = &self.config.app_log_dir {
                    info!("Application logs will be written to: {:?}", dir);
                }
            }
            Err(_) => debug!("Tracing subscriber already initialized, skipping"),
        }

        Ok(())
    }

    fn log_file_prefix(&self) -> String {
        format!("artifact-caching-proxy-{}.log", self.hostname)
    }
}

/// One access line per proxied request
pub fn log_access(
    method: &Method,
    path: &str,
    status: u16,
    outcome: Option<ProxyStatus>,
    elapsed: Duration,
) {
    info!(
        method = %method,
        path = path,
        status = status,
        outcome = outcome.map(|o| o.as_str()).unwrap_or("-"),
        elapsed_ms = elapsed.as_millis() as u64,
        "request completed"
    );
}
