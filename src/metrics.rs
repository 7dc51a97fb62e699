//! Metrics Module
//!
//! Per-outcome request counters, exposed as JSON by the listener.

use crate::proxy_status::ProxyStatus;
use crate::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Request counters by outcome
#[derive(Debug)]
pub struct ProxyMetrics {
    requests: [AtomicU64; ProxyStatus::ALL.len()],
    started_at: Instant,
}

/// Point-in-time view of [`ProxyMetrics`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// RFC 3339, UTC
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub requests_by_status: BTreeMap<String, u64>,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self {
            requests: Default::default(),
            started_at: Instant::now(),
        }
    }

    /// Count one request that ended with `status`
    pub fn record(&self, status: ProxyStatus) {
        self.requests[status.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, status: ProxyStatus) -> u64 {
        self.requests[status.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests_by_status: BTreeMap<String, u64> = ProxyStatus::ALL
            .iter()
            .map(|status| (status.to_string(), self.count(*status)))
            .collect();

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            total_requests: requests_by_status.values().sum(),
            requests_by_status,
        }
    }

    /// Snapshot serialized for the `/metrics` endpoint
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.snapshot()).map_err(|e| {
            ProxyError::SerializationError(format!("Failed to serialize metrics: {}", e))
        })
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}
