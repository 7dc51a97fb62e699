//! Artifact Caching Proxy - caching reverse proxy for binary artifact repositories
//!
//! Requests under a configured prefix are served from a local file cache,
//! fetched from the matching upstream repository, or answered from a short
//! lived cache of recent upstream outcomes.

pub mod cache_store;
pub mod caching_proxy;
pub mod config;
pub mod error;
pub mod file_responder;
pub mod http_proxy;
pub mod https_connector;
pub mod logging;
pub mod metrics;
pub mod proxy_status;
pub mod response_cache;
pub mod shutdown;
pub mod upstream;
pub mod upstream_client;

pub use error::{ProxyError, Result};
