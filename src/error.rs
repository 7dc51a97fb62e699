//! Error Module
//!
//! Defines error types and result types used throughout the caching proxy.

use thiserror::Error;

/// Main error type for the caching proxy
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unsupported content encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("System error: {0}")]
    SystemError(String),
}

impl ProxyError {
    /// Whether the outbound client may retry the request that produced this error
    pub fn is_transient(&self) -> bool {
        matches!(self, ProxyError::ConnectionError(_))
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::IoError(err.to_string())
    }
}

impl From<hyper::Error> for ProxyError {
    fn from(err: hyper::Error) -> Self {
        ProxyError::HttpError(err.to_string())
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ProxyError {
    fn from(err: serde_yaml::Error) -> Self {
        ProxyError::SerializationError(err.to_string())
    }
}

impl From<regex::Error> for ProxyError {
    fn from(err: regex::Error) -> Self {
        ProxyError::ConfigError(err.to_string())
    }
}

/// Result type alias for the caching proxy
pub type Result<T> = std::result::Result<T, ProxyError>;
