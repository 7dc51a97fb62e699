//! Proxy Status Module
//!
//! The per-request outcome tag and the response header names the proxy sets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Header naming the outcome of the request
pub const STATUS_HEADER: &str = "x-artifact-caching-proxy";
/// Header carrying the cached upstream status code on replayed entries
pub const CACHED_STATUS_HEADER: &str = "x-artifact-caching-proxy-cached-status";
/// Header carrying the expiry of the replayed entry (RFC 1123)
pub const CACHED_UNTIL_HEADER: &str = "x-artifact-caching-proxy-cached-until";

/// Cache-Control for artifacts, which are immutable under a fixed URL
pub const ETERNAL_CACHE_CONTROL: &str = "public, max-age=31536000";

/// Outcome attached to every request handled by the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum ProxyStatus {
    HIT,
    NEGATIVE_HIT,
    MISS,
    NEGATIVE_MISS,
    BLACKLISTED,
    ALWAYS_REDIRECT,
    BAD_REQUEST,
    ERROR,
}

impl ProxyStatus {
    pub const ALL: [ProxyStatus; 8] = [
        ProxyStatus::HIT,
        ProxyStatus::NEGATIVE_HIT,
        ProxyStatus::MISS,
        ProxyStatus::NEGATIVE_MISS,
        ProxyStatus::BLACKLISTED,
        ProxyStatus::ALWAYS_REDIRECT,
        ProxyStatus::BAD_REQUEST,
        ProxyStatus::ERROR,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStatus::HIT => "HIT",
            ProxyStatus::NEGATIVE_HIT => "NEGATIVE_HIT",
            ProxyStatus::MISS => "MISS",
            ProxyStatus::NEGATIVE_MISS => "NEGATIVE_MISS",
            ProxyStatus::BLACKLISTED => "BLACKLISTED",
            ProxyStatus::ALWAYS_REDIRECT => "ALWAYS_REDIRECT",
            ProxyStatus::BAD_REQUEST => "BAD_REQUEST",
            ProxyStatus::ERROR => "ERROR",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True for 200..=299
pub fn is_success_status(status: u16) -> bool {
    (200..=299).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names_match_header_values() {
        assert_eq!(ProxyStatus::NEGATIVE_MISS.to_string(), "NEGATIVE_MISS");
        assert_eq!(ProxyStatus::ALWAYS_REDIRECT.as_str(), "ALWAYS_REDIRECT");
        for (i, status) in ProxyStatus::ALL.iter().enumerate() {
            assert_eq!(status.index(), i);
        }
    }

    #[test]
    fn test_success_range() {
        assert!(is_success_status(200));
        assert!(is_success_status(299));
        assert!(!is_success_status(199));
        assert!(!is_success_status(300));
        assert!(!is_success_status(404));
    }
}
