//! Upstream Registry Module
//!
//! Resolves request paths to the upstream repository configured for their
//! leading path prefix.

use crate::{ProxyError, Result};
use hyper::Uri;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::HashSet;
use std::fmt;
use tracing::info;

/// Characters escaped when a decoded request path is forwarded upstream
const UPSTREAM_PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'%');

/// One configured upstream repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamServer {
    /// Normalized prefix with a single leading slash, e.g. `/repo1.maven.org/maven2`
    pub prefix: String,
    /// Absolute base URI, always ending with `/`
    pub base_uri: String,
    pub validate_content_type: bool,
}

impl UpstreamServer {
    /// Join the base URI with the part of the request path below the prefix
    pub fn upstream_uri(&self, remaining_path: &str) -> Result<Uri> {
        let encoded = utf8_percent_encode(
            remaining_path.trim_start_matches('/'),
            UPSTREAM_PATH_ENCODE_SET,
        );
        let uri = format!("{}{}", self.base_uri, encoded);
        uri.parse::<Uri>()
            .map_err(|e| ProxyError::InvalidPath(format!("Invalid upstream URI '{}': {}", uri, e)))
    }
}

impl fmt::Display for UpstreamServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.prefix, self.base_uri)?;
        if self.validate_content_type {
            f.write_str(" (content type validation)")?;
        }
        Ok(())
    }
}

/// Prefix table, checked longest prefix first
#[derive(Debug, Clone)]
pub struct UpstreamRegistry {
    servers: Vec<UpstreamServer>,
}

impl UpstreamRegistry {
    /// Build the registry from `prefix[=baseUri]` entries.
    ///
    /// A prefix without `=` maps to `https://{prefix}/`. Every entry of
    /// `validation_prefixes` must name one of the declared prefixes.
    pub fn new(prefixes: &[String], validation_prefixes: &[String]) -> Result<Self> {
        let mut servers = Vec::with_capacity(prefixes.len());
        let mut seen = HashSet::new();

        for entry in prefixes {
            let trimmed = entry.trim().trim_matches('/');
            if trimmed.is_empty() {
                return Err(ProxyError::ConfigError(format!("Prefix is empty: '{}'", entry)));
            }

            let (prefix, base) = match trimmed.split_once('=') {
                Some((prefix, base)) => (prefix.trim_matches('/'), base.trim().to_string()),
                None => (trimmed, format!("https://{}/", trimmed)),
            };
            if prefix.is_empty() {
                return Err(ProxyError::ConfigError(format!("Prefix is empty: '{}'", entry)));
            }

            let base_uri = normalize_base_uri(&base)?;
            let prefix = format!("/{}", prefix);
            if !seen.insert(prefix.clone()) {
                return Err(ProxyError::ConfigError(format!(
                    "Prefix declared more than once: '{}'",
                    prefix
                )));
            }

            servers.push(UpstreamServer {
                prefix,
                base_uri,
                validate_content_type: false,
            });
        }

        for entry in validation_prefixes {
            let wanted = format!("/{}", entry.trim().trim_matches('/'));
            let server = servers
                .iter_mut()
                .find(|s| s.prefix == wanted)
                .ok_or_else(|| {
                    ProxyError::ConfigError(format!(
                        "Content type validation prefix '{}' is not a declared prefix",
                        entry
                    ))
                })?;
            server.validate_content_type = true;
        }

        servers.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        for server in &servers {
            info!("Upstream: {}", server);
        }

        Ok(Self { servers })
    }

    /// Find the upstream for a decoded request path, returning it together
    /// with the path remainder below the prefix (empty or starting with `/`).
    pub fn resolve<'a>(&'a self, request_path: &'a str) -> Option<(&'a UpstreamServer, &'a str)> {
        self.servers.iter().find_map(|server| {
            let rest = request_path.strip_prefix(server.prefix.as_str())?;
            if rest.is_empty() || rest.starts_with('/') {
                Some((server, rest))
            } else {
                None
            }
        })
    }

    pub fn servers(&self) -> &[UpstreamServer] {
        &self.servers
    }
}

fn normalize_base_uri(base: &str) -> Result<String> {
    let uri = base
        .parse::<Uri>()
        .map_err(|e| ProxyError::ConfigError(format!("Invalid upstream URI '{}': {}", base, e)))?;

    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => {
            return Err(ProxyError::ConfigError(format!(
                "Upstream URI must be http or https: '{}'",
                base
            )))
        }
    }
    if uri.authority().is_none() {
        return Err(ProxyError::ConfigError(format!(
            "Upstream URI has no host: '{}'",
            base
        )));
    }

    Ok(format!("{}/", base.trim_end_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_base_uri() {
        let registry = UpstreamRegistry::new(&strings(&["/repo1.maven.org/maven2"]), &[]).unwrap();
        let (server, rest) = registry.resolve("/repo1.maven.org/maven2/org/a.jar").unwrap();
        assert_eq!(server.base_uri, "https://repo1.maven.org/maven2/");
        assert_eq!(rest, "/org/a.jar");
        assert_eq!(
            server.upstream_uri(rest).unwrap().to_string(),
            "https://repo1.maven.org/maven2/org/a.jar"
        );
    }

    #[test]
    fn test_longest_prefix_wins() {
        let registry = UpstreamRegistry::new(
            &strings(&["/a=http://short/", "/a/b=http://long/x"]),
            &[],
        )
        .unwrap();

        let (server, rest) = registry.resolve("/a/b/c.jar").unwrap();
        assert_eq!(server.prefix, "/a/b");
        assert_eq!(server.upstream_uri(rest).unwrap().to_string(), "http://long/x/c.jar");

        let (server, _) = registry.resolve("/a/bc/c.jar").unwrap();
        assert_eq!(server.prefix, "/a");
    }

    #[test]
    fn test_segment_boundary() {
        let registry = UpstreamRegistry::new(&strings(&["/maven=http://m/"]), &[]).unwrap();
        assert!(registry.resolve("/mavenx/a.jar").is_none());
        assert!(registry.resolve("/maven").is_some());
        assert!(registry.resolve("/other/a.jar").is_none());
    }

    #[test]
    fn test_remaining_path_is_escaped() {
        let registry = UpstreamRegistry::new(&strings(&["/m=http://m/"]), &[]).unwrap();
        let (server, rest) = registry.resolve("/m/name with spaces.jar").unwrap();
        assert_eq!(
            server.upstream_uri(rest).unwrap().to_string(),
            "http://m/name%20with%20spaces.jar"
        );
        let (server, rest) = registry.resolve("/m/@user/pkg/-/pkg+1.tgz").unwrap();
        assert_eq!(
            server.upstream_uri(rest).unwrap().to_string(),
            "http://m/@user/pkg/-/pkg+1.tgz"
        );
    }

    #[test]
    fn test_validation_prefixes() {
        let registry = UpstreamRegistry::new(
            &strings(&["/a=http://a/", "/b=http://b/"]),
            &strings(&["b/"]),
        )
        .unwrap();
        assert!(!registry.resolve("/a/x.jar").unwrap().0.validate_content_type);
        assert!(registry.resolve("/b/x.jar").unwrap().0.validate_content_type);

        let err = UpstreamRegistry::new(&strings(&["/a=http://a/"]), &strings(&["/c"]));
        assert!(matches!(err, Err(ProxyError::ConfigError(_))));
    }

    #[test]
    fn test_invalid_prefixes() {
        assert!(UpstreamRegistry::new(&strings(&["//"]), &[]).is_err());
        assert!(UpstreamRegistry::new(&strings(&["/=http://a/"]), &[]).is_err());
        assert!(UpstreamRegistry::new(&strings(&["/a=ftp://a/"]), &[]).is_err());
        assert!(UpstreamRegistry::new(&strings(&["/a=http://a/", "a/"]), &[]).is_err());
    }
}
