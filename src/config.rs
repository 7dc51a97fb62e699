//! Configuration Module
//!
//! Handles configuration loading from files, environment variables, and command-line arguments.
//! Sources are applied in that order, later ones overriding earlier ones.

use crate::upstream::UpstreamRegistry;
use crate::{ProxyError, Result};
use clap::{Arg, ArgAction, Command};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Redirects snapshot builds and Maven metadata indexes, which change under a fixed URL
pub const DEFAULT_REDIRECT_TO_REMOTE_URLS_REGEX: &str =
    r"^.*(-SNAPSHOT.*|maven-metadata\.xml(\.(md5|sha1|sha256|sha512))?)$";

/// Custom deserializer for PathBuf that expands ~ to home directory
mod pathbuf_serde {
    use serde::{Deserialize, Deserializer};
    use std::path::PathBuf;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(expand_tilde(&s))
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(s.filter(|s| !s.trim().is_empty()).map(|s| expand_tilde(&s)))
    }

    pub fn expand_tilde(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                let mut result = PathBuf::from(home);
                result.push(rest);
                return result;
            }
        }
        PathBuf::from(path)
    }
}

/// Custom deserializer for Duration from string format like "30s", "5m", "100ms"
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty duration string".to_string());
        }

        let num_end = s
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
            .map(|(i, _)| i)
            .unwrap_or(s.len());

        if num_end == 0 {
            return Err(format!("No number found in duration string: {}", s));
        }

        let num_str = &s[..num_end];
        let unit = s[num_end..].trim();

        let value: f64 = num_str
            .parse()
            .map_err(|e| format!("Failed to parse number '{}': {}", num_str, e))?;

        let duration = match unit {
            "s" | "sec" | "secs" | "second" | "seconds" => Duration::from_secs_f64(value),
            "m" | "min" | "mins" | "minute" | "minutes" => Duration::from_secs_f64(value * 60.0),
            "h" | "hr" | "hrs" | "hour" | "hours" => Duration::from_secs_f64(value * 3600.0),
            "ms" | "millis" | "millisecond" | "milliseconds" => {
                Duration::from_secs_f64(value / 1000.0)
            }
            "" => Duration::from_secs_f64(value), // Default to seconds if no unit
            _ => return Err(format!("Unknown duration unit: {}", unit)),
        };

        Ok(duration)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub upstream_client: UpstreamClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            port: default_port(),
        }
    }
}

/// Caching behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// `prefix[=baseUri]` entries
    #[serde(default)]
    pub prefixes: Vec<String>,
    /// Prefixes whose upstream must not answer binary paths with text/html or text/plain
    #[serde(default)]
    pub content_type_validation_prefixes: Vec<String>,
    /// Root of the artifact cache. Must exist.
    #[serde(default, deserialize_with = "pathbuf_serde::deserialize")]
    pub local_cache_path: PathBuf,
    #[serde(default = "default_minimum_free_disk_space_mb")]
    pub minimum_free_disk_space_mb: u64,
    #[serde(
        deserialize_with = "duration_serde::deserialize",
        default = "default_upstream_timeout"
    )]
    pub upstream_timeout: Duration,
    #[serde(default)]
    pub blacklist_url_regex: Option<String>,
    #[serde(default = "default_redirect_to_remote_urls_regex")]
    pub redirect_to_remote_urls_regex: Option<String>,
}

fn default_minimum_free_disk_space_mb() -> u64 {
    1024
}

fn default_upstream_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_redirect_to_remote_urls_regex() -> Option<String> {
    Some(DEFAULT_REDIRECT_TO_REMOTE_URLS_REGEX.to_string())
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            prefixes: Vec::new(),
            content_type_validation_prefixes: Vec::new(),
            local_cache_path: PathBuf::new(),
            minimum_free_disk_space_mb: default_minimum_free_disk_space_mb(),
            upstream_timeout: default_upstream_timeout(),
            blacklist_url_regex: None,
            redirect_to_remote_urls_regex: default_redirect_to_remote_urls_regex(),
        }
    }
}

impl ProxyConfig {
    pub fn blacklist_regex(&self) -> Result<Option<Regex>> {
        compile_optional_regex(self.blacklist_url_regex.as_deref())
    }

    pub fn redirect_regex(&self) -> Result<Option<Regex>> {
        compile_optional_regex(self.redirect_to_remote_urls_regex.as_deref())
    }

    pub fn upstream_registry(&self) -> Result<UpstreamRegistry> {
        UpstreamRegistry::new(&self.prefixes, &self.content_type_validation_prefixes)
    }

    /// Check everything the proxy needs at startup
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.local_cache_path.as_os_str().is_empty() {
            return Err("local_cache_path must be set".to_string());
        }
        if !self.local_cache_path.is_dir() {
            return Err(format!(
                "local_cache_path doesn't exist or is not a directory: {}",
                self.local_cache_path.display()
            ));
        }
        if self.prefixes.is_empty() {
            return Err("at least one prefix must be configured".to_string());
        }
        if self.upstream_timeout.is_zero() {
            return Err("upstream_timeout must be greater than zero".to_string());
        }
        self.blacklist_regex()
            .map_err(|e| format!("invalid blacklist_url_regex: {}", e))?;
        self.redirect_regex()
            .map_err(|e| format!("invalid redirect_to_remote_urls_regex: {}", e))?;
        self.upstream_registry().map_err(|e| e.to_string())?;
        Ok(())
    }
}

fn compile_optional_regex(pattern: Option<&str>) -> Result<Option<Regex>> {
    match pattern.map(str::trim) {
        None | Some("") => Ok(None),
        Some(p) => Ok(Some(Regex::new(p)?)),
    }
}

/// Outbound client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamClientConfig {
    /// Retries after the first attempt for connection failures and 502/503/504
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(
        deserialize_with = "duration_serde::deserialize",
        default = "default_initial_backoff"
    )]
    pub initial_backoff: Duration,
    #[serde(
        deserialize_with = "duration_serde::deserialize",
        default = "default_max_backoff"
    )]
    pub max_backoff: Duration,
    #[serde(
        deserialize_with = "duration_serde::deserialize",
        default = "default_connect_timeout"
    )]
    pub connect_timeout: Duration,
    #[serde(
        deserialize_with = "duration_serde::deserialize",
        default = "default_pool_idle_timeout"
    )]
    pub pool_idle_timeout: Duration,
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,
}

fn default_max_retries() -> usize {
    2
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_pool_idle_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_max_idle_per_host() -> usize {
    32
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            connect_timeout: default_connect_timeout(),
            pool_idle_timeout: default_pool_idle_timeout(),
            max_idle_per_host: default_max_idle_per_host(),
        }
    }
}

impl UpstreamClientConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be greater than zero".to_string());
        }
        if self.initial_backoff > self.max_backoff {
            return Err(format!(
                "initial_backoff ({:?}) must not exceed max_backoff ({:?})",
                self.initial_backoff, self.max_backoff
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily rolling application logs; console only when unset
    #[serde(default, deserialize_with = "pathbuf_serde::deserialize_option")]
    pub app_log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            app_log_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and command line
    pub fn load() -> Result<Self> {
        let matches = Self::build_cli().get_matches();

        let mut config = match matches.get_one::<String>("config") {
            Some(config_path) => Self::load_from_file(config_path)?,
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.apply_cli_overrides(&matches)?;
        config.validate()?;

        info!(
            "Listening on {}:{}, cache at {}",
            config.server.listen_address,
            config.server.port,
            config.proxy.local_cache_path.display()
        );
        info!(
            "Upstream timeout {:?}, minimum free disk space {} MB",
            config.proxy.upstream_timeout, config.proxy.minimum_free_disk_space_mb
        );
        info!(
            "Blacklist: {:?}, always redirect: {:?}",
            config.proxy.blacklist_url_regex, config.proxy.redirect_to_remote_urls_regex
        );
        info!(
            "Upstream client: max_retries={}, backoff={:?}..{:?}, connect_timeout={:?}",
            config.upstream_client.max_retries,
            config.upstream_client.initial_backoff,
            config.upstream_client.max_backoff,
            config.upstream_client.connect_timeout
        );
        debug!("Configuration: {:?}", config);

        Ok(config)
    }

    /// Build CLI argument parser
    fn build_cli() -> Command {
        Command::new("artifact-caching-proxy")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Caching reverse proxy for binary artifact repositories")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path"),
            )
            .arg(
                Arg::new("listen-address")
                    .long("listen-address")
                    .value_name("ADDR")
                    .help("Listen address (default: 0.0.0.0)"),
            )
            .arg(
                Arg::new("port")
                    .short('p')
                    .long("port")
                    .value_name("PORT")
                    .help("HTTP port (default: 8080)"),
            )
            .arg(
                Arg::new("cache-dir")
                    .long("cache-dir")
                    .value_name("DIR")
                    .help("Local cache directory, must exist"),
            )
            .arg(
                Arg::new("prefix")
                    .long("prefix")
                    .value_name("PREFIX[=URI]")
                    .action(ArgAction::Append)
                    .help("Upstream prefix, may be repeated; replaces configured prefixes"),
            )
            .arg(
                Arg::new("log-level")
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (default: info)"),
            )
    }

    /// Load configuration from YAML file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::ConfigError(format!("Failed to read config file {}: {}", path, e))
        })?;

        let config = Self::from_yaml(&content).map_err(|e| {
            ProxyError::ConfigError(format!("Failed to parse config file {}: {}", path, e))
        })?;

        info!("Configuration loaded from file: {}", path);
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply environment variable overrides, reading variables through `var`
    pub fn apply_env_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("PORT") {
            self.server.port = parse_value("PORT", &port)?;
        }

        if let Some(path) = var("LOCAL_CACHE_PATH") {
            self.proxy.local_cache_path = pathbuf_serde::expand_tilde(path.trim());
        }

        if let Some(prefixes) = var("PREFIXES") {
            self.proxy.prefixes = split_list(&prefixes);
        }

        if let Some(prefixes) = var("CONTENT_TYPE_VALIDATION_PREFIXES") {
            self.proxy.content_type_validation_prefixes = split_list(&prefixes);
        }

        if let Some(mb) = var("MINIMUM_FREE_DISK_SPACE_MB") {
            self.proxy.minimum_free_disk_space_mb = parse_value("MINIMUM_FREE_DISK_SPACE_MB", &mb)?;
        }

        if let Some(timeout) = var("UPSTREAM_TIMEOUT") {
            self.proxy.upstream_timeout = duration_serde::parse_duration(&timeout).map_err(|e| {
                ProxyError::ConfigError(format!("Invalid UPSTREAM_TIMEOUT '{}': {}", timeout, e))
            })?;
        }

        // An empty value disables the rule
        if let Some(regex) = var("BLACKLIST_URL_REGEX") {
            self.proxy.blacklist_url_regex = Some(regex);
        }

        if let Some(regex) = var("REDIRECT_TO_REMOTE_URLS_REGEX") {
            self.proxy.redirect_to_remote_urls_regex = Some(regex);
        }

        if let Some(level) = var("LOG_LEVEL") {
            self.logging.log_level = level;
        }

        if let Some(dir) = var("APP_LOG_DIR") {
            self.logging.app_log_dir = Some(pathbuf_serde::expand_tilde(dir.trim()));
        }

        Ok(())
    }

    /// Apply command line argument overrides
    fn apply_cli_overrides(&mut self, matches: &clap::ArgMatches) -> Result<()> {
        if let Some(address) = matches.get_one::<String>("listen-address") {
            self.server.listen_address = address.clone();
        }

        if let Some(port) = matches.get_one::<String>("port") {
            self.server.port = parse_value("--port", port)?;
        }

        if let Some(cache_dir) = matches.get_one::<String>("cache-dir") {
            self.proxy.local_cache_path = pathbuf_serde::expand_tilde(cache_dir);
        }

        if let Some(prefixes) = matches.get_many::<String>("prefix") {
            self.proxy.prefixes = prefixes.cloned().collect();
        }

        if let Some(level) = matches.get_one::<String>("log-level") {
            self.logging.log_level = level.clone();
        }

        Ok(())
    }

    /// Validate the merged configuration. Errors are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        self.proxy
            .validate()
            .map_err(|e| ProxyError::ConfigError(format!("Invalid proxy configuration: {}", e)))?;
        self.upstream_client.validate().map_err(|e| {
            ProxyError::ConfigError(format!("Invalid upstream client configuration: {}", e))
        })?;
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ProxyError::ConfigError(format!("Invalid {} '{}': {}", name, value, e)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_duration() {
        use duration_serde::parse_duration;
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("3 weeks").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.proxy.minimum_free_disk_space_mb, 1024);
        assert_eq!(config.proxy.upstream_timeout, Duration::from_secs(30));
        assert!(config.proxy.blacklist_regex().unwrap().is_none());
        assert_eq!(config.upstream_client.max_retries, 2);

        let redirect = config.proxy.redirect_regex().unwrap().unwrap();
        assert!(redirect.is_match("org/a/1.0-SNAPSHOT/a-1.0-SNAPSHOT.jar"));
        assert!(redirect.is_match("org/a/maven-metadata.xml"));
        assert!(redirect.is_match("org/a/maven-metadata.xml.sha256"));
        assert!(!redirect.is_match("org/a/1.0/a-1.0.jar"));
        assert!(!redirect.is_match("org/a/maven-metadata.xml.asc"));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
server:
  port: 9000
proxy:
  prefixes:
    - "/repo1.maven.org/maven2"
    - "/plugins=https://plugins.gradle.org/m2"
  content_type_validation_prefixes: ["/plugins"]
  local_cache_path: "/var/cache/artifacts"
  upstream_timeout: "45s"
  blacklist_url_regex: "^.*\\.xml$"
upstream_client:
  initial_backoff: "50ms"
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.listen_address, "0.0.0.0");
        assert_eq!(config.proxy.prefixes.len(), 2);
        assert_eq!(config.proxy.upstream_timeout, Duration::from_secs(45));
        assert_eq!(
            config.proxy.local_cache_path,
            PathBuf::from("/var/cache/artifacts")
        );
        assert!(config.proxy.blacklist_regex().unwrap().unwrap().is_match("a/b.xml"));
        assert_eq!(config.upstream_client.initial_backoff, Duration::from_millis(50));
        assert_eq!(config.upstream_client.max_backoff, Duration::from_secs(5));
        assert!(config.proxy.redirect_to_remote_urls_regex.is_some());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[
                ("PORT", "8181"),
                ("PREFIXES", "/a=http://a/, /b"),
                ("CONTENT_TYPE_VALIDATION_PREFIXES", "/b"),
                ("UPSTREAM_TIMEOUT", "5s"),
                ("REDIRECT_TO_REMOTE_URLS_REGEX", ""),
                ("LOG_LEVEL", "debug"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 8181);
        assert_eq!(config.proxy.prefixes, vec!["/a=http://a/", "/b"]);
        assert_eq!(config.proxy.content_type_validation_prefixes, vec!["/b"]);
        assert_eq!(config.proxy.upstream_timeout, Duration::from_secs(5));
        assert!(config.proxy.redirect_regex().unwrap().is_none());
        assert_eq!(config.logging.log_level, "debug");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        assert!(config.apply_env_overrides(env(&[("PORT", "eighty")])).is_err());
        assert!(config
            .apply_env_overrides(env(&[("UPSTREAM_TIMEOUT", "soon")]))
            .is_err());
    }

    #[test]
    fn test_validation() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.proxy.local_cache_path = dir.path().to_path_buf();
        assert!(config.validate().is_err(), "no prefixes");

        config.proxy.prefixes = vec!["/a=http://a/".to_string()];
        config.validate().unwrap();

        config.proxy.content_type_validation_prefixes = vec!["/missing".to_string()];
        assert!(config.validate().is_err());
        config.proxy.content_type_validation_prefixes.clear();

        config.proxy.blacklist_url_regex = Some("(".to_string());
        assert!(config.validate().is_err());
        config.proxy.blacklist_url_regex = None;

        config.proxy.local_cache_path = dir.path().join("does-not-exist");
        assert!(config.validate().is_err());
    }
}
