//! Upstream Client Module
//!
//! Pooled hyper client used to fetch artifacts from upstream repositories,
//! with a bounded number of retries for transient failures. Redirects are
//! followed up to a fixed hop count.

use crate::config::UpstreamClientConfig;
use crate::https_connector::UpstreamConnector;
use crate::{ProxyError, Result};
use bytes::Bytes;
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::header::LOCATION;
use hyper::http::uri::Scheme;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("artifact-caching-proxy/", env!("CARGO_PKG_VERSION"));

/// Redirect hops followed before the last 3xx is handed back as is
pub const MAX_REDIRECTS: usize = 10;

/// Retry schedule for transient upstream failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Outbound client shared by all requests
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<UpstreamConnector, Empty<Bytes>>,
    retry_policy: RetryPolicy,
    request_timeout: Duration,
}

impl UpstreamClient {
    /// Build the client. `request_timeout` bounds the time until response
    /// headers arrive, retries included, and the wait for each body chunk.
    pub fn new(config: &UpstreamClientConfig, request_timeout: Duration) -> Result<Self> {
        let connector = UpstreamConnector::with_native_roots(config.connect_timeout)?;

        debug!(
            "Creating upstream client (pool_idle_timeout: {:?}, max_idle_per_host: {}, timeout: {:?})",
            config.pool_idle_timeout, config.max_idle_per_host, request_timeout
        );

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build(connector);

        Ok(Self {
            client,
            retry_policy: RetryPolicy {
                max_retries: config.max_retries,
                initial_delay: config.initial_backoff,
                max_delay: config.max_backoff,
                ..RetryPolicy::default()
            },
            request_timeout,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Send `method` to `uri` and return once response headers arrived.
    ///
    /// Redirects are followed up to `MAX_REDIRECTS` hops. Expiry of the
    /// request timeout yields `TimeoutError`; any other transport failure
    /// surfaces after the retries are exhausted.
    pub async fn fetch(&self, method: &Method, uri: &Uri) -> Result<Response<Incoming>> {
        tokio::time::timeout(self.request_timeout, self.fetch_following_redirects(method, uri))
            .await
            .map_err(|_| {
                ProxyError::TimeoutError(format!(
                    "No response from {} within {:?}",
                    uri, self.request_timeout
                ))
            })?
    }

    async fn fetch_following_redirects(
        &self,
        method: &Method,
        uri: &Uri,
    ) -> Result<Response<Incoming>> {
        let mut current = uri.clone();
        let mut hops = 0;

        loop {
            let response = self.fetch_with_retries(method, &current).await?;
            let Some(next) = redirect_target(&current, &response) else {
                return Ok(response);
            };

            if hops == MAX_REDIRECTS {
                warn!("Giving up on {} after {} redirects", uri, MAX_REDIRECTS);
                return Ok(response);
            }
            if is_downgrade(&current, &next) {
                warn!("Refusing redirect from {} to insecure {}", current, next);
                return Ok(response);
            }

            debug!("{} redirected ({}) to {}", current, response.status(), next);
            drop(response);
            current = next;
            hops += 1;
        }
    }

    async fn fetch_with_retries(&self, method: &Method, uri: &Uri) -> Result<Response<Incoming>> {
        let max_retries = self.retry_policy.max_retries;
        let mut attempt = 0;

        loop {
            let start_time = Instant::now();
            match self.try_fetch(method, uri).await {
                Ok(response) if attempt < max_retries && is_retryable_status(response.status()) => {
                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    warn!(
                        "Upstream {} answered {} on attempt {}, retrying in {:?}",
                        uri,
                        response.status(),
                        attempt + 1,
                        delay
                    );
                    drop(response);
                    tokio::time::sleep(delay).await;
                }
                Ok(response) => {
                    debug!(
                        "{} {} -> {} in {:?}",
                        method,
                        uri,
                        response.status(),
                        start_time.elapsed()
                    );
                    return Ok(response);
                }
                Err(e) if attempt < max_retries && e.is_transient() => {
                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    warn!(
                        "Request attempt {} to {} failed, retrying in {:?}: {}",
                        attempt + 1,
                        uri,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
            attempt += 1;
        }
    }

    async fn try_fetch(&self, method: &Method, uri: &Uri) -> Result<Response<Incoming>> {
        let request = Request::builder()
            .method(method.clone())
            .uri(uri.clone())
            .header(hyper::header::USER_AGENT, USER_AGENT)
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProxyError::HttpError(format!("Failed to build request: {}", e)))?;

        self.client.request(request).await.map_err(|e| {
            if e.is_connect() {
                ProxyError::ConnectionError(format!("Failed to connect to {}: {}", uri, e))
            } else {
                ProxyError::HttpError(format!("Failed to send request to {}: {}", uri, e))
            }
        })
    }
}

/// Where a redirect response points, resolved against `current`.
///
/// Returns `None` for non-redirect statuses, a missing or unusable
/// `Location`, and targets that are not http or https.
fn redirect_target<B>(current: &Uri, response: &Response<B>) -> Option<Uri> {
    if !matches!(
        response.status(),
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return None;
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?.trim();
    resolve_location(current, location)
}

fn resolve_location(current: &Uri, location: &str) -> Option<Uri> {
    if location.is_empty() {
        return None;
    }
    let scheme = current.scheme_str()?;
    let authority = current.authority()?;

    let resolved = if location.starts_with("//") {
        format!("{}:{}", scheme, location)
    } else if has_scheme(location) {
        location.to_string()
    } else {
        let (path, query) = match location.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (location, None),
        };
        let joined = if path.starts_with('/') {
            path.to_string()
        } else {
            let base = current.path();
            format!("{}{}", &base[..base.rfind('/').map_or(0, |i| i + 1)], path)
        };
        let mut resolved = format!("{}://{}{}", scheme, authority, remove_dot_segments(&joined));
        if let Some(query) = query {
            resolved.push('?');
            resolved.push_str(query);
        }
        resolved
    };

    let uri: Uri = resolved.parse().ok()?;
    match uri.scheme() {
        Some(s) if *s == Scheme::HTTP || *s == Scheme::HTTPS => {
            uri.authority()?;
            Some(uri)
        }
        _ => None,
    }
}

fn has_scheme(location: &str) -> bool {
    location.split_once("://").is_some_and(|(scheme, _)| {
        scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}

fn remove_dot_segments(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let last = segments.len().saturating_sub(1);
    let mut out: Vec<&str> = Vec::new();

    for (i, segment) in segments.iter().enumerate().skip(1) {
        match *segment {
            "." | ".." => {
                if *segment == ".." {
                    out.pop();
                }
                if i == last {
                    out.push("");
                }
            }
            other => out.push(other),
        }
    }
    format!("/{}", out.join("/"))
}

fn is_downgrade(from: &Uri, to: &Uri) -> bool {
    from.scheme() == Some(&Scheme::HTTPS) && to.scheme() != Some(&Scheme::HTTPS)
}

/// Gateway-class answers that are worth another attempt
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}
