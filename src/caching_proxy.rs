//! Caching Proxy Module
//!
//! The request pipeline. For a path under a configured prefix it serves a
//! cached file, replays a cached outcome, or fetches from the upstream while
//! streaming the body to the client and into the cache at the same time.
//!
//! Steps run in a fixed order and the first one that produces a response wins:
//! health check, prefix match, method filter, cached file, path validation,
//! blacklist, always-redirect, cache path, response cache, upstream fetch,
//! status check, content-type check, content-encoding check, HEAD or GET.

use crate::cache_store::{CacheStore, PublishOutcome, GZIP_ENCODING};
use crate::config::Config;
use crate::file_responder::{content_type_for, serve_cached_file};
use crate::logging::ProxyEvent;
use crate::metrics::ProxyMetrics;
use crate::proxy_status::{
    is_success_status, ProxyStatus, CACHED_STATUS_HEADER, CACHED_UNTIL_HEADER,
    ETERNAL_CACHE_CONTROL, STATUS_HEADER,
};
use crate::response_cache::{CacheEntry, ResponseCache};
use crate::upstream::UpstreamRegistry;
use crate::upstream_client::UpstreamClient;
use crate::{ProxyError, Result};
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{
    HeaderMap, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED,
    LOCATION,
};
use hyper::http::response::Builder;
use hyper::{Method, Response, StatusCode, Uri};
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Response body used throughout the proxy
pub type ProxyBody = BoxBody<Bytes, ProxyError>;
pub type ProxyResponse = Response<ProxyBody>;

/// Disk space health check endpoint
pub const HEALTH_PATH: &str = "/health";

/// Extensions that may legitimately be served as text/html or text/plain
const ALLOWED_TEXT_FILE_EXTENSIONS: [&str; 8] = [
    ".htm", ".html", ".txt", ".sha1", ".sha256", ".sha512", ".md5", ".module",
];

const GOOD_PATH_CHARS: &str = r"^([\x20a-zA-Z_\-0-9./+@]|%20)+$";

pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// Body fed by a producer task. An `Err` item aborts the client connection.
pub fn channel_body(
    frame_rx: mpsc::Receiver<std::result::Result<Frame<Bytes>, ProxyError>>,
) -> ProxyBody {
    let frame_stream = futures::stream::unfold(frame_rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    BoxBody::new(StreamBody::new(frame_stream))
}

/// Rejects traversal and characters outside a conservative set
pub struct RequestPathValidator {
    good_chars: Regex,
}

impl RequestPathValidator {
    pub fn new() -> Result<Self> {
        Ok(Self {
            good_chars: Regex::new(GOOD_PATH_CHARS)?,
        })
    }

    /// Normalized path (forward slashes, no leading slash), or `None` if unacceptable
    pub fn normalize(&self, path: &str) -> Option<String> {
        let normalized = path.replace('\\', "/");
        let normalized = normalized.trim_start_matches('/');
        if normalized.contains("..") || !self.good_chars.is_match(normalized) {
            return None;
        }
        Some(normalized.to_string())
    }
}

/// Extension of the last path segment including the dot, e.g. `.jar`
pub fn file_extension(path: &str) -> Option<&str> {
    let leaf = &path[path.rfind('/').map(|i| i + 1).unwrap_or(0)..];
    match leaf.rfind('.') {
        Some(i) if i + 1 < leaf.len() => Some(&leaf[i..]),
        _ => None,
    }
}

/// The proxy pipeline and the components it drives
pub struct CachingProxy {
    registry: UpstreamRegistry,
    store: CacheStore,
    response_cache: Arc<ResponseCache>,
    client: UpstreamClient,
    metrics: Arc<ProxyMetrics>,
    path_validator: RequestPathValidator,
    blacklist: Option<Regex>,
    redirect_to_remote: Option<Regex>,
    minimum_free_disk_space_mb: u64,
}

/// Everything the body task needs to finish a GET miss
struct PersistJob {
    body: Incoming,
    file: tokio::fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    expected_length: Option<u64>,
    last_modified: Option<SystemTime>,
    upstream_uri: Uri,
    store: CacheStore,
    idle_timeout: Duration,
}

/// How the dual write ended
enum StreamEnd {
    Complete(u64),
    ClientGone,
    Failed(ProxyError),
}

impl CachingProxy {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_response_cache(config, Arc::new(ResponseCache::new()))
    }

    /// Build the pipeline around an existing response cache
    pub fn with_response_cache(config: &Config, response_cache: Arc<ResponseCache>) -> Result<Self> {
        config.proxy.validate().map_err(ProxyError::ConfigError)?;

        let client = UpstreamClient::new(&config.upstream_client, config.proxy.upstream_timeout)?;
        let proxy = Self {
            registry: config.proxy.upstream_registry()?,
            store: CacheStore::new(config.proxy.local_cache_path.clone()),
            response_cache,
            client,
            metrics: Arc::new(ProxyMetrics::new()),
            path_validator: RequestPathValidator::new()?,
            blacklist: config.proxy.blacklist_regex()?,
            redirect_to_remote: config.proxy.redirect_regex()?,
            minimum_free_disk_space_mb: config.proxy.minimum_free_disk_space_mb,
        };

        info!(
            "Caching proxy initialised: {} upstreams, cache at {:?}",
            proxy.registry.servers().len(),
            proxy.store.root()
        );
        Ok(proxy)
    }

    pub fn metrics(&self) -> Arc<ProxyMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn cache_store(&self) -> &CacheStore {
        &self.store
    }

    pub fn response_cache(&self) -> Arc<ResponseCache> {
        Arc::clone(&self.response_cache)
    }

    /// Handle one request for a percent-decoded `path`.
    ///
    /// `Ok(None)` means the request is not ours: no prefix matched or the
    /// method is neither GET nor HEAD.
    pub async fn handle(&self, method: &Method, path: &str) -> Result<Option<ProxyResponse>> {
        if path == HEALTH_PATH {
            return self.health_response().map(Some);
        }

        let Some((server, remaining_path)) = self.registry.resolve(path) else {
            return Ok(None);
        };

        let head_only = match *method {
            Method::GET => false,
            Method::HEAD => true,
            _ => return Ok(None),
        };

        if let Some(cached) = self.store.locate_existing(path).await {
            let response = serve_cached_file(&cached, path, head_only).await?;
            self.metrics.record(ProxyStatus::HIT);
            return Ok(Some(response));
        }

        let Some(request_path) = self.path_validator.normalize(path) else {
            return self
                .text_response(ProxyStatus::BAD_REQUEST, StatusCode::BAD_REQUEST, "Invalid request path")
                .map(Some);
        };

        let upstream_uri = match server.upstream_uri(remaining_path) {
            Ok(uri) => uri,
            Err(e) => {
                debug!("Cannot build upstream URI for {}: {}", request_path, e);
                return self
                    .text_response(ProxyStatus::BAD_REQUEST, StatusCode::BAD_REQUEST, "Invalid request path")
                    .map(Some);
            }
        };

        if self.blacklist.as_ref().is_some_and(|r| r.is_match(&request_path)) {
            return self
                .text_response(ProxyStatus::BLACKLISTED, StatusCode::NOT_FOUND, "Blacklisted")
                .map(Some);
        }

        let extension = file_extension(&request_path);
        let always_redirect = self
            .redirect_to_remote
            .as_ref()
            .is_some_and(|r| r.is_match(&request_path));
        if always_redirect || extension.is_none() {
            return self
                .tagged(ProxyStatus::ALWAYS_REDIRECT, StatusCode::TEMPORARY_REDIRECT)
                .header(LOCATION, upstream_uri.to_string())
                .body(empty_body())
                .map_err(build_error)
                .map(Some);
        }

        if self.store.resolve_cache_path(&request_path, None).is_err() {
            return self
                .text_response(ProxyStatus::BAD_REQUEST, StatusCode::BAD_REQUEST, "Invalid cache path")
                .map(Some);
        }

        if let Some(entry) = self.response_cache.get(&request_path) {
            if !entry.is_success() {
                return with_cached_entry(
                    self.tagged(ProxyStatus::NEGATIVE_HIT, StatusCode::NOT_FOUND),
                    &entry,
                )
                .body(empty_body())
                .map_err(build_error)
                .map(Some);
            }
            if head_only {
                return self.head_hit(&entry).map(Some);
            }
        }

        debug!("Downloading from {}", upstream_uri);

        let fetch_method = if head_only { Method::HEAD } else { Method::GET };
        let response = match self.client.fetch(&fetch_method, &upstream_uri).await {
            Ok(response) => response,
            Err(ProxyError::TimeoutError(msg)) => {
                warn!(
                    event = ProxyEvent::Timeout.as_str(),
                    "Timeout requesting {}: {}", upstream_uri, msg
                );
                let entry = self
                    .response_cache
                    .put_status(&request_path, StatusCode::GATEWAY_TIMEOUT.as_u16());
                return self.negative_miss(&entry).map(Some);
            }
            Err(e) => {
                warn!("Exception requesting {}: {}", upstream_uri, e);
                let entry = self
                    .response_cache
                    .put_status(&request_path, StatusCode::SERVICE_UNAVAILABLE.as_u16());
                return self.negative_miss(&entry).map(Some);
            }
        };

        let upstream_status = response.status().as_u16();
        if !is_success_status(upstream_status) {
            if response.status() != StatusCode::NOT_FOUND {
                warn!(
                    event = ProxyEvent::NegativeMiss.as_str(),
                    "Non-success requesting {}: {}", upstream_uri, upstream_status
                );
            }
            let entry = self.response_cache.put_status(&request_path, upstream_status);
            return self.negative_miss(&entry).map(Some);
        }

        // Catches upstreams answering 200 with an HTML error page
        let extension_allows_text = extension.is_some_and(|ext| {
            ALLOWED_TEXT_FILE_EXTENSIONS
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        });
        if !extension_allows_text {
            if let Some(media_type) = media_type(response.headers()) {
                if media_type == "text/html" || media_type == "text/plain" {
                    let message = format!(
                        "{} returned content type '{}' which is possibly wrong for file extension '{}'",
                        upstream_uri,
                        media_type,
                        extension.unwrap_or_default()
                    );
                    if server.validate_content_type {
                        error!(event = ProxyEvent::NotAllowedContentType.as_str(), "{}", message);
                        return self
                            .text_response(
                                ProxyStatus::ERROR,
                                StatusCode::SERVICE_UNAVAILABLE,
                                &format!(
                                    "{} returned content type '{}' which is forbidden by content type validation for file extension '{}'",
                                    upstream_uri,
                                    media_type,
                                    extension.unwrap_or_default()
                                ),
                            )
                            .map(Some);
                    }
                    warn!(event = ProxyEvent::NotAllowedContentType.as_str(), "{}", message);
                }
            }
        }

        let encodings = content_encodings(response.headers());
        if encodings.len() > 1 {
            let message = format!(
                "{} returned multiple Content-Encoding which is not allowed: {}",
                upstream_uri,
                encodings.join(", ")
            );
            error!(event = ProxyEvent::MultipleContentEncodings.as_str(), "{}", message);
            return self
                .text_response(ProxyStatus::ERROR, StatusCode::SERVICE_UNAVAILABLE, &message)
                .map(Some);
        }
        let content_encoding = match encodings.first() {
            None => None,
            Some(encoding) if encoding.eq_ignore_ascii_case(GZIP_ENCODING) => Some(GZIP_ENCODING),
            Some(encoding) => {
                let message = format!(
                    "{} returned Content-Encoding '{}' which is not supported",
                    upstream_uri, encoding
                );
                error!(event = ProxyEvent::NotSupportedContentEncoding.as_str(), "{}", message);
                return self
                    .text_response(ProxyStatus::ERROR, StatusCode::SERVICE_UNAVAILABLE, &message)
                    .map(Some);
            }
        };

        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok());
        let content_type = content_type_for(&request_path);

        if head_only {
            let entry = self.response_cache.put(
                &request_path,
                upstream_status,
                last_modified,
                Some(content_type.clone()),
                content_encoding.map(str::to_string),
                content_length,
            );
            let builder = with_cached_entry(
                self.tagged(ProxyStatus::MISS, StatusCode::OK),
                &entry,
            );
            return with_content_headers(
                builder,
                Some(content_type.as_str()),
                content_length,
                last_modified,
                content_encoding,
            )
            .body(empty_body())
            .map_err(build_error)
            .map(Some);
        }

        let final_path = match self.store.resolve_cache_path(&request_path, content_encoding) {
            Ok(path) => path,
            Err(_) => {
                return self
                    .text_response(ProxyStatus::BAD_REQUEST, StatusCode::BAD_REQUEST, "Invalid cache path")
                    .map(Some)
            }
        };
        let (temp_path, file) = self.store.create_temp_file(&final_path).await?;

        let (frame_tx, frame_rx) = mpsc::channel(8);
        let job = PersistJob {
            body: response.into_body(),
            file,
            temp_path,
            final_path,
            expected_length: content_length,
            last_modified,
            upstream_uri,
            store: self.store.clone(),
            idle_timeout: self.client.request_timeout(),
        };
        tokio::spawn(stream_and_persist(job, frame_tx));

        let builder = self
            .tagged(ProxyStatus::MISS, StatusCode::OK)
            .header(CACHE_CONTROL, ETERNAL_CACHE_CONTROL);
        with_content_headers(
            builder,
            Some(content_type.as_str()),
            content_length,
            last_modified,
            content_encoding,
        )
        .body(channel_body(frame_rx))
        .map_err(build_error)
        .map(Some)
    }

    fn health_response(&self) -> Result<ProxyResponse> {
        let available_mb = self.store.available_space_mb()?;
        if available_mb < self.minimum_free_disk_space_mb {
            let message = format!(
                "Not Enough Free Disk Space. {} MB is free at {}, but minimum is {} MB",
                available_mb,
                self.store.root().display(),
                self.minimum_free_disk_space_mb
            );
            error!(event = ProxyEvent::NotEnoughFreeDiskSpace.as_str(), "{}", message);
            return Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(CONTENT_TYPE, "text/plain")
                .body(full_body(message))
                .map_err(build_error);
        }

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/plain")
            .body(full_body("OK"))
            .map_err(build_error)
    }

    fn head_hit(&self, entry: &CacheEntry) -> Result<ProxyResponse> {
        let builder = with_cached_entry(self.tagged(ProxyStatus::HIT, StatusCode::OK), entry);
        with_content_headers(
            builder,
            entry.content_type.as_deref(),
            entry.content_length,
            entry.last_modified,
            entry.content_encoding.as_deref(),
        )
        .body(empty_body())
        .map_err(build_error)
    }

    fn negative_miss(&self, entry: &CacheEntry) -> Result<ProxyResponse> {
        with_cached_entry(
            self.tagged(ProxyStatus::NEGATIVE_MISS, StatusCode::NOT_FOUND),
            entry,
        )
        .body(empty_body())
        .map_err(build_error)
    }

    fn text_response(
        &self,
        outcome: ProxyStatus,
        status: StatusCode,
        message: &str,
    ) -> Result<ProxyResponse> {
        self.tagged(outcome, status)
            .header(CONTENT_TYPE, "text/plain")
            .body(full_body(message.to_string()))
            .map_err(build_error)
    }

    /// Response builder carrying the outcome tag; counts the outcome
    fn tagged(&self, outcome: ProxyStatus, status: StatusCode) -> Builder {
        self.metrics.record(outcome);
        Response::builder()
            .status(status)
            .header(STATUS_HEADER, outcome.as_str())
    }
}

fn with_cached_entry(builder: Builder, entry: &CacheEntry) -> Builder {
    let builder = builder
        .header(CACHED_STATUS_HEADER, entry.status.to_string())
        .header(CACHED_UNTIL_HEADER, httpdate::fmt_http_date(entry.cache_until));
    if entry.is_success() {
        builder.header(CACHE_CONTROL, ETERNAL_CACHE_CONTROL)
    } else {
        builder
    }
}

fn with_content_headers(
    mut builder: Builder,
    content_type: Option<&str>,
    content_length: Option<u64>,
    last_modified: Option<SystemTime>,
    content_encoding: Option<&str>,
) -> Builder {
    if let Some(content_type) = content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    if let Some(length) = content_length {
        builder = builder.header(CONTENT_LENGTH, length);
    }
    if let Some(modified) = last_modified {
        builder = builder.header(LAST_MODIFIED, httpdate::fmt_http_date(modified));
    }
    if let Some(encoding) = content_encoding {
        builder = builder.header(CONTENT_ENCODING, encoding);
    }
    builder
}

fn build_error(e: hyper::http::Error) -> ProxyError {
    ProxyError::HttpError(format!("Failed to build response: {}", e))
}

/// Media type of the upstream Content-Type, lowercased, without parameters
fn media_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let media_type = value.split(';').next()?.trim().to_ascii_lowercase();
    (!media_type.is_empty()).then_some(media_type)
}

/// Every token of every Content-Encoding header
fn content_encodings(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Copy the upstream body to the client and the temp file, then publish the
/// temp file. The client body ends only after publishing; any failure turns
/// into an error frame, which aborts the client connection.
async fn stream_and_persist(
    job: PersistJob,
    frame_tx: mpsc::Sender<std::result::Result<Frame<Bytes>, ProxyError>>,
) {
    let PersistJob {
        body,
        file,
        temp_path,
        final_path,
        expected_length,
        last_modified,
        upstream_uri,
        store,
        idle_timeout,
    } = job;

    let failure = match copy_to_client_and_file(body, file, &frame_tx, idle_timeout).await {
        StreamEnd::ClientGone => {
            debug!("Client disconnected while downloading {}", upstream_uri);
            None
        }
        StreamEnd::Failed(e) => {
            warn!("Download of {} failed: {}", upstream_uri, e);
            Some(e)
        }
        StreamEnd::Complete(written) => finish_download(
            &store,
            &temp_path,
            &final_path,
            written,
            expected_length,
            last_modified,
            &upstream_uri,
        )
        .await
        .err(),
    };

    // The temp file is gone before the client sees the end of the body
    remove_temp_file(&temp_path).await;

    if let Some(e) = failure {
        let _ = frame_tx.send(Err(e)).await;
    }
}

async fn copy_to_client_and_file(
    mut body: Incoming,
    mut file: tokio::fs::File,
    frame_tx: &mpsc::Sender<std::result::Result<Frame<Bytes>, ProxyError>>,
    idle_timeout: Duration,
) -> StreamEnd {
    let mut written: u64 = 0;

    loop {
        let frame = match tokio::time::timeout(idle_timeout, body.frame()).await {
            Err(_) => {
                return StreamEnd::Failed(ProxyError::TimeoutError(format!(
                    "No data from upstream for {:?}",
                    idle_timeout
                )))
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                return StreamEnd::Failed(ProxyError::HttpError(format!(
                    "Upstream body error: {}",
                    e
                )))
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let Ok(data) = frame.into_data() else {
            continue;
        };

        if let Err(e) = file.write_all(&data).await {
            return StreamEnd::Failed(ProxyError::CacheError(format!(
                "Failed to write cache file: {}",
                e
            )));
        }
        written += data.len() as u64;

        if frame_tx.send(Ok(Frame::data(data))).await.is_err() {
            return StreamEnd::ClientGone;
        }
    }

    if let Err(e) = file.flush().await {
        return StreamEnd::Failed(ProxyError::CacheError(format!(
            "Failed to flush cache file: {}",
            e
        )));
    }
    StreamEnd::Complete(written)
}

async fn finish_download(
    store: &CacheStore,
    temp_path: &std::path::Path,
    final_path: &std::path::Path,
    written: u64,
    expected_length: Option<u64>,
    last_modified: Option<SystemTime>,
    upstream_uri: &Uri,
) -> Result<()> {
    if let Some(expected) = expected_length {
        if expected != written {
            warn!(
                event = ProxyEvent::NotMatchedContentLength.as_str(),
                "Expected {} bytes from Content-Length, but downloaded {}: {}",
                expected,
                written,
                upstream_uri
            );
            return Err(ProxyError::HttpError(format!(
                "Content-Length mismatch for {}: expected {}, got {}",
                upstream_uri, expected, written
            )));
        }
    }

    if let Some(modified) = last_modified {
        filetime::set_file_mtime(temp_path, filetime::FileTime::from_system_time(modified))
            .map_err(|e| {
                ProxyError::CacheError(format!("Failed to set mtime on {:?}: {}", temp_path, e))
            })?;
    }

    match store.publish(temp_path, final_path).await {
        Ok(PublishOutcome::Published) => {
            debug!("Cached {} ({} bytes) at {:?}", upstream_uri, written, final_path);
            Ok(())
        }
        Ok(PublishOutcome::AlreadyPresent) => Ok(()),
        Err(e) => {
            error!("Failed to cache {}: {}", upstream_uri, e);
            Err(e)
        }
    }
}

async fn remove_temp_file(temp_path: &std::path::Path) {
    match tokio::fs::remove_file(temp_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!(
            event = ProxyEvent::CleanupFailed.as_str(),
            "Failed to remove temp file {:?}: {}", temp_path, e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("a/b/c.jar"), Some(".jar"));
        assert_eq!(file_extension("a/b.d/c"), None);
        assert_eq!(file_extension("a/b/c."), None);
        assert_eq!(file_extension("a/b/"), None);
        assert_eq!(file_extension("a/pkg-3.1.2.tgz"), Some(".tgz"));
    }

    #[test]
    fn test_path_validator() {
        let validator = RequestPathValidator::new().unwrap();
        assert_eq!(
            validator.normalize("/m/org/a/1.0/a-1.0.jar").as_deref(),
            Some("m/org/a/1.0/a-1.0.jar")
        );
        assert_eq!(
            validator.normalize("/m/name with spaces.jar").as_deref(),
            Some("m/name with spaces.jar")
        );
        assert_eq!(
            validator.normalize("/m/@user/pkg/-/pkg+1.tgz").as_deref(),
            Some("m/@user/pkg/-/pkg+1.tgz")
        );
        assert_eq!(validator.normalize("\\m\\a.jar").as_deref(), Some("m/a.jar"));
        assert!(validator.normalize("/m/../etc/passwd").is_none());
        assert!(validator.normalize("/m/a..b.jar").is_none());
        assert!(validator.normalize("/m/a;rm.jar").is_none());
        assert!(validator.normalize("/m/a%2e.jar").is_none());
        assert!(validator.normalize("/").is_none());
    }

    #[test]
    fn test_content_encodings() {
        let mut headers = HeaderMap::new();
        assert!(content_encodings(&headers).is_empty());

        headers.insert(CONTENT_ENCODING, "gzip".parse().unwrap());
        assert_eq!(content_encodings(&headers), vec!["gzip"]);

        headers.insert(CONTENT_ENCODING, "deflate, gzip".parse().unwrap());
        assert_eq!(content_encodings(&headers), vec!["deflate", "gzip"]);

        headers.append(CONTENT_ENCODING, "br".parse().unwrap());
        assert_eq!(content_encodings(&headers).len(), 3);
    }

    #[test]
    fn test_media_type() {
        let mut headers = HeaderMap::new();
        assert_eq!(media_type(&headers), None);
        headers.insert(CONTENT_TYPE, "Text/HTML; charset=utf-8".parse().unwrap());
        assert_eq!(media_type(&headers).as_deref(), Some("text/html"));
    }
}
