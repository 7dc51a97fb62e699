//! Shared fixtures: an in-process upstream repository and proxy configuration.

#![allow(dead_code)]

use artifact_caching_proxy::config::Config;
use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const A_JAR: &[u8] = b"a.jar content";
pub const B_JAR: &[u8] = b"b.jar below a directory named a.jar";
pub const A_JAR_LAST_MODIFIED: &str = "Wed, 21 Oct 2015 07:28:00 GMT";
pub const GZIP_BYTES: &[u8] = b"\x1f\x8b\x08\x00pretend-compressed";
pub const BIG_JAR_SIZE: usize = 4 * 1024 * 1024;

pub fn big_jar() -> Vec<u8> {
    (0..BIG_JAR_SIZE).map(|i| (i % 251) as u8).collect()
}

/// Artifact repository double counting requests per decoded path
pub struct TestUpstream {
    pub addr: SocketAddr,
    hits: Arc<DashMap<String, usize>>,
}

impl TestUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits: Arc<DashMap<String, usize>> = Arc::new(DashMap::new());
        let big = Bytes::from(big_jar());

        let server_hits = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let hits = Arc::clone(&server_hits);
                let big = big.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let hits = Arc::clone(&hits);
                        let big = big.clone();
                        async move { Ok::<_, Infallible>(route(req, hits, big).await) }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, hits }
    }

    pub fn base_uri(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.get(path).map(|h| *h).unwrap_or(0)
    }
}

async fn route(
    req: Request<Incoming>,
    hits: Arc<DashMap<String, usize>>,
    big: Bytes,
) -> Response<Full<Bytes>> {
    let path = percent_encoding::percent_decode_str(req.uri().path())
        .decode_utf8_lossy()
        .to_string();
    *hits.entry(path.clone()).or_insert(0) += 1;

    match path.as_str() {
        "/a.jar" => {
            let mut response = artifact("application/java-archive", Bytes::from_static(A_JAR));
            response
                .headers_mut()
                .insert("last-modified", A_JAR_LAST_MODIFIED.parse().unwrap());
            response
        }
        "/a.jar/b.jar" => artifact("application/java-archive", Bytes::from_static(B_JAR)),
        "/big.jar" => artifact("application/java-archive", big),
        "/name with spaces.jar" => artifact("application/java-archive", Bytes::from_static(b"spaces")),
        "/@scope/pkg/-/pkg+1.0.0.tgz" => artifact("application/octet-stream", Bytes::from_static(b"npm")),
        "/gzipEncoding.txt" => {
            let mut response = artifact("text/plain", Bytes::from_static(GZIP_BYTES));
            response
                .headers_mut()
                .insert("content-encoding", "gzip".parse().unwrap());
            response
        }
        "/fakeBrEncoding.txt" => {
            let mut response = artifact("text/plain", Bytes::from_static(b"br"));
            response
                .headers_mut()
                .insert("content-encoding", "br".parse().unwrap());
            response
        }
        "/fakeMultipleEncodings.txt" => {
            let mut response = artifact("text/plain", Bytes::from_static(b"multi"));
            response
                .headers_mut()
                .insert("content-encoding", "deflate, gzip".parse().unwrap());
            response
        }
        "/wrong-content-type.jar" => artifact("text/html; charset=utf-8", Bytes::from_static(b"<html>login</html>")),
        "/a.html" => artifact("text/html", Bytes::from_static(b"<html></html>")),
        "/500.jar" => status(StatusCode::INTERNAL_SERVER_ERROR),
        "/503.jar" => status(StatusCode::SERVICE_UNAVAILABLE),
        "/504.jar" => status(StatusCode::GATEWAY_TIMEOUT),
        "/moved/a.jar" => redirect(StatusCode::MOVED_PERMANENTLY, "../a.jar"),
        "/elsewhere/a.jar" => redirect(StatusCode::TEMPORARY_REDIRECT, "/a.jar"),
        "/slow.jar" => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            artifact("application/java-archive", Bytes::from_static(b"late"))
        }
        _ => status(StatusCode::NOT_FOUND),
    }
}

fn artifact(content_type: &str, body: Bytes) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", content_type)
        .header("content-length", body.len())
        .body(Full::new(body))
        .unwrap()
}

fn status(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn redirect(status: StatusCode, location: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("location", location)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Upstream that answers every request with `302 Found` pointing at the
/// same path below `target`, which must end with a slash
pub async fn start_redirecting_upstream(target: String) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buffer = [0u8; 4096];
            let n = stream.read(&mut buffer).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buffer[..n]);
            let path = request.split_whitespace().nth(1).unwrap_or("/");
            let response = format!(
                "HTTP/1.1 302 Found\r\nLocation: {}{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                target,
                path.trim_start_matches('/')
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });
    addr
}

/// Upstream that declares more bytes than it sends, then closes
pub async fn start_short_body_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buffer = [0u8; 4096];
            let _ = stream.read(&mut buffer).await;
            let _ = stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/java-archive\r\nContent-Length: 100\r\n\r\nshort",
                )
                .await;
            let _ = stream.shutdown().await;
        }
    });
    addr
}

/// Address nothing listens on
pub async fn closed_port_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Proxy configuration with `/r` (no validation) and `/v` (content type
/// validation) both pointing at `upstream`
pub fn proxy_config(cache_dir: &Path, upstream: &str) -> Config {
    let mut config = Config::default();
    config.proxy.local_cache_path = cache_dir.to_path_buf();
    config.proxy.prefixes = vec![format!("r={}", upstream), format!("v={}", upstream)];
    config.proxy.content_type_validation_prefixes = vec!["v".to_string()];
    config.proxy.minimum_free_disk_space_mb = 0;
    config.proxy.upstream_timeout = Duration::from_secs(1);
    config.upstream_client.max_retries = 0;
    config.upstream_client.connect_timeout = Duration::from_secs(1);
    config
}

pub async fn body_bytes(response: Response<artifact_caching_proxy::caching_proxy::ProxyBody>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

/// Every temp file below `root`
pub fn temp_files(root: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name().to_string_lossy().contains(".tmp."))
        .map(|e| e.into_path())
        .collect()
}
