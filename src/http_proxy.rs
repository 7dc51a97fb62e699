//! HTTP Proxy Module
//!
//! The listener. Accepts connections, decodes request paths, and hands each
//! request to the [`CachingProxy`] pipeline. Also serves `/metrics`.

use crate::caching_proxy::{full_body, CachingProxy, ProxyBody, ProxyResponse};
use crate::logging::log_access;
use crate::proxy_status::{ProxyStatus, STATUS_HEADER};
use crate::shutdown::ShutdownSignal;
use crate::{ProxyError, Result};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// How long in-flight connections may run after shutdown is requested
pub const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Counters endpoint
pub const METRICS_PATH: &str = "/metrics";

/// HTTP listener in front of the caching proxy
pub struct HttpProxy {
    listen_addr: SocketAddr,
    proxy: Arc<CachingProxy>,
    active_connections: Arc<AtomicUsize>,
}

impl HttpProxy {
    pub fn new(listen_addr: SocketAddr, proxy: Arc<CachingProxy>) -> Self {
        Self {
            listen_addr,
            proxy,
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind the configured address and serve until shutdown
    pub async fn start(&self, shutdown_signal: ShutdownSignal) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr).await.map_err(|e| {
            ProxyError::IoError(format!("Failed to bind {}: {}", self.listen_addr, e))
        })?;
        self.serve(listener, shutdown_signal).await
    }

    /// Serve connections from an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener, mut shutdown_signal: ShutdownSignal) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("HTTP proxy listening on {}", local_addr);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("HTTP connection from {}", addr);

                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                            }

                            let proxy = Arc::clone(&self.proxy);
                            let active_connections = Arc::clone(&self.active_connections);
                            tokio::spawn(async move {
                                Self::serve_connection(stream, addr, proxy, active_connections).await;
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept HTTP connection: {}", e);
                        }
                    }
                }
                _ = shutdown_signal.wait_for_shutdown() => {
                    info!("HTTP proxy received shutdown signal, stopping accept loop");
                    break;
                }
            }
        }

        let drain_start = Instant::now();
        let active = self.active_connections();
        if active > 0 {
            info!(
                "HTTP proxy draining {} active connections (timeout: {:?})",
                active, CONNECTION_DRAIN_TIMEOUT
            );
            while self.active_connections() > 0 && drain_start.elapsed() < CONNECTION_DRAIN_TIMEOUT {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            let remaining = self.active_connections();
            if remaining > 0 {
                warn!("HTTP proxy shutdown with {} connections still active", remaining);
            } else {
                info!("HTTP proxy all connections drained");
            }
        }

        info!("HTTP proxy stopped");
        Ok(())
    }

    async fn serve_connection(
        stream: TcpStream,
        addr: SocketAddr,
        proxy: Arc<CachingProxy>,
        active_connections: Arc<AtomicUsize>,
    ) {
        let io = TokioIo::new(stream);
        active_connections.fetch_add(1, Ordering::Relaxed);

        let service = service_fn(move |req| {
            let proxy = Arc::clone(&proxy);
            async move { Ok::<_, Infallible>(Self::handle_request(req, &proxy).await) }
        });

        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            // Aborted bodies and vanished clients end up here
            let err_str = err.to_string();
            if err_str.contains("connection closed")
                || err_str.contains("broken pipe")
                || err_str.contains("reset by peer")
                || err.is_canceled()
                || err.is_user()
            {
                debug!("Connection with {} ended early: {}", addr, err);
            } else {
                error!("Error serving HTTP connection from {}: {}", addr, err);
            }
        }

        active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Route one request through the pipeline and log it
    pub async fn handle_request(req: Request<Incoming>, proxy: &CachingProxy) -> ProxyResponse {
        let started = Instant::now();
        let method = req.method().clone();
        let raw_path = req.uri().path().to_string();

        let response = Self::route(&method, &raw_path, proxy).await;

        let outcome = response
            .headers()
            .get(STATUS_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| ProxyStatus::ALL.into_iter().find(|s| s.as_str() == v));
        log_access(
            &method,
            &raw_path,
            response.status().as_u16(),
            outcome,
            started.elapsed(),
        );
        response
    }

    async fn route(method: &Method, raw_path: &str, proxy: &CachingProxy) -> ProxyResponse {
        if raw_path == METRICS_PATH && *method == Method::GET {
            return match proxy.metrics().to_json() {
                Ok(json) => Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, "application/json")
                    .body(full_body(json))
                    .unwrap_or_else(|_| plain_response(StatusCode::INTERNAL_SERVER_ERROR, "")),
                Err(e) => {
                    error!("Failed to serialize metrics: {}", e);
                    plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Metrics unavailable")
                }
            };
        }

        let path = match percent_encoding::percent_decode_str(raw_path).decode_utf8() {
            Ok(path) => path,
            Err(_) => {
                proxy.metrics().record(ProxyStatus::BAD_REQUEST);
                return build_error_response(
                    StatusCode::BAD_REQUEST,
                    ProxyStatus::BAD_REQUEST,
                    "Invalid request path",
                );
            }
        };

        match proxy.handle(method, &path).await {
            Ok(Some(response)) => response,
            Ok(None) => plain_response(StatusCode::NOT_FOUND, "Not Found"),
            Err(e) => {
                error!("Failed to handle {} {}: {}", method, path, e);
                proxy.metrics().record(ProxyStatus::ERROR);
                build_error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ProxyStatus::ERROR,
                    "Internal Server Error",
                )
            }
        }
    }
}

/// Plain text response tagged with an outcome
pub fn build_error_response(status: StatusCode, outcome: ProxyStatus, message: &str) -> ProxyResponse {
    let mut response = plain_response(status, message);
    response.headers_mut().insert(
        STATUS_HEADER,
        hyper::header::HeaderValue::from_static(outcome.as_str()),
    );
    response
}

fn plain_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(message.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain"),
    );
    response
}
