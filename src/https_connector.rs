//! Upstream Connector
//!
//! Connector for the pooled hyper client. Opens plain TCP connections for
//! `http` upstreams and rustls sessions for `https` upstreams.

use crate::{ProxyError, Result};
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use rustls::pki_types::ServerName;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};
use tower::Service;
use tracing::{debug, warn};

/// Connection to an upstream, with or without TLS
pub enum UpstreamStream {
    Http(TcpStream),
    Https(Box<TlsStream<TcpStream>>),
}

impl UpstreamStream {
    fn poll_read_tokio(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Http(s) => Pin::new(s).poll_read(cx, buf),
            UpstreamStream::Https(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl Read for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        let mut tokio_buf = tokio::io::ReadBuf::uninit(unsafe { buf.as_mut() });
        match self.poll_read_tokio(cx, &mut tokio_buf) {
            Poll::Ready(Ok(())) => {
                let filled = tokio_buf.filled().len();
                unsafe {
                    buf.advance(filled);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Write for UpstreamStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            UpstreamStream::Http(s) => Pin::new(s).poll_write(cx, buf),
            UpstreamStream::Https(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Http(s) => Pin::new(s).poll_flush(cx),
            UpstreamStream::Https(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            UpstreamStream::Http(s) => Pin::new(s).poll_shutdown(cx),
            UpstreamStream::Https(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

impl Connection for UpstreamStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

/// Connector used by [`crate::upstream_client::UpstreamClient`]
#[derive(Clone)]
pub struct UpstreamConnector {
    tls_connector: TlsConnector,
    connect_timeout: Duration,
}

impl UpstreamConnector {
    pub fn new(tls_connector: TlsConnector, connect_timeout: Duration) -> Self {
        Self {
            tls_connector,
            connect_timeout,
        }
    }

    /// Connector trusting the platform root store, falling back to the
    /// bundled webpki roots when the platform has none.
    pub fn with_native_roots(connect_timeout: Duration) -> Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut root_store = rustls::RootCertStore::empty();
        match rustls_native_certs::load_native_certs() {
            Ok(certs) => {
                let (added, ignored) = root_store.add_parsable_certificates(certs);
                debug!("Loaded {} native root certificates ({} ignored)", added, ignored);
            }
            Err(e) => warn!("Failed to load native root certificates: {}", e),
        }
        if root_store.is_empty() {
            warn!("No native root certificates found, using bundled webpki roots");
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(Self::new(
            TlsConnector::from(Arc::new(tls_config)),
            connect_timeout,
        ))
    }
}

impl Service<Uri> for UpstreamConnector {
    type Response = UpstreamStream;
    type Error = ProxyError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let tls_connector = self.tls_connector.clone();
        let connect_timeout = self.connect_timeout;

        Box::pin(async move {
            let host = uri
                .host()
                .ok_or_else(|| ProxyError::ConfigError(format!("No host in URI: {}", uri)))?
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string();
            let is_https = match uri.scheme_str() {
                Some("https") => true,
                Some("http") => false,
                other => {
                    return Err(ProxyError::ConfigError(format!(
                        "Unsupported upstream scheme: {:?}",
                        other
                    )))
                }
            };
            let port = uri.port_u16().unwrap_or(if is_https { 443 } else { 80 });

            debug!("[CONNECTOR] Connecting to {}:{}", host, port);

            let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect((host.as_str(), port)))
                .await
                .map_err(|_| {
                    ProxyError::ConnectionError(format!(
                        "Connect to {}:{} timed out after {:?}",
                        host, port, connect_timeout
                    ))
                })?
                .map_err(|e| {
                    debug!("[CONNECTOR] TCP connection failed to {}:{}: {}", host, port, e);
                    ProxyError::ConnectionError(format!("Failed to connect to {}:{}: {}", host, port, e))
                })?;

            if let Err(e) = tcp.set_nodelay(true) {
                warn!("[CONNECTOR] Failed to set TCP_NODELAY for {}:{}: {}", host, port, e);
            }

            if !is_https {
                return Ok(UpstreamStream::Http(tcp));
            }

            let server_name = ServerName::try_from(host.clone()).map_err(|e| {
                ProxyError::TlsError(format!("Invalid server name '{}': {}", host, e))
            })?;

            let tls = tls_connector.connect(server_name, tcp).await.map_err(|e| {
                warn!("[CONNECTOR] TLS handshake failed to {}:{}: {}", host, port, e);
                ProxyError::ConnectionError(format!("TLS handshake failed to {}: {}", host, e))
            })?;

            debug!("[CONNECTOR] TLS connection established to {}:{}", host, port);
            Ok(UpstreamStream::Https(Box::new(tls)))
        })
    }
}
