//! File Responder Module
//!
//! Serves artifacts that are already in the cache. GET streams the file from
//! disk through a channel-fed body; HEAD answers with headers only.

use crate::cache_store::CachedFile;
use crate::caching_proxy::{channel_body, empty_body, ProxyResponse};
use crate::proxy_status::{ProxyStatus, ETERNAL_CACHE_CONTROL, STATUS_HEADER};
use crate::{ProxyError, Result};
use bytes::Bytes;
use hyper::body::Frame;
use hyper::header::{CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED};
use hyper::{Response, StatusCode};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Read size for streaming cached files
const FILE_CHUNK_SIZE: usize = 81_920;

/// Content type for a request path, from its extension
pub fn content_type_for(request_path: &str) -> String {
    mime_guess::from_path(request_path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Respond with the cached file. `request_path` picks the content type.
pub async fn serve_cached_file(
    cached: &CachedFile,
    request_path: &str,
    head_only: bool,
) -> Result<ProxyResponse> {
    let file = tokio::fs::File::open(&cached.path).await.map_err(|e| {
        ProxyError::CacheError(format!("Failed to open cached file {:?}: {}", cached.path, e))
    })?;
    let metadata = file.metadata().await.map_err(|e| {
        ProxyError::CacheError(format!("Failed to stat cached file {:?}: {}", cached.path, e))
    })?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(STATUS_HEADER, ProxyStatus::HIT.as_str())
        .header(CACHE_CONTROL, ETERNAL_CACHE_CONTROL)
        .header(CONTENT_TYPE, content_type_for(request_path))
        .header(CONTENT_LENGTH, metadata.len());

    if let Ok(modified) = metadata.modified() {
        builder = builder.header(LAST_MODIFIED, httpdate::fmt_http_date(modified));
    }
    if let Some(encoding) = cached.content_encoding {
        builder = builder.header(CONTENT_ENCODING, encoding);
    }

    let body = if head_only {
        empty_body()
    } else {
        let (frame_tx, frame_rx) = mpsc::channel::<std::result::Result<Frame<Bytes>, ProxyError>>(8);
        let path = cached.path.clone();
        tokio::spawn(stream_file(file, path, frame_tx));
        channel_body(frame_rx)
    };

    debug!("Serving cached file {:?} (head_only: {})", cached.path, head_only);

    builder
        .body(body)
        .map_err(|e| ProxyError::HttpError(format!("Failed to build response: {}", e)))
}

async fn stream_file(
    mut file: tokio::fs::File,
    path: std::path::PathBuf,
    frame_tx: mpsc::Sender<std::result::Result<Frame<Bytes>, ProxyError>>,
) {
    let mut buffer = vec![0u8; FILE_CHUNK_SIZE];
    loop {
        match file.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                if frame_tx
                    .send(Ok(Frame::data(Bytes::copy_from_slice(&buffer[..n]))))
                    .await
                    .is_err()
                {
                    debug!("Client went away while streaming {:?}", path);
                    break;
                }
            }
            Err(e) => {
                error!("Mid-stream disk read error for {:?}: {}", path, e);
                let _ = frame_tx
                    .send(Err(ProxyError::IoError(format!(
                        "Failed to read {:?}: {}",
                        path, e
                    ))))
                    .await;
                break;
            }
        }
    }
}
