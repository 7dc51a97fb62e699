//! Cache Store Module
//!
//! Maps request paths onto physical files below the local cache root and
//! publishes downloaded artifacts into place.
//!
//! The leaf segment of every cached path is prefixed with [`CACHE_FILE_PREFIX`]
//! so that `a/a.jar` (a file) and `a/a.jar/b.jar` (a file below a directory
//! named `a.jar`) can both live on disk. Gzip-encoded variants additionally
//! carry [`GZIP_SUFFIX`] so encoded and plain bytes never share a file.

use crate::logging::ProxyEvent;
use crate::{ProxyError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Marker prepended to the leaf file name of every cached artifact
pub const CACHE_FILE_PREFIX: &str = "cache-";

/// Suffix appended to the mangled leaf of gzip-encoded variants
pub const GZIP_SUFFIX: &str = ".gzip-b3b2f6e1";

/// Infix separating a final cache path from the random token of its temp file
pub const TEMP_FILE_INFIX: &str = ".tmp.";

/// The only content encoding that may be stored
pub const GZIP_ENCODING: &str = "gzip";

/// Result of moving a fully written temp file onto its final path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The temp file became the cache file
    Published,
    /// A concurrent request published the same path first; its copy is kept
    AlreadyPresent,
}

/// An artifact already present in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub path: PathBuf,
    pub content_encoding: Option<&'static str>,
}

/// File-system layout of the artifact cache
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Physical path for `request_path` stored with the given content encoding.
    ///
    /// Fails with `InvalidPath` when the path is empty after normalization or
    /// contains a `..` segment, and with `UnsupportedEncoding` for anything but gzip.
    pub fn resolve_cache_path(
        &self,
        request_path: &str,
        content_encoding: Option<&str>,
    ) -> Result<PathBuf> {
        let suffix = match content_encoding {
            None => "",
            Some(GZIP_ENCODING) => GZIP_SUFFIX,
            Some(other) => return Err(ProxyError::UnsupportedEncoding(other.to_string())),
        };

        let segments = normalize_segments(request_path)?;
        let (leaf, parents) = segments
            .split_last()
            .ok_or_else(|| ProxyError::InvalidPath(format!("Empty cache path: '{}'", request_path)))?;

        let mut path = self.root.clone();
        for segment in parents {
            path.push(segment);
        }
        path.push(format!("{}{}{}", CACHE_FILE_PREFIX, leaf, suffix));
        Ok(path)
    }

    /// Find an already cached variant of `request_path`, gzip first.
    pub async fn locate_existing(&self, request_path: &str) -> Option<CachedFile> {
        for encoding in [Some(GZIP_ENCODING), None] {
            let Ok(path) = self.resolve_cache_path(request_path, encoding) else {
                return None;
            };
            match tokio::fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => {
                    return Some(CachedFile {
                        path,
                        content_encoding: encoding,
                    });
                }
                _ => continue,
            }
        }
        None
    }

    /// Create the parent directory of `final_path` and a fresh, exclusively
    /// opened temp file next to it.
    pub async fn create_temp_file(&self, final_path: &Path) -> Result<(PathBuf, tokio::fs::File)> {
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ProxyError::CacheError(format!(
                    "Failed to create cache directory {:?}: {}",
                    parent, e
                ))
            })?;
        }

        let temp_path = temp_path_for(final_path);
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await
            .map_err(|e| {
                ProxyError::CacheError(format!("Failed to create temp file {:?}: {}", temp_path, e))
            })?;

        debug!("Created temp file {:?}", temp_path);
        Ok((temp_path, file))
    }

    /// Move a completely written temp file onto `final_path` without
    /// overwriting an existing file.
    ///
    /// The temp file itself is left behind and must be removed by the caller.
    pub async fn publish(&self, temp_path: &Path, final_path: &Path) -> Result<PublishOutcome> {
        match tokio::fs::hard_link(temp_path, final_path).await {
            Ok(()) => {
                debug!("Published {:?}", final_path);
                Ok(PublishOutcome::Published)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(
                    "Cache file {:?} was published by a concurrent request",
                    final_path
                );
                Ok(PublishOutcome::AlreadyPresent)
            }
            Err(e) => Err(ProxyError::CacheError(format!(
                "Failed to publish {:?} to {:?}: {}",
                temp_path, final_path, e
            ))),
        }
    }

    /// Free space on the cache volume in MiB
    pub fn available_space_mb(&self) -> Result<u64> {
        let bytes = fs2::available_space(&self.root).map_err(|e| {
            ProxyError::SystemError(format!(
                "Failed to query free space at {:?}: {}",
                self.root, e
            ))
        })?;
        Ok(bytes / (1024 * 1024))
    }

    /// Delete temp files left behind by a previous process. Returns the number removed.
    pub fn sweep_orphaned_temp_files(&self) -> usize {
        let mut removed = 0;
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || !is_temp_file_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(
                    event = ProxyEvent::CleanupFailed.as_str(),
                    "Failed to remove orphaned temp file {:?}: {}",
                    entry.path(),
                    e
                ),
            }
        }

        if removed > 0 {
            info!(
                "Removed {} orphaned temp files from {:?}",
                removed, self.root
            );
        }
        removed
    }
}

/// Unique temp file path next to `final_path`
pub fn temp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(TEMP_FILE_INFIX);
    name.push(uuid::Uuid::new_v4().simple().to_string());
    PathBuf::from(name)
}

/// Hex digits of the simple-format uuid closing every temp file name
const TEMP_TOKEN_LEN: usize = 32;

/// Only names shaped exactly like `temp_path_for` output match, so cached
/// artifacts whose own name contains the infix survive a sweep.
fn is_temp_file_name(name: &str) -> bool {
    if !name.starts_with(CACHE_FILE_PREFIX) {
        return false;
    }
    match name.rsplit_once(TEMP_FILE_INFIX) {
        Some((stem, token)) => {
            stem.len() > CACHE_FILE_PREFIX.len()
                && token.len() == TEMP_TOKEN_LEN
                && token.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        }
        None => false,
    }
}

fn normalize_segments(request_path: &str) -> Result<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in request_path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(ProxyError::InvalidPath(format!(
                    "Path escapes cache root: '{}'",
                    request_path
                )))
            }
            s if s.contains('\0') || s.contains('\\') => {
                return Err(ProxyError::InvalidPath(format!(
                    "Illegal character in path: '{}'",
                    request_path
                )))
            }
            s => segments.push(s),
        }
    }
    Ok(segments)
}
