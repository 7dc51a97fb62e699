//! Property-based tests for request path safety
//!
//! Any path accepted by the request validator maps to a cache file below the
//! cache root, and any path containing `..` is rejected.

use artifact_caching_proxy::cache_store::CacheStore;
use artifact_caching_proxy::caching_proxy::{file_extension, RequestPathValidator};
use quickcheck::{Arbitrary, Gen, QuickCheck, TestResult};
use std::path::PathBuf;

/// Alphabet mixing allowed characters with the ones that must be rejected
const ALPHABET: &[char] = &[
    'a', 'z', 'A', '0', '9', '.', '/', '\\', '-', '_', '+', '@', ' ', '%', '2', ';', '?', '*', ':',
];

#[derive(Debug, Clone)]
struct RequestPath(String);

impl Arbitrary for RequestPath {
    fn arbitrary(g: &mut Gen) -> Self {
        let len = (usize::arbitrary(g) % 24) + 1;
        let mut path = String::from("/");
        for _ in 0..len {
            path.push(*g.choose(ALPHABET).unwrap());
        }
        RequestPath(path)
    }
}

fn prop_accepted_paths_stay_under_root(path: RequestPath) -> TestResult {
    let validator = RequestPathValidator::new().unwrap();
    let Some(normalized) = validator.normalize(&path.0) else {
        return TestResult::discard();
    };

    assert!(!normalized.contains(".."));
    assert!(!normalized.contains('\\'));
    assert!(!normalized.starts_with('/'));

    let root = PathBuf::from("/var/cache/artifacts");
    let store = CacheStore::new(root.clone());
    match store.resolve_cache_path(&normalized, None) {
        Ok(resolved) => TestResult::from_bool(resolved.starts_with(&root) && resolved != root),
        // Paths made only of separators and dots have no leaf
        Err(_) => TestResult::passed(),
    }
}

fn prop_traversal_is_rejected(prefix: RequestPath, suffix: RequestPath) -> bool {
    let validator = RequestPathValidator::new().unwrap();
    let path = format!("{}/..{}", prefix.0, suffix.0);
    validator.normalize(&path).is_none()
}

fn prop_extension_is_leaf_suffix(path: RequestPath) -> bool {
    match file_extension(&path.0) {
        Some(ext) => ext.starts_with('.') && ext.len() > 1 && path.0.ends_with(ext) && !ext.contains('/'),
        None => true,
    }
}

#[test]
fn test_accepted_paths_stay_under_root() {
    QuickCheck::new()
        .tests(500)
        .quickcheck(prop_accepted_paths_stay_under_root as fn(RequestPath) -> TestResult);
}

#[test]
fn test_traversal_is_rejected() {
    QuickCheck::new()
        .tests(500)
        .quickcheck(prop_traversal_is_rejected as fn(RequestPath, RequestPath) -> bool);
}

#[test]
fn test_extension_is_leaf_suffix() {
    QuickCheck::new()
        .tests(500)
        .quickcheck(prop_extension_is_leaf_suffix as fn(RequestPath) -> bool);
}
