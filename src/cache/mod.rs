//! Content-addressed caching for external lookups and reductions.
//!
//! Both caches key their entries by a short deterministic fingerprint of a
//! structured key, and both are deliberately fail-open on read: a missing or
//! corrupt cache must never block the pipeline, only slow it down.

pub mod response;
pub mod statespace;

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::Result;

pub use response::ResponseCache;
pub use statespace::StatespaceCache;

/// Length of a cache fingerprint, in hex characters.
pub const FINGERPRINT_LEN: usize = 16;

/// Deterministic short digest of a structured cache key.
///
/// The key is serialized through a canonical JSON value whose map entries are
/// sorted by key name, so logically equal keys fingerprint identically
/// regardless of construction order. The SHA-256 digest is truncated to 16
/// hex characters to keep file names short; collisions are negligible at
/// this workload's cardinality.
pub fn fingerprint<T: Serialize + ?Sized>(key: &T) -> Result<String> {
    // serde_json's Value object is BTree-backed, which sorts the keys.
    let canonical = serde_json::to_string(&serde_json::to_value(key)?)?;
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(FINGERPRINT_LEN);
    Ok(hash)
}

/// Durable home of one cache: a directory plus a human-readable base name.
#[derive(Debug, Clone)]
pub struct CacheLocation {
    dir: PathBuf,
    base: String,
}

impl CacheLocation {
    pub fn new(dir: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        Self { dir: dir.into(), base: base.into() }
    }

    /// Create the cache directory if it does not exist yet.
    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Path of the cache's main backing file: `{dir}/{base}`.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.base)
    }

    /// Path of a suffixed sibling file: `{dir}/{base}-{suffix}`.
    pub fn sibling(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}-{}", self.base, suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[test]
    fn fingerprint_is_stable_under_key_reordering() {
        // a HashMap iterates in arbitrary order; canonicalization must not care
        let mut unordered = std::collections::HashMap::new();
        unordered.insert("b", 2);
        unordered.insert("a", 1);
        let mut sorted = BTreeMap::new();
        sorted.insert("a", 1);
        sorted.insert("b", 2);
        assert_eq!(fingerprint(&unordered).unwrap(), fingerprint(&sorted).unwrap());

        #[derive(Serialize)]
        struct Key {
            a: i32,
            b: i32,
        }
        let structured = fingerprint(&Key { a: 1, b: 2 }).unwrap();
        assert_eq!(structured, fingerprint(&sorted).unwrap());
    }

    #[test]
    fn fingerprint_changes_with_any_value() {
        let mut map = BTreeMap::new();
        map.insert("a", 1);
        map.insert("b", 2);
        let original = fingerprint(&map).unwrap();
        map.insert("b", 3);
        assert_ne!(original, fingerprint(&map).unwrap());
    }

    #[test]
    fn fingerprint_is_short_hex() {
        let hash = fingerprint(&vec![1, 2, 3]).unwrap();
        assert_eq!(hash.len(), FINGERPRINT_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn location_paths() {
        let location = CacheLocation::new("data/cache", "fusion.json");
        assert_eq!(location.path(), PathBuf::from("data/cache/fusion.json"));
        assert_eq!(
            location.sibling("abc-hwi.bin"),
            PathBuf::from("data/cache/fusion.json-abc-hwi.bin")
        );
    }
}
