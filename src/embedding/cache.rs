//! Content-hashed persistent embedding cache
//!
//! Vectors are keyed by the FNV-1a hash of their source text, so re-parsing
//! unchanged content never re-embeds. The cache is the only persistent shared
//! resource in the engine; writes are serialised behind a mutex and flushed
//! explicitly after a successful build.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::graph::fnv1a_hash;

/// Resolve the cache base directory
///
/// Precedence: `MODEL_CACHE_DIR`, then `HOME_DIR_OVERRIDE` (isolated tests),
/// then XDG cache, then the temp directory.
pub fn cache_base_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MODEL_CACHE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir).join("repocontext");
        }
    }
    if let Ok(home) = std::env::var("HOME_DIR_OVERRIDE") {
        if !home.trim().is_empty() {
            return PathBuf::from(home).join(".cache").join("repocontext");
        }
    }
    if let Some(cache) = dirs::cache_dir() {
        return cache.join("repocontext");
    }
    std::env::temp_dir().join("repocontext")
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: HashMap<String, Vec<f32>>,
}

/// Persistent vector cache keyed by content hash
#[derive(Debug)]
pub struct EmbeddingCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, Vec<f32>>>,
}

impl EmbeddingCache {
    /// Open the cache file under the resolved base directory
    pub fn open_default() -> Self {
        Self::open(cache_base_dir().join("embeddings.json"))
    }

    /// Open a cache at an explicit path, loading existing entries
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::load_entries(&path);
        debug!(
            "embedding cache at {} ({} entries)",
            path.display(),
            entries.len()
        );
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn load_entries(path: &Path) -> HashMap<String, Vec<f32>> {
        let Ok(content) = std::fs::read_to_string(path) else {
            return HashMap::new();
        };
        serde_json::from_str::<CacheFile>(&content)
            .map(|f| f.entries)
            .unwrap_or_default()
    }

    /// Content key for a piece of embedding text
    pub fn content_key(text: &str) -> String {
        format!("{:016x}", fnv1a_hash(text))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Cached vector for `text`, if present
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.entries.lock().get(&Self::content_key(text)).cloned()
    }

    /// Store a vector for `text`
    pub fn put(&self, text: &str, vector: Vec<f32>) {
        self.entries.lock().insert(Self::content_key(text), vector);
    }

    /// Persist all entries to disk
    pub fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entries = self.entries.lock();
        let file = CacheFile {
            entries: entries.clone(),
        };
        let json = serde_json::to_string(&file).unwrap_or_else(|_| "{}".to_string());
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Drop all entries and remove the backing file
    pub fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::open(dir.path().join("emb.json"));
        assert!(cache.get("some text").is_none());

        cache.put("some text", vec![0.5, 0.5]);
        assert_eq!(cache.get("some text"), Some(vec![0.5, 0.5]));
        assert!(cache.get("other text").is_none());
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emb.json");
        {
            let cache = EmbeddingCache::open(&path);
            cache.put("alpha", vec![1.0, 0.0]);
            cache.flush().unwrap();
        }
        let reopened = EmbeddingCache::open(&path);
        assert_eq!(reopened.get("alpha"), Some(vec![1.0, 0.0]));
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emb.json");
        let cache = EmbeddingCache::open(&path);
        cache.put("alpha", vec![1.0]);
        cache.flush().unwrap();
        assert!(path.exists());

        cache.clear().unwrap();
        assert!(!path.exists());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_content_key_stable() {
        assert_eq!(
            EmbeddingCache::content_key("abc"),
            EmbeddingCache::content_key("abc")
        );
        assert_ne!(
            EmbeddingCache::content_key("abc"),
            EmbeddingCache::content_key("abd")
        );
    }
}
