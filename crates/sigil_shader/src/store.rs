//! Persistent Artifact Store
//!
//! Content-addressed blob storage for serialized shader maps, keyed by
//! [`ShaderMapId::store_key`](crate::ShaderMapId::store_key). The store is
//! an external collaborator; two implementations are provided:
//!
//! - [`MemoryArtifactStore`]: process-local, used by tests and tools.
//! - [`DirectoryArtifactStore`]: one file per key under a root directory.
//!
//! Store failures are never fatal. A failed `get` is a miss, a failed `put`
//! is logged and forgotten.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Content-addressed blob store.
pub trait ArtifactStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn put(&self, key: &str, blob: Vec<u8>);
}

/// In-memory store with hit/miss counters.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: RwLock<FxHashMap<String, Vec<u8>>>,
    gets: AtomicU64,
    hits: AtomicU64,
    puts: AtomicU64,
}

impl MemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.blobs.read().contains_key(key)
    }

    /// Number of `get` calls so far.
    #[must_use]
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let blob = self.blobs.read().get(key).cloned();
        if blob.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        blob
    }

    fn put(&self, key: &str, blob: Vec<u8>) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.blobs.write().insert(key.to_string(), blob);
    }
}

/// Filesystem store writing one file per key.
#[derive(Debug, Clone)]
pub struct DirectoryArtifactStore {
    root: PathBuf,
}

impl DirectoryArtifactStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> sigil_core::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(file_name).with_extension("sm")
    }
}

impl ArtifactStore for DirectoryArtifactStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("Failed to read shader map '{}': {e}", path.display());
                None
            }
        }
    }

    fn put(&self, key: &str, blob: Vec<u8>) {
        let path = self.path_for(key);
        let temp = path.with_extension("sm.tmp");
        let result = std::fs::write(&temp, &blob).and_then(|()| std::fs::rename(&temp, &path));
        if let Err(e) = result {
            log::warn!("Failed to write shader map '{}': {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_counts() {
        let store = MemoryArtifactStore::new();
        assert!(store.get("a").is_none());
        store.put("a", vec![1, 2]);
        assert_eq!(store.get("a"), Some(vec![1, 2]));
        assert_eq!(store.get_count(), 2);
        assert_eq!(store.hit_count(), 1);
        assert_eq!(store.put_count(), 1);
    }

    #[test]
    fn test_directory_store_roundtrip() {
        let root = std::env::temp_dir().join(format!(
            "sigil-store-test-{}-{}",
            std::process::id(),
            sigil_core::CompileJobId::next().raw()
        ));
        let store = DirectoryArtifactStore::open(&root).unwrap();
        assert!(store.get("SIGIL_SM_V1_key").is_none());
        store.put("SIGIL_SM_V1_key", vec![9, 8, 7]);
        assert_eq!(store.get("SIGIL_SM_V1_key"), Some(vec![9, 8, 7]));
        let _ = std::fs::remove_dir_all(root);
    }
}
