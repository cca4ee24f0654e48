//! Persistent Tier Store
//!
//! Opaque keyed blob storage behind tier 2. Every proxy instance writes under
//! its own scope (the store identifier generated at construction), so data
//! left behind by an earlier instance is never read back.
//!
//! # Design
//!
//! - Async trait so backends may do real I/O
//! - Keys are `(scope, chunk index)`; values are sealed chunk blobs
//! - No restore-on-open: a fresh scope is always empty

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{Error, Result};

/// Keyed blob store backing tier 2
#[async_trait]
pub trait PersistentTierStore: Send + Sync {
    /// Read a chunk blob
    async fn get(&self, scope: &str, chunk_index: u64) -> Result<Option<Bytes>>;

    /// Write (or overwrite) a chunk blob
    async fn set(&self, scope: &str, chunk_index: u64, blob: Bytes) -> Result<()>;

    /// Delete a chunk blob; returns whether it existed
    async fn delete(&self, scope: &str, chunk_index: u64) -> Result<bool>;

    /// Drop everything stored under a scope
    async fn clear_scope(&self, scope: &str) -> Result<()>;

    /// Get storage statistics
    fn stats(&self) -> StoreStats;
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Blobs currently stored
    pub blob_count: u64,
    /// Bytes currently stored
    pub total_bytes: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

#[derive(Debug, Default)]
struct StoreCounters {
    blob_count: AtomicU64,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl StoreCounters {
    fn stored(&self, new_len: u64, old_len: Option<u64>) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        match old_len {
            Some(old) => {
                self.total_bytes.fetch_sub(old, Ordering::Relaxed);
            }
            None => {
                self.blob_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.total_bytes.fetch_add(new_len, Ordering::Relaxed);
    }

    fn removed(&self, len: u64) {
        self.blob_count.fetch_sub(1, Ordering::Relaxed);
        self.total_bytes.fetch_sub(len, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StoreStats {
        StoreStats {
            blob_count: self.blob_count.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// In-memory store (default backend, also used by tests)
#[derive(Debug, Default)]
pub struct InMemoryTierStore {
    /// scope -> chunk index -> blob
    scopes: DashMap<String, DashMap<u64, Bytes>>,
    counters: StoreCounters,
}

impl InMemoryTierStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scopes with at least one blob
    pub fn scope_count(&self) -> usize {
        self.scopes.iter().filter(|s| !s.value().is_empty()).count()
    }
}

#[async_trait]
impl PersistentTierStore for InMemoryTierStore {
    async fn get(&self, scope: &str, chunk_index: u64) -> Result<Option<Bytes>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let Some(blobs) = self.scopes.get(scope) else {
            return Ok(None);
        };
        let blob = blobs.get(&chunk_index).map(|b| b.value().clone());
        Ok(blob)
    }

    async fn set(&self, scope: &str, chunk_index: u64, blob: Bytes) -> Result<()> {
        let len = blob.len() as u64;
        let blobs = self
            .scopes
            .entry(scope.to_string())
            .or_insert_with(DashMap::new);
        let old = blobs.insert(chunk_index, blob);
        self.counters.stored(len, old.map(|b| b.len() as u64));
        Ok(())
    }

    async fn delete(&self, scope: &str, chunk_index: u64) -> Result<bool> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        if let Some(blobs) = self.scopes.get(scope) {
            if let Some((_, blob)) = blobs.remove(&chunk_index) {
                self.counters.removed(blob.len() as u64);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn clear_scope(&self, scope: &str) -> Result<()> {
        if let Some((_, blobs)) = self.scopes.remove(scope) {
            for (_, blob) in blobs {
                self.counters.removed(blob.len() as u64);
            }
        }
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }
}

// =============================================================================
// Directory Store
// =============================================================================

/// Filesystem store: one file per chunk under `<root>/<scope>/`
#[derive(Debug)]
pub struct DirectoryTierStore {
    root: PathBuf,
    counters: StoreCounters,
}

impl DirectoryTierStore {
    /// Create a store rooted at `root` (created lazily on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counters: StoreCounters::default(),
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scope_dir(&self, scope: &str) -> Result<PathBuf> {
        if scope.is_empty() || scope.contains(['/', '\\']) || scope.starts_with('.') {
            return Err(Error::Storage(format!("invalid store scope: {:?}", scope)));
        }
        Ok(self.root.join(scope))
    }

    fn chunk_path(&self, scope: &str, chunk_index: u64) -> Result<PathBuf> {
        Ok(self
            .scope_dir(scope)?
            .join(format!("chunk-{:010}.bin", chunk_index)))
    }
}

fn storage_err(action: &str, path: &Path, err: std::io::Error) -> Error {
    Error::Storage(format!("{} {}: {}", action, path.display(), err))
}

#[async_trait]
impl PersistentTierStore for DirectoryTierStore {
    async fn get(&self, scope: &str, chunk_index: u64) -> Result<Option<Bytes>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let path = self.chunk_path(scope, chunk_index)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err("read", &path, e)),
        }
    }

    async fn set(&self, scope: &str, chunk_index: u64, blob: Bytes) -> Result<()> {
        let dir = self.scope_dir(scope)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_err("create", &dir, e))?;

        let path = self.chunk_path(scope, chunk_index)?;
        let old = tokio::fs::metadata(&path).await.ok().map(|m| m.len());

        // Write to a sibling file and rename so readers never see a torn blob.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &blob)
            .await
            .map_err(|e| storage_err("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_err("rename", &path, e))?;

        self.counters.stored(blob.len() as u64, old);
        Ok(())
    }

    async fn delete(&self, scope: &str, chunk_index: u64) -> Result<bool> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        let path = self.chunk_path(scope, chunk_index)?;
        let len = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(storage_err("stat", &path, e)),
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.counters.removed(len);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_err("delete", &path, e)),
        }
    }

    async fn clear_scope(&self, scope: &str) -> Result<()> {
        let dir = self.scope_dir(scope)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(storage_err("list", &dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err("list", &dir, e))?
        {
            let len = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                self.counters.removed(len);
            }
        }
        tokio::fs::remove_dir(&dir)
            .await
            .map_err(|e| storage_err("remove", &dir, e))?;
        debug!(scope, "cleared directory store scope");
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }
}

// =============================================================================
// Tests
// =============================================================================
