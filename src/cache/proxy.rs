//! Trajectory Cache Proxy
//!
//! The only component callers talk to. Owns both tiers, the fetch
//! coordinator, the chunk layout and the prefetch policy.
//!
//! # Lookup chain
//!
//! 1. Tier 1 hit: return, refresh tier-1 recency
//! 2. Tier 2 hit: decode, refresh tier-2 recency, promote into tier 1
//! 3. Miss: one coordinator-guarded remote fetch per chunk, then commit
//!    to tier 2 and only afterwards to tier 1
//!
//! A chunk is never present in tier 1 unless its blob was written to tier 2
//! first. If the tier-2 write fails the miss fails and tier 1 is untouched.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::compression::BlobCodec;
use super::coordinator::FetchCoordinator;
use super::indexer::ChunkIndexer;
use super::lru::EvictionCache;
use super::metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
use super::store::{InMemoryTierStore, PersistentTierStore, StoreStats};
use crate::codec;
use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::frame::{Chunk, Frame, Metadata};
use crate::source::FrameSource;

// =============================================================================
// State
// =============================================================================

/// How a ready proxy serves frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Frames are served from cached chunks
    Chunked,
    /// One frame exceeds the chunk budget; every request goes to the source
    Transparent,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Chunked => write!(f, "chunked"),
            Mode::Transparent => write!(f, "transparent"),
        }
    }
}

/// Lifecycle of a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Uninitialized,
    Initializing,
    Ready(Mode),
}

/// Everything fixed by a successful `init`
#[derive(Debug, Clone, Copy)]
struct Layout {
    metadata: Metadata,
    mode: Mode,
    frame_size_bytes: u64,
    indexer: ChunkIndexer,
}

/// Clears the initializing flag even if `init` is dropped midway
struct InitFlag<'a>(&'a AtomicBool);

impl<'a> InitFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InitFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// Proxy
// =============================================================================

struct ProxyInner {
    config: ProxyConfig,
    source: Arc<dyn FrameSource>,
    store: Arc<dyn PersistentTierStore>,
    /// Scope of this instance inside the store
    store_id: String,
    blob_codec: BlobCodec,

    layout: OnceCell<Layout>,
    initializing: AtomicBool,
    /// Set by `close`; nothing is committed afterwards
    closed: AtomicBool,

    /// Tier 1: materialized chunks, bounded by entry count
    tier1: Mutex<EvictionCache<u64, Arc<Chunk>>>,
    /// Tier 2 accounting; blobs live in `store`
    tier2: Mutex<EvictionCache<u64, ()>>,
    coordinator: FetchCoordinator<Arc<Chunk>>,

    /// Chunk of the previous `get_frame`, for boundary-crossing prefetch
    last_chunk: Mutex<Option<u64>>,
    metrics: CacheMetrics,
}

/// Two-tier caching proxy in front of a [`FrameSource`]
///
/// Cloning is cheap; clones share tiers, coordinator and metrics.
#[derive(Clone)]
pub struct TrajectoryCacheProxy {
    inner: Arc<ProxyInner>,
}

impl TrajectoryCacheProxy {
    /// Create a proxy with an in-memory tier-2 store
    pub fn new(source: Arc<dyn FrameSource>, config: ProxyConfig) -> Result<Self> {
        Self::with_store(source, Arc::new(InMemoryTierStore::new()), config)
    }

    /// Create a proxy on top of an explicit tier-2 store
    pub fn with_store(
        source: Arc<dyn FrameSource>,
        store: Arc<dyn PersistentTierStore>,
        config: ProxyConfig,
    ) -> Result<Self> {
        config.validate()?;

        let store_id = generate_store_id();
        debug!(store_id = %store_id, "created cache proxy");

        Ok(Self {
            inner: Arc::new(ProxyInner {
                tier1: Mutex::new(EvictionCache::with_max_entries(config.tier1_capacity)),
                tier2: Mutex::new(EvictionCache::with_max_bytes(config.tier2_budget_bytes)),
                blob_codec: BlobCodec::new(config.tier2_compression),
                config,
                source,
                store,
                store_id,
                layout: OnceCell::new(),
                initializing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                coordinator: FetchCoordinator::new(),
                last_chunk: Mutex::new(None),
                metrics: CacheMetrics::new(),
            }),
        })
    }

    // -------------------------------------------------------------------------
    // Initialization
    // -------------------------------------------------------------------------

    /// Fetch metadata, measure one frame and fix the chunk layout
    ///
    /// Idempotent. Concurrent calls share one initialization; a failed one
    /// leaves the proxy uninitialized so it can be retried.
    #[instrument(skip(self), fields(store_id = %self.inner.store_id))]
    pub async fn init(&self) -> Result<()> {
        let inner = &self.inner;
        inner
            .layout
            .get_or_try_init(|| async {
                let _flag = InitFlag::raise(&inner.initializing);
                self.load_layout().await
            })
            .await?;
        Ok(())
    }

    async fn load_layout(&self) -> Result<Layout> {
        let inner = &self.inner;
        let metadata = inner.source.get_metadata().await?;

        if metadata.frame_count == 0 {
            info!("trajectory is empty");
            return Ok(Layout {
                metadata,
                mode: Mode::Chunked,
                frame_size_bytes: 0,
                indexer: ChunkIndexer::new(1, 0),
            });
        }

        // The sample only sizes chunks and is not cached.
        let sample = inner.source.get_frames(0, 1).await?;
        let frame_size_bytes = sample
            .first()
            .map(|f| f.byte_size() as u64)
            .ok_or_else(|| Error::Source("source returned no sample frame".to_string()))?;

        let target = inner.config.target_chunk_bytes;
        let (mode, frames_per_chunk) = if frame_size_bytes > target {
            (Mode::Transparent, 1)
        } else {
            (Mode::Chunked, (target / frame_size_bytes).max(1))
        };

        info!(
            frame_count = metadata.frame_count,
            frame_size_bytes,
            frames_per_chunk,
            mode = %mode,
            "cache proxy ready"
        );

        Ok(Layout {
            metadata,
            mode,
            frame_size_bytes,
            indexer: ChunkIndexer::new(frames_per_chunk, metadata.frame_count),
        })
    }

    fn layout(&self) -> Result<&Layout> {
        self.inner.layout.get().ok_or(Error::NotInitialized)
    }

    // -------------------------------------------------------------------------
    // Produced contract
    // -------------------------------------------------------------------------

    /// Trajectory metadata
    pub fn get_metadata(&self) -> Result<Metadata> {
        Ok(self.layout()?.metadata)
    }

    /// Number of frames in the trajectory
    pub fn get_frame_count(&self) -> Result<u64> {
        Ok(self.layout()?.metadata.frame_count)
    }

    /// Fetch one frame through the cache
    #[instrument(level = "debug", skip(self))]
    pub async fn get_frame(&self, frame_index: u64) -> Result<Frame> {
        let layout = *self.layout()?;
        let frame_count = layout.metadata.frame_count;
        if frame_index >= frame_count {
            return Err(Error::Range {
                index: frame_index,
                frame_count,
            });
        }

        if layout.mode == Mode::Transparent {
            return self.fetch_single(frame_index).await;
        }

        let location = layout.indexer.locate(frame_index);
        self.maybe_prefetch(&layout.indexer, location.chunk_index);

        let chunk = self
            .resolve_chunk(location.chunk_index, &layout.indexer)
            .await?;
        chunk.frame(location.offset).cloned().ok_or_else(|| {
            Error::Internal(format!(
                "chunk {} has no frame at offset {}",
                location.chunk_index, location.offset
            ))
        })
    }

    async fn fetch_single(&self, frame_index: u64) -> Result<Frame> {
        let inner = &self.inner;
        inner.metrics.record_transparent_fetch();

        let tracker = LatencyTracker::start();
        let frames = inner
            .source
            .get_frames(frame_index, frame_index + 1)
            .await?;
        inner
            .metrics
            .record_remote_fetch(frames.len() as u64, tracker.elapsed());

        frames
            .into_iter()
            .next()
            .ok_or_else(|| Error::Source(format!("source returned no frame {}", frame_index)))
    }

    // -------------------------------------------------------------------------
    // Prefetch
    // -------------------------------------------------------------------------

    /// Start a background fetch of the next chunk when playback has just
    /// moved into a different chunk.
    fn maybe_prefetch(&self, indexer: &ChunkIndexer, chunk_index: u64) {
        let inner = &self.inner;
        let crossed = {
            let mut last = inner.last_chunk.lock();
            let crossed = *last != Some(chunk_index);
            *last = Some(chunk_index);
            crossed
        };
        if !crossed || !inner.config.prefetch || self.is_closed() {
            return;
        }

        let next = chunk_index + 1;
        if !indexer.contains_chunk(next)
            || self.is_cached(next)
            || inner.coordinator.is_pending(next)
        {
            return;
        }

        inner.metrics.record_prefetch_issued();
        debug!(chunk_index = next, "prefetching chunk");

        let proxy = self.clone();
        let range = indexer.frame_range(next);
        tokio::spawn(async move {
            if let Err(e) = proxy.fetch_guarded(next, range).await {
                proxy.inner.metrics.record_prefetch_failed();
                warn!(chunk_index = next, error = %e, "prefetch failed");
            }
        });
    }

    // -------------------------------------------------------------------------
    // Lookup chain
    // -------------------------------------------------------------------------

    async fn resolve_chunk(&self, chunk_index: u64, indexer: &ChunkIndexer) -> Result<Arc<Chunk>> {
        let inner = &self.inner;

        let hit = inner.tier1.lock().get(&chunk_index).cloned();
        if let Some(chunk) = hit {
            inner.metrics.record_tier1_hit();
            return Ok(chunk);
        }
        inner.metrics.record_tier1_miss();

        let range = indexer.frame_range(chunk_index);
        let expected = (range.end - range.start) as usize;
        if let Some(chunk) = self.read_tier2(chunk_index, expected).await? {
            inner.metrics.record_tier2_hit();
            self.promote(Arc::clone(&chunk));
            return Ok(chunk);
        }
        inner.metrics.record_tier2_miss();

        self.fetch_guarded(chunk_index, range).await
    }

    /// Read and decode a chunk from tier 2
    ///
    /// A blob that is gone, undecodable or holds other than `expected`
    /// frames is dropped from tier 2 and reported as a miss.
    async fn read_tier2(&self, chunk_index: u64, expected: usize) -> Result<Option<Arc<Chunk>>> {
        let inner = &self.inner;
        if !inner.tier2.lock().has(&chunk_index) {
            return Ok(None);
        }

        let blob = inner
            .store
            .get(&inner.store_id, chunk_index)
            .await
            .map_err(|e| {
                inner.metrics.record_storage_failure();
                e
            })?;
        let Some(blob) = blob else {
            debug!(chunk_index, "tier-2 blob missing, dropping index entry");
            inner.tier2.lock().remove(&chunk_index);
            self.update_stats();
            return Ok(None);
        };

        let decoded = inner
            .blob_codec
            .open(&blob)
            .and_then(|payload| codec::decode_chunk(&payload));
        let frames = match decoded {
            Ok(frames) if frames.len() == expected => frames,
            Ok(frames) => {
                warn!(
                    chunk_index,
                    decoded = frames.len(),
                    expected,
                    "truncated tier-2 blob, discarding"
                );
                self.discard_tier2(chunk_index).await;
                return Ok(None);
            }
            Err(e) => {
                warn!(chunk_index, error = %e, "corrupt tier-2 blob, discarding");
                self.discard_tier2(chunk_index).await;
                return Ok(None);
            }
        };
        inner.tier2.lock().get(&chunk_index);

        Ok(Some(Arc::new(Chunk::new(chunk_index, frames))))
    }

    /// Delete a chunk's blob, then drop its tier-2 accounting
    ///
    /// A failed delete keeps the entry accounted so its bytes stay within
    /// the budget.
    async fn discard_tier2(&self, chunk_index: u64) {
        let inner = &self.inner;
        match inner.store.delete(&inner.store_id, chunk_index).await {
            Ok(_) => {
                inner.tier2.lock().remove(&chunk_index);
                self.update_stats();
            }
            Err(e) => {
                inner.metrics.record_storage_failure();
                warn!(chunk_index, error = %e, "failed to delete tier-2 blob");
            }
        }
    }

    /// Copy a tier-2 hit into tier 1
    fn promote(&self, chunk: Arc<Chunk>) {
        let inner = &self.inner;
        let evicted = inner.tier1.lock().set(chunk.index, chunk, 1);
        inner.metrics.record_promotion();
        inner.metrics.record_tier1_evictions(evicted.len() as u64);
        self.update_stats();
    }

    /// Run the miss path for a chunk under the coordinator
    async fn fetch_guarded(&self, chunk_index: u64, range: Range<u64>) -> Result<Arc<Chunk>> {
        let proxy = self.clone();
        self.inner
            .coordinator
            .run_exclusive(chunk_index, move || async move {
                proxy.fetch_chunk(chunk_index, range).await
            })
            .await
    }

    async fn fetch_chunk(&self, chunk_index: u64, range: Range<u64>) -> Result<Arc<Chunk>> {
        let inner = &self.inner;

        // A flight that finished while this caller was checking the tiers.
        let cached = inner.tier1.lock().peek(&chunk_index).cloned();
        if let Some(chunk) = cached {
            return Ok(chunk);
        }

        let expected = (range.end - range.start) as usize;
        let tracker = LatencyTracker::start();
        let mut frames = inner.source.get_frames(range.start, range.end).await?;
        inner
            .metrics
            .record_remote_fetch(frames.len() as u64, tracker.elapsed());

        if frames.len() < expected {
            return Err(Error::Source(format!(
                "source returned {} of {} frames for chunk {}",
                frames.len(),
                expected,
                chunk_index
            )));
        }
        frames.truncate(expected);

        let chunk = Arc::new(Chunk::new(chunk_index, frames));
        self.commit_chunk(&chunk).await?;
        Ok(chunk)
    }

    // -------------------------------------------------------------------------
    // Write path
    // -------------------------------------------------------------------------

    /// Store a freshly fetched chunk: tier 2 first, then tier 1.
    ///
    /// Tier 1 is only written once the tier-2 write has succeeded.
    async fn commit_chunk(&self, chunk: &Arc<Chunk>) -> Result<()> {
        let inner = &self.inner;
        if self.is_closed() {
            debug!(chunk_index = chunk.index, "proxy closed, not caching");
            return Ok(());
        }

        let blob = inner.blob_codec.seal(&codec::encode_chunk(&chunk.frames));
        let size = blob.len() as u64;

        if size > inner.config.tier2_budget_bytes {
            inner.metrics.record_oversize_chunk();
            debug!(
                chunk_index = chunk.index,
                size,
                budget = inner.config.tier2_budget_bytes,
                "chunk larger than tier-2 budget, not caching"
            );
            return Ok(());
        }

        // Step 1: tier 2
        self.write_tier2(chunk.index, blob, size).await?;
        if self.is_closed() {
            // `close` ran while the blob was being written.
            self.discard_tier2(chunk.index).await;
            return Ok(());
        }

        // Step 2: tier 1
        let evicted = inner.tier1.lock().set(chunk.index, Arc::clone(chunk), 1);
        inner.metrics.record_tier1_evictions(evicted.len() as u64);
        if self.is_closed() {
            inner.tier1.lock().remove(&chunk.index);
            self.discard_tier2(chunk.index).await;
        }
        self.update_stats();
        Ok(())
    }

    /// Persist a blob and make room for it, deleting each victim's blob
    /// before its accounting is dropped.
    async fn write_tier2(&self, chunk_index: u64, blob: Bytes, size: u64) -> Result<()> {
        let inner = &self.inner;
        let scope = inner.store_id.as_str();

        if let Err(e) = inner.store.set(scope, chunk_index, blob).await {
            inner.metrics.record_storage_failure();
            warn!(chunk_index, error = %e, "tier-2 write failed");
            return Err(e);
        }

        loop {
            // Account the new blob only under the same lock that found no
            // victim, so the insert itself never evicts.
            let victim = {
                let mut tier2 = inner.tier2.lock();
                match tier2.victim_for(&chunk_index, size) {
                    Some(victim) => victim,
                    None => {
                        tier2.set(chunk_index, (), size);
                        break;
                    }
                }
            };
            if let Err(e) = inner.store.delete(scope, victim).await {
                inner.metrics.record_storage_failure();
                warn!(victim, error = %e, "tier-2 eviction failed");
                // Leave no unaccounted blob behind.
                let _ = inner.store.delete(scope, chunk_index).await;
                return Err(e);
            }
            inner.tier2.lock().remove(&victim);
            inner.metrics.record_tier2_eviction();
            debug!(victim, "evicted chunk from tier 2");
        }

        self.update_stats();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Empty both tiers and drop this instance's store scope
    ///
    /// Fetches still in flight complete for their callers but are no longer
    /// cached, and no further prefetches start.
    #[instrument(skip(self), fields(store_id = %self.inner.store_id))]
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        inner.tier1.lock().clear();
        inner.tier2.lock().clear();
        *inner.last_chunk.lock() = None;
        self.update_stats();

        inner.store.clear_scope(&inner.store_id).await?;
        info!("cache proxy closed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Current lifecycle state
    pub fn state(&self) -> ProxyState {
        match self.inner.layout.get() {
            Some(layout) => ProxyState::Ready(layout.mode),
            None if self.inner.initializing.load(Ordering::SeqCst) => ProxyState::Initializing,
            None => ProxyState::Uninitialized,
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Serving mode, once initialized
    pub fn mode(&self) -> Option<Mode> {
        self.inner.layout.get().map(|l| l.mode)
    }

    /// Frames per chunk, once initialized
    pub fn frames_per_chunk(&self) -> Option<u64> {
        self.inner.layout.get().map(|l| l.indexer.frames_per_chunk())
    }

    /// Measured size of one frame, once initialized
    pub fn frame_size_bytes(&self) -> Option<u64> {
        self.inner.layout.get().map(|l| l.frame_size_bytes)
    }

    /// Identifier scoping this instance's tier-2 blobs
    pub fn store_id(&self) -> &str {
        &self.inner.store_id
    }

    /// Configuration in effect
    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    /// Whether a chunk is held by either tier
    pub fn is_cached(&self, chunk_index: u64) -> bool {
        self.inner.tier1.lock().has(&chunk_index) || self.inner.tier2.lock().has(&chunk_index)
    }

    /// Whether a chunk is held by tier 1
    pub fn in_tier1(&self, chunk_index: u64) -> bool {
        self.inner.tier1.lock().has(&chunk_index)
    }

    /// Whether a chunk is accounted in tier 2
    pub fn in_tier2(&self, chunk_index: u64) -> bool {
        self.inner.tier2.lock().has(&chunk_index)
    }

    /// Whether a fetch for a chunk is in flight
    pub fn is_pending(&self, chunk_index: u64) -> bool {
        self.inner.coordinator.is_pending(chunk_index)
    }

    /// Backing store statistics
    pub fn store_stats(&self) -> StoreStats {
        self.inner.store.stats()
    }

    /// Metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.update_stats();
        let mut snapshot = self.inner.metrics.snapshot();
        snapshot.coalesced_fetches = self.inner.coordinator.joined();
        snapshot
    }

    fn update_stats(&self) {
        let inner = &self.inner;
        let tier1_entries = inner.tier1.lock().len() as u64;
        inner.metrics.update_tier1_stats(tier1_entries);
        let (tier2_entries, tier2_bytes) = {
            let tier2 = inner.tier2.lock();
            (tier2.len() as u64, tier2.size_bytes())
        };
        inner.metrics.update_tier2_stats(tier2_entries, tier2_bytes);
    }
}

impl std::fmt::Debug for TrajectoryCacheProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrajectoryCacheProxy")
            .field("store_id", &self.inner.store_id)
            .field("state", &self.state())
            .finish()
    }
}

/// `<unix-millis>-<uuid>`
fn generate_store_id() -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4())
}

// =============================================================================
// Tests
// =============================================================================
