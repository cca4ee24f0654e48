//! Two-Tier Chunk Cache
//!
//! Hides remote-source latency behind a bounded in-memory tier and a larger
//! byte-budgeted persistent tier.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                       TrajectoryCacheProxy                            │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ChunkIndexer    frame index -> (chunk, offset)                        │
//! │                                                                       │
//! │  Tier 1 (RAM)            Tier 2 (persistent)        FetchCoordinator  │
//! │  ┌────────────────┐      ┌────────────────────┐     ┌──────────────┐  │
//! │  │ EvictionCache  │◀─────│ EvictionCache      │     │ chunk ->     │  │
//! │  │ by entry count │ hit  │ by byte budget     │     │ shared fetch │  │
//! │  │ Arc<Chunk>     │      │ + TierStore blobs  │     └──────┬───────┘  │
//! │  └───────▲────────┘      └─────────▲──────────┘            │          │
//! │          │    step 2               │  step 1               │          │
//! │          └─────────────────────────┴───────────────────────┘          │
//! │                                 miss                                   │
//! └──────────────────────────────────┬───────────────────────────────────┘
//!                                    ▼
//!                              FrameSource
//! ```
//!
//! # Invariants
//!
//! - Tier 1 never holds more than its entry capacity
//! - Tier 2 never accounts more bytes than its budget
//! - A chunk reaches tier 1 only after its tier-2 write succeeded
//! - At most one remote fetch per chunk is in flight

mod coordinator;
mod indexer;
mod lru;
mod metrics;
mod proxy;
mod store;
pub mod compression;

pub use compression::{BlobCodec, CompressionAlgorithm};
pub use coordinator::FetchCoordinator;
pub use indexer::{ChunkIndexer, FrameLocation};
pub use lru::{Capacity, EvictionCache, EvictionStats};
pub use metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
pub use proxy::{Mode, ProxyState, TrajectoryCacheProxy};
pub use store::{DirectoryTierStore, InMemoryTierStore, PersistentTierStore, StoreStats};

/// Default chunk byte budget (8MB)
pub const DEFAULT_TARGET_CHUNK_BYTES: u64 = 8 * 1024 * 1024;

/// Default tier-1 capacity in chunks
pub const DEFAULT_TIER1_CAPACITY: usize = 8;

/// Default tier-2 byte budget (512MB)
pub const DEFAULT_TIER2_BUDGET_BYTES: u64 = 512 * 1024 * 1024;
