//! trajcache - Two-Tier Caching Proxy for Trajectory Frames
//!
//! Streams simulation trajectory frames from a remote source while hiding
//! network latency behind a chunked, two-tier cache with next-chunk
//! prefetch and per-chunk request collapsing.
//!
//! # Architecture
//!
//! ```text
//! caller → TrajectoryCacheProxy → tier 1 → tier 2 → FetchCoordinator → FrameSource
//!                                                                          │
//!                                                  FrameCodec (wire A/B) ◀─┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trajcache::{HttpFrameSource, HttpSourceConfig, ProxyConfig, TrajectoryCacheProxy};
//!
//! # async fn run() -> trajcache::Result<()> {
//! let source = HttpFrameSource::new(HttpSourceConfig {
//!     base_url: "http://localhost:8080/trajectories/run-1".to_string(),
//!     ..Default::default()
//! })?;
//! let proxy = TrajectoryCacheProxy::new(Arc::new(source), ProxyConfig::default())?;
//! proxy.init().await?;
//!
//! for index in 0..proxy.get_frame_count()? {
//!     let frame = proxy.get_frame(index).await?;
//!     println!("frame {} has {} atoms", index, frame.atom_count());
//! }
//! proxy.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, coordinator, metrics and the proxy
//! - [`codec`] - Wire formats
//! - [`config`] - Proxy configuration
//! - [`error`] - Error types
//! - [`frame`] - Data model
//! - [`source`] - Remote frame sources

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod source;

// Re-export commonly used types
pub use cache::{
    CompressionAlgorithm, DirectoryTierStore, InMemoryTierStore, MetricsSnapshot, Mode,
    PersistentTierStore, ProxyState, TrajectoryCacheProxy,
};
pub use codec::WireFormat;
pub use config::ProxyConfig;
pub use error::{Error, Result};
pub use frame::{Chunk, Frame, Metadata};
pub use source::{FrameSource, HttpFrameSource, HttpSourceConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
