//! Frame Sources
//!
//! The remote side of the proxy. A source knows how many frames exist and
//! can hand back any contiguous range of them; it owns its own transport,
//! timeouts and retries.

pub mod http;

use async_trait::async_trait;

use crate::error::Result;
use crate::frame::{Frame, Metadata};

pub use http::{HttpFrameSource, HttpSourceConfig};

/// Remote trajectory data source
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Fetch trajectory metadata
    async fn get_metadata(&self) -> Result<Metadata>;

    /// Fetch frames `[start, end)` in order
    async fn get_frames(&self, start: u64, end: u64) -> Result<Vec<Frame>>;
}
