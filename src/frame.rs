//! Trajectory Data Model
//!
//! Frames are the unit callers ask for; chunks are the unit everything
//! else (transfer, caching, eviction) works in.

use serde::{Deserialize, Serialize};

/// Number of floats in the periodic box matrix
pub const BOX_LEN: usize = 9;

/// Trajectory metadata, fetched once at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Total number of frames in the trajectory
    pub frame_count: u64,
}

impl Metadata {
    /// Create new metadata
    pub fn new(frame_count: u64) -> Self {
        Self { frame_count }
    }
}

/// One timestep: flattened coordinate triples plus the periodic box
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    /// Flattened `x, y, z` coordinates
    pub coords: Vec<f32>,
    /// Row-major 3x3 box matrix
    pub box_matrix: [f32; BOX_LEN],
}

impl Frame {
    /// Create a new frame
    pub fn new(coords: Vec<f32>, box_matrix: [f32; BOX_LEN]) -> Self {
        Self { coords, box_matrix }
    }

    /// Number of atoms (complete coordinate triples)
    #[inline]
    pub fn atom_count(&self) -> usize {
        self.coords.len() / 3
    }

    /// Size of this frame on the wire (single-frame layout)
    #[inline]
    pub fn byte_size(&self) -> usize {
        crate::codec::FRAME_HEADER_LEN + self.coords.len() * 4
    }
}

/// A contiguous run of frames cached and transferred as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Chunk index
    pub index: u64,
    /// Frames in global order
    pub frames: Vec<Frame>,
}

impl Chunk {
    /// Create a new chunk
    pub fn new(index: u64, frames: Vec<Frame>) -> Self {
        Self { index, frames }
    }

    /// Frame at an intra-chunk offset
    #[inline]
    pub fn frame(&self, offset: usize) -> Option<&Frame> {
        self.frames.get(offset)
    }

    /// Number of frames in the chunk
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the chunk has no frames
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
