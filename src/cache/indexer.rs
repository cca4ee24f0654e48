//! Chunk Indexer
//!
//! Pure arithmetic between global frame indices and chunk coordinates.

use std::ops::Range;

/// Location of one frame inside the chunk grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLocation {
    /// Chunk holding the frame
    pub chunk_index: u64,
    /// Offset of the frame inside that chunk
    pub offset: usize,
}

/// Maps frame indices onto fixed-size chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkIndexer {
    frames_per_chunk: u64,
    frame_count: u64,
}

impl ChunkIndexer {
    /// Create an indexer; `frames_per_chunk` is clamped to at least 1
    pub fn new(frames_per_chunk: u64, frame_count: u64) -> Self {
        Self {
            frames_per_chunk: frames_per_chunk.max(1),
            frame_count,
        }
    }

    /// Frames per (full) chunk
    #[inline]
    pub fn frames_per_chunk(&self) -> u64 {
        self.frames_per_chunk
    }

    /// Total frames in the trajectory
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Chunk index for a frame
    #[inline]
    pub fn chunk_of(&self, frame_index: u64) -> u64 {
        frame_index / self.frames_per_chunk
    }

    /// Chunk index and intra-chunk offset for a frame
    #[inline]
    pub fn locate(&self, frame_index: u64) -> FrameLocation {
        FrameLocation {
            chunk_index: self.chunk_of(frame_index),
            offset: (frame_index % self.frames_per_chunk) as usize,
        }
    }

    /// Half-open frame range covered by a chunk
    pub fn frame_range(&self, chunk_index: u64) -> Range<u64> {
        let start = chunk_index.saturating_mul(self.frames_per_chunk);
        let end = start
            .saturating_add(self.frames_per_chunk)
            .min(self.frame_count);
        start.min(self.frame_count)..end
    }

    /// Number of chunks needed to cover every frame
    #[inline]
    pub fn chunk_count(&self) -> u64 {
        self.frame_count.div_ceil(self.frames_per_chunk)
    }

    /// Whether the chunk index names an existing chunk
    #[inline]
    pub fn contains_chunk(&self, chunk_index: u64) -> bool {
        chunk_index < self.chunk_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_chunk_boundaries() {
        let indexer = ChunkIndexer::new(100, 250);
        assert_eq!(indexer.chunk_count(), 3);
        assert_eq!(indexer.frame_range(0), 0..100);
        assert_eq!(indexer.frame_range(1), 100..200);
        assert_eq!(indexer.frame_range(2), 200..250);
    }

    #[test]
    fn test_last_frame_location() {
        let indexer = ChunkIndexer::new(100, 250);
        assert_eq!(
            indexer.locate(249),
            FrameLocation {
                chunk_index: 2,
                offset: 49
            }
        );
        assert!(!indexer.contains_chunk(3));
    }

    #[test]
    fn test_zero_frames_per_chunk_is_clamped() {
        let indexer = ChunkIndexer::new(0, 10);
        assert_eq!(indexer.frames_per_chunk(), 1);
        assert_eq!(indexer.chunk_count(), 10);
    }

    #[test]
    fn test_empty_trajectory() {
        let indexer = ChunkIndexer::new(10, 0);
        assert_eq!(indexer.chunk_count(), 0);
        assert!(indexer.frame_range(0).is_empty());
    }

    #[test]
    fn test_out_of_grid_range_is_empty() {
        let indexer = ChunkIndexer::new(100, 250);
        assert!(indexer.frame_range(7).is_empty());
    }

    proptest! {
        #[test]
        fn prop_location_inside_range(per_chunk in 1u64..500, count in 1u64..10_000, pick in 0u64..10_000) {
            let indexer = ChunkIndexer::new(per_chunk, count);
            let frame = pick % count;
            let loc = indexer.locate(frame);
            let range = indexer.frame_range(loc.chunk_index);
            prop_assert!(range.contains(&frame));
            prop_assert_eq!(range.start + loc.offset as u64, frame);
            prop_assert!(loc.chunk_index < indexer.chunk_count());
        }
    }
}
