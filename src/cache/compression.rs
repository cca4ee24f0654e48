//! Tier-2 Blob Compression
//!
//! Serialized chunks may be LZ4-compressed before they reach the persistent
//! store. Every stored blob starts with a one-byte algorithm tag so reads do
//! not depend on the current configuration.
//!
//! # Example
//!
//! ```
//! use trajcache::cache::compression::{BlobCodec, CompressionAlgorithm};
//!
//! let codec = BlobCodec::new(CompressionAlgorithm::Lz4);
//!
//! let data = vec![7u8; 4096];
//! let blob = codec.seal(&data);
//! assert!(blob.len() < data.len());
//!
//! let opened = codec.open(&blob).unwrap();
//! assert_eq!(opened.as_ref(), &data[..]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms for tier-2 blobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    #[default]
    None,
    /// LZ4 - fast compression
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// Tag byte written in front of every blob
    fn tag(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionAlgorithm::None),
            1 => Some(CompressionAlgorithm::Lz4),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for CompressionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionAlgorithm::None),
            "lz4" => Ok(CompressionAlgorithm::Lz4),
            other => Err(Error::Config(format!(
                "unknown compression algorithm: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Blob Codec
// =============================================================================

/// Seals serialized chunks into tagged, optionally compressed blobs
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobCodec {
    algorithm: CompressionAlgorithm,
}

impl BlobCodec {
    /// Create a codec that compresses with `algorithm`
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Configured algorithm
    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    /// Wrap `data` into a blob
    ///
    /// Falls back to storing uncompressed when compression fails or does not
    /// shrink the payload.
    pub fn seal(&self, data: &[u8]) -> Bytes {
        let (algorithm, payload) = match self.algorithm {
            CompressionAlgorithm::None => (CompressionAlgorithm::None, None),
            CompressionAlgorithm::Lz4 => match lz4_compress(data) {
                Ok(compressed) if compressed.len() < data.len() => {
                    (CompressionAlgorithm::Lz4, Some(compressed))
                }
                Ok(_) => (CompressionAlgorithm::None, None),
                Err(e) => {
                    tracing::warn!("Compression failed, storing uncompressed: {}", e);
                    (CompressionAlgorithm::None, None)
                }
            },
        };

        let body = payload.as_deref().unwrap_or(data);
        let mut blob = BytesMut::with_capacity(1 + body.len());
        blob.put_u8(algorithm.tag());
        blob.put_slice(body);
        blob.freeze()
    }

    /// Unwrap a blob produced by [`BlobCodec::seal`]
    pub fn open(&self, blob: &Bytes) -> Result<Bytes> {
        let Some(&tag) = blob.first() else {
            return Err(Error::Format("empty tier-2 blob".into()));
        };
        match CompressionAlgorithm::from_tag(tag) {
            Some(CompressionAlgorithm::None) => Ok(blob.slice(1..)),
            Some(CompressionAlgorithm::Lz4) => lz4_decompress(&blob[1..]).map(Bytes::from),
            None => Err(Error::Format(format!("unknown tier-2 blob tag {}", tag))),
        }
    }
}

fn lz4_compress(data: &[u8]) -> Result<Vec<u8>> {
    lz4::block::compress(data, Some(lz4::block::CompressionMode::DEFAULT), true).map_err(|e| {
        Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        }
    })
}

fn lz4_decompress(data: &[u8]) -> Result<Vec<u8>> {
    lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
        algorithm: "LZ4".into(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const TEST_DATA: &[u8] = b"Hello, this is test data that should compress well. \
        It has some repetition: Hello, this is test data that should compress well.";

    #[test]
    fn test_lz4_blob_roundtrip() {
        let codec = BlobCodec::new(CompressionAlgorithm::Lz4);
        let blob = codec.seal(TEST_DATA);
        assert_eq!(blob[0], 1);
        assert!(blob.len() < TEST_DATA.len());
        assert_eq!(codec.open(&blob).unwrap().as_ref(), TEST_DATA);
    }

    #[test]
    fn test_uncompressed_blob_roundtrip() {
        let codec = BlobCodec::default();
        let blob = codec.seal(TEST_DATA);
        assert_eq!(blob.len(), TEST_DATA.len() + 1);
        assert_eq!(codec.open(&blob).unwrap().as_ref(), TEST_DATA);
    }

    #[test]
    fn test_incompressible_falls_back() {
        let codec = BlobCodec::new(CompressionAlgorithm::Lz4);
        let blob = codec.seal(b"abc");
        assert_eq!(blob[0], 0);
        assert_eq!(codec.open(&blob).unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_open_ignores_configured_algorithm() {
        let sealed = BlobCodec::new(CompressionAlgorithm::Lz4).seal(TEST_DATA);
        let opened = BlobCodec::default().open(&sealed).unwrap();
        assert_eq!(opened.as_ref(), TEST_DATA);
    }

    #[test]
    fn test_bad_blobs() {
        let codec = BlobCodec::default();
        assert_matches!(codec.open(&Bytes::new()), Err(Error::Format(_)));
        assert_matches!(
            codec.open(&Bytes::from_static(&[9, 1, 2])),
            Err(Error::Format(_))
        );
        assert_matches!(
            codec.open(&Bytes::from_static(&[1, 0xff, 0xff])),
            Err(Error::DecompressionFailed { .. })
        );
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("LZ4".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Lz4);
        assert_eq!("none".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::None);
        assert_matches!("zstd".parse::<CompressionAlgorithm>(), Err(Error::Config(_)));
    }
}
