//! Proxy Configuration
//!
//! Sizing knobs for both tiers plus prefetch and compression switches.
//! Loaded from YAML, then overridden field by field from the command line.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::compression::CompressionAlgorithm;
use crate::cache::{DEFAULT_TARGET_CHUNK_BYTES, DEFAULT_TIER1_CAPACITY, DEFAULT_TIER2_BUDGET_BYTES};
use crate::error::{Error, Result};

/// Configuration for a [`crate::TrajectoryCacheProxy`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Byte budget used to size chunks
    pub target_chunk_bytes: u64,

    /// Maximum number of chunks held in tier 1
    pub tier1_capacity: usize,

    /// Maximum cumulative bytes held in tier 2
    pub tier2_budget_bytes: u64,

    /// Prefetch the next chunk when playback crosses a chunk boundary
    pub prefetch: bool,

    /// Compression applied to tier-2 blobs
    pub tier2_compression: CompressionAlgorithm,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            target_chunk_bytes: DEFAULT_TARGET_CHUNK_BYTES,
            tier1_capacity: DEFAULT_TIER1_CAPACITY,
            tier2_budget_bytes: DEFAULT_TIER2_BUDGET_BYTES,
            prefetch: true,
            tier2_compression: CompressionAlgorithm::None,
        }
    }
}

impl ProxyConfig {
    /// Load a configuration from a YAML file; missing fields keep defaults
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Parse a configuration from YAML text
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject sizes that would leave a tier unusable
    pub fn validate(&self) -> Result<()> {
        if self.target_chunk_bytes == 0 {
            return Err(Error::Config(
                "target_chunk_bytes must be greater than 0".to_string(),
            ));
        }
        if self.tier1_capacity == 0 {
            return Err(Error::Config(
                "tier1_capacity must be greater than 0".to_string(),
            ));
        }
        if self.tier2_budget_bytes == 0 {
            return Err(Error::Config(
                "tier2_budget_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.target_chunk_bytes, 8 * 1024 * 1024);
        assert_eq!(config.tier1_capacity, 8);
        assert_eq!(config.tier2_budget_bytes, 512 * 1024 * 1024);
        assert!(config.prefetch);
        assert_eq!(config.tier2_compression, CompressionAlgorithm::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ProxyConfig::from_yaml_str(
            "tier1_capacity: 3\nprefetch: false\ntier2_compression: lz4\n",
        )
        .unwrap();
        assert_eq!(config.tier1_capacity, 3);
        assert!(!config.prefetch);
        assert_eq!(config.tier2_compression, CompressionAlgorithm::Lz4);
        assert_eq!(config.target_chunk_bytes, DEFAULT_TARGET_CHUNK_BYTES);
    }

    #[test]
    fn test_validation_rejects_zero_sizes() {
        assert_matches!(
            ProxyConfig::from_yaml_str("tier1_capacity: 0"),
            Err(Error::Config(_))
        );
        let config = ProxyConfig {
            tier2_budget_bytes: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
        let config = ProxyConfig {
            target_chunk_bytes: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_bad_yaml() {
        assert_matches!(
            ProxyConfig::from_yaml_str("tier2_compression: brotli"),
            Err(Error::Config(_))
        );
    }

    #[test]
    fn test_from_missing_file() {
        assert_matches!(
            ProxyConfig::from_yaml_file("/nonexistent/trajcache.yaml"),
            Err(Error::Config(_))
        );
    }
}
