//! Trajectory Cache Integration Tests
//!
//! Exercises the public API end to end:
//! - Playback through the proxy matches the source
//! - Wire-format container served by an in-process source
//! - Persistent tier on disk, with and without compression
//! - Concurrent readers and teardown

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use trajcache::codec::{self, WireFormat};
use trajcache::{
    CompressionAlgorithm, DirectoryTierStore, Error, Frame, FrameSource, InMemoryTierStore,
    Metadata, Mode, PersistentTierStore, ProxyConfig, ProxyState, Result, TrajectoryCacheProxy,
};

/// Frames of `atoms` atoms whose values encode their index
fn synthetic_frame(index: u64, atoms: usize) -> Frame {
    let base = index as f32;
    let coords = (0..atoms * 3).map(|i| base + i as f32 * 0.001).collect();
    let mut box_matrix = [0.0f32; 9];
    box_matrix[0] = 10.0 + base;
    box_matrix[4] = 20.0 + base;
    box_matrix[8] = 30.0 + base;
    Frame::new(coords, box_matrix)
}

/// Source that serves responses as length-prefixed containers, the way a
/// trajectory server would, and decodes them on receipt
struct WireSource {
    frame_count: u64,
    atoms: usize,
    requests: Mutex<Vec<(u64, u64)>>,
    bytes_served: AtomicUsize,
}

impl WireSource {
    fn new(frame_count: u64, atoms: usize) -> Arc<Self> {
        Arc::new(Self {
            frame_count,
            atoms,
            requests: Mutex::new(Vec::new()),
            bytes_served: AtomicUsize::new(0),
        })
    }

    fn chunk_requests(&self) -> usize {
        self.requests.lock().iter().filter(|(s, e)| e - s > 1).count()
    }
}

#[async_trait]
impl FrameSource for WireSource {
    async fn get_metadata(&self) -> Result<Metadata> {
        Ok(Metadata::new(self.frame_count))
    }

    async fn get_frames(&self, start: u64, end: u64) -> Result<Vec<Frame>> {
        self.requests.lock().push((start, end));
        let frames: Vec<Frame> = (start..end.min(self.frame_count))
            .map(|i| synthetic_frame(i, self.atoms))
            .collect();
        let body = codec::encode_chunk(&frames);
        self.bytes_served.fetch_add(body.len(), Ordering::Relaxed);
        codec::decode(&body, WireFormat::LengthPrefixed)
    }
}

fn frame_bytes(atoms: usize) -> u64 {
    synthetic_frame(0, atoms).byte_size() as u64
}

fn temp_root() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("trajcache-it-{}", uuid::Uuid::new_v4()))
}

// =============================================================================
// Playback
// =============================================================================

mod playback_tests {
    use super::*;

    #[tokio::test]
    async fn test_sequential_playback_matches_source() {
        let atoms = 16;
        let source = WireSource::new(1000, atoms);
        let proxy = TrajectoryCacheProxy::new(
            source.clone(),
            ProxyConfig {
                target_chunk_bytes: frame_bytes(atoms) * 64,
                ..Default::default()
            },
        )
        .unwrap();
        proxy.init().await.unwrap();

        assert_eq!(proxy.state(), ProxyState::Ready(Mode::Chunked));
        assert_eq!(proxy.frames_per_chunk(), Some(64));

        for index in 0..1000 {
            let frame = proxy.get_frame(index).await.unwrap();
            assert_eq!(frame, synthetic_frame(index, atoms));
        }

        // 16 chunks: each fetched once, whether by prefetch or on demand.
        assert_eq!(source.chunk_requests(), 16);
        let metrics = proxy.metrics();
        assert_eq!(metrics.remote_fetches, 16);
        assert!(metrics.prefetches_issued > 0);
        assert!(metrics.tier1_hits > 900);
    }

    #[tokio::test]
    async fn test_random_access_after_warmup() {
        let atoms = 4;
        let source = WireSource::new(500, atoms);
        let proxy = TrajectoryCacheProxy::new(
            source.clone(),
            ProxyConfig {
                target_chunk_bytes: frame_bytes(atoms) * 100,
                tier1_capacity: 2,
                prefetch: false,
                ..Default::default()
            },
        )
        .unwrap();
        proxy.init().await.unwrap();

        for index in (0..500).step_by(100) {
            proxy.get_frame(index).await.unwrap();
        }
        assert_eq!(source.chunk_requests(), 5);

        // Everything is in tier 2 now; no further remote traffic.
        for index in [499, 3, 250, 101, 377, 0] {
            assert_eq!(
                proxy.get_frame(index).await.unwrap(),
                synthetic_frame(index, atoms)
            );
        }
        assert_eq!(source.chunk_requests(), 5);
        assert!(proxy.metrics().promotions >= 3);
    }

    #[tokio::test]
    async fn test_out_of_range_and_uninitialized() {
        let proxy =
            TrajectoryCacheProxy::new(WireSource::new(10, 1), ProxyConfig::default()).unwrap();
        assert!(matches!(
            proxy.get_frame(0).await,
            Err(Error::NotInitialized)
        ));

        proxy.init().await.unwrap();
        assert!(matches!(
            proxy.get_frame(10).await,
            Err(Error::Range { index: 10, .. })
        ));
        assert_eq!(proxy.get_metadata().unwrap(), Metadata::new(10));
    }

    #[tokio::test]
    async fn test_huge_frames_use_transparent_mode() {
        let atoms = 1000;
        let source = WireSource::new(20, atoms);
        let proxy = TrajectoryCacheProxy::new(
            source.clone(),
            ProxyConfig {
                target_chunk_bytes: 1024,
                ..Default::default()
            },
        )
        .unwrap();
        proxy.init().await.unwrap();

        assert_eq!(proxy.mode(), Some(Mode::Transparent));
        assert_eq!(proxy.get_frame(19).await.unwrap(), synthetic_frame(19, atoms));
        assert_eq!(source.chunk_requests(), 0);
        assert_eq!(proxy.metrics().transparent_fetches, 1);
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_share_fetches() {
        let atoms = 8;
        let source = WireSource::new(400, atoms);
        let proxy = TrajectoryCacheProxy::new(
            source.clone(),
            ProxyConfig {
                target_chunk_bytes: frame_bytes(atoms) * 100,
                prefetch: false,
                ..Default::default()
            },
        )
        .unwrap();
        proxy.init().await.unwrap();

        let handles: Vec<_> = (0..16u64)
            .map(|reader| {
                let proxy = proxy.clone();
                tokio::spawn(async move {
                    for index in (reader..400).step_by(16) {
                        let frame = proxy.get_frame(index).await?;
                        assert_eq!(frame, synthetic_frame(index, atoms));
                    }
                    Ok::<_, Error>(())
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Late misses either join the flight or find the chunk in tier 1.
        assert_eq!(source.chunk_requests(), 4);
    }
}

// =============================================================================
// Persistent Tier
// =============================================================================

mod store_tests {
    use super::*;

    async fn disk_roundtrip(compression: CompressionAlgorithm) {
        let atoms = 32;
        let root = temp_root();
        let store = Arc::new(DirectoryTierStore::new(&root));
        let source = WireSource::new(300, atoms);
        let proxy = TrajectoryCacheProxy::with_store(
            source.clone(),
            store.clone(),
            ProxyConfig {
                target_chunk_bytes: frame_bytes(atoms) * 100,
                tier1_capacity: 1,
                prefetch: false,
                tier2_compression: compression,
                ..Default::default()
            },
        )
        .unwrap();
        proxy.init().await.unwrap();

        for index in [0, 100, 200] {
            proxy.get_frame(index).await.unwrap();
        }
        assert!(root.join(proxy.store_id()).is_dir());
        assert_eq!(store.stats().blob_count, 3);

        // Chunk 0 now comes back from disk.
        assert_eq!(proxy.get_frame(42).await.unwrap(), synthetic_frame(42, atoms));
        assert_eq!(source.chunk_requests(), 3);
        assert_eq!(proxy.metrics().tier2_hits, 1);

        proxy.close().await.unwrap();
        assert!(!root.join(proxy.store_id()).exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_directory_store_uncompressed() {
        disk_roundtrip(CompressionAlgorithm::None).await;
    }

    #[tokio::test]
    async fn test_directory_store_lz4() {
        disk_roundtrip(CompressionAlgorithm::Lz4).await;
    }

    #[tokio::test]
    async fn test_instances_do_not_share_data() {
        let store = Arc::new(InMemoryTierStore::new());
        let config = ProxyConfig {
            target_chunk_bytes: frame_bytes(1) * 10,
            prefetch: false,
            ..Default::default()
        };

        let first_source = WireSource::new(50, 1);
        let first =
            TrajectoryCacheProxy::with_store(first_source, store.clone(), config.clone()).unwrap();
        first.init().await.unwrap();
        first.get_frame(0).await.unwrap();

        let second_source = WireSource::new(50, 1);
        let second =
            TrajectoryCacheProxy::with_store(second_source.clone(), store.clone(), config).unwrap();
        second.init().await.unwrap();

        assert_ne!(first.store_id(), second.store_id());
        assert!(!second.is_cached(0));
        second.get_frame(0).await.unwrap();
        assert_eq!(second_source.chunk_requests(), 1);
        assert_eq!(store.scope_count(), 2);
    }

    #[test]
    fn test_store_blocking_roundtrip() {
        let store = InMemoryTierStore::new();
        tokio_test::block_on(async {
            store
                .set("scope", 1, bytes::Bytes::from_static(b"blob"))
                .await
                .unwrap();
            assert_eq!(
                store.get("scope", 1).await.unwrap(),
                Some(bytes::Bytes::from_static(b"blob"))
            );
            assert!(store.delete("scope", 1).await.unwrap());
        });
    }
}
