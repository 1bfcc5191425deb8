//! Decoded volume cache.
//!
//! Decoding a large PBD8 or TIFF stack takes seconds, so recently loaded
//! volumes are kept in an LRU keyed by their resolved local path.
//!
//! # Size-Based Eviction
//!
//! The cache tracks the total voxel bytes it holds and evicts
//! least-recently-used volumes when the capacity is exceeded. A single
//! volume larger than the capacity is never retained.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::RwLock;
use tracing::debug;

use super::volume::VolumeBuffer;

/// Default cache capacity: 1GB of voxel data
pub const DEFAULT_VOLUME_CACHE_CAPACITY: usize = 1024 * 1024 * 1024;

/// Upper bound on cached volumes regardless of size
const DEFAULT_MAX_ENTRIES: usize = 64;

struct CacheState {
    entries: LruCache<PathBuf, Arc<VolumeBuffer>>,
    current_size: usize,
}

/// LRU cache of decoded volumes with a byte capacity.
///
/// Shared between loads via `Arc`; all methods take `&self`.
pub struct VolumeCache {
    state: RwLock<CacheState>,
    max_size: usize,
}

impl VolumeCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_VOLUME_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `max_size` bytes of voxel data.
    pub fn with_capacity(max_size: usize) -> Self {
        let entries = NonZeroUsize::new(DEFAULT_MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: RwLock::new(CacheState {
                entries: LruCache::new(entries),
                current_size: 0,
            }),
            max_size,
        }
    }

    /// Look up a volume, marking it recently used.
    pub async fn get(&self, path: &Path) -> Option<Arc<VolumeBuffer>> {
        let mut state = self.state.write().await;
        state.entries.get(path).cloned()
    }

    pub async fn contains(&self, path: &Path) -> bool {
        self.state.read().await.entries.contains(path)
    }

    /// Store a volume, evicting older entries to stay within capacity.
    pub async fn put(&self, path: PathBuf, volume: Arc<VolumeBuffer>) {
        let size = volume.data().len();
        if size > self.max_size {
            debug!(path = %path.display(), size, "volume larger than cache, not retained");
            return;
        }

        let mut state = self.state.write().await;
        // push hands back either the replaced value for this path or the
        // entry displaced by the entry bound
        if let Some((_, evicted)) = state.entries.push(path, volume) {
            state.current_size = state.current_size.saturating_sub(evicted.data().len());
        }
        state.current_size += size;

        while state.current_size > self.max_size {
            match state.entries.pop_lru() {
                Some((evicted_path, evicted)) => {
                    debug!(path = %evicted_path.display(), "evicted cached volume");
                    state.current_size = state.current_size.saturating_sub(evicted.data().len());
                }
                None => break,
            }
        }
    }

    pub async fn remove(&self, path: &Path) -> Option<Arc<VolumeBuffer>> {
        let mut state = self.state.write().await;
        let removed = state.entries.pop(path)?;
        state.current_size = state.current_size.saturating_sub(removed.data().len());
        Some(removed)
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.current_size = 0;
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Total voxel bytes currently cached.
    pub async fn size(&self) -> usize {
        self.state.read().await.current_size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for VolumeCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
