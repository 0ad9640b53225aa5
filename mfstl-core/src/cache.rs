//! Bounded cache of encoded STL buffers.
//!
//! Entries are keyed by the absolute source path and its modification time,
//! so editing or touching a source file makes the old entry unreachable.
//! Inserting the new entry for that path drops the stale one right away;
//! everything else leaves by least-recently-used eviction.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

/// Identity of one version of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub modified: SystemTime,
}

struct Entry {
    bytes: Arc<[u8]>,
    last_used: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<CacheKey, Entry>,
    tick: u64,
}

/// Thread-safe LRU map from [`CacheKey`] to encoded STL bytes.
///
/// A capacity of zero disables caching.
pub struct StlCache {
    capacity: usize,
    state: Mutex<LruState>,
}

impl StlCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<[u8]>> {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        let entry = state.entries.get_mut(key)?;
        entry.last_used = tick;
        Some(Arc::clone(&entry.bytes))
    }

    /// Store `bytes` under `key`, evicting the least recently used entries
    /// beyond capacity. Re-inserting an existing key overwrites it.
    pub fn insert(&self, key: CacheKey, bytes: Arc<[u8]>) {
        if self.capacity == 0 {
            return;
        }

        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        state
            .entries
            .retain(|existing, _| existing.path != key.path || existing.modified == key.modified);
        state.entries.insert(
            key,
            Entry {
                bytes,
                last_used: tick,
            },
        );

        while state.entries.len() > self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    tracing::trace!(path = %key.path.display(), "evicting cached STL");
                    state.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
