//! Per-room exclusive sections.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A held room section. Released on drop, on every exit path.
pub struct RoomSection {
    _guard: OwnedMutexGuard<()>,
}

struct LockEntry {
    lock: Arc<Mutex<()>>,
    last_used: u64,
}

#[derive(Default)]
struct LockMap {
    entries: HashMap<String, LockEntry>,
    tick: u64,
}

/// Size-bounded registry of per-room mutexes.
///
/// Acquires for the same room are strictly ordered (tokio mutexes queue
/// fairly); different rooms never contend. When the registry exceeds its
/// capacity, idle entries are evicted LRU — an entry whose mutex is held or
/// waited on is never evicted, so a room can never end up with two live
/// mutexes.
pub struct RoomLocks {
    capacity: usize,
    inner: StdMutex<LockMap>,
}

impl RoomLocks {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: StdMutex::new(LockMap::default()),
        }
    }

    /// Enter the room's exclusive section. Never fails and never times out;
    /// callers bound the wait with their own timeout.
    pub async fn acquire(&self, room_id: &str) -> RoomSection {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.tick += 1;
            let tick = map.tick;
            let entry = map
                .entries
                .entry(room_id.to_string())
                .or_insert_with(|| LockEntry {
                    lock: Arc::new(Mutex::new(())),
                    last_used: tick,
                });
            entry.last_used = tick;
            let lock = Arc::clone(&entry.lock);
            Self::evict_idle(&mut map, self.capacity);
            lock
        };
        RoomSection {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of tracked rooms (mostly for diagnostics).
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_idle(map: &mut LockMap, capacity: usize) {
        while map.entries.len() > capacity {
            // Idle entries are those where the map holds the only Arc:
            // nobody holds the mutex and nobody is queued on it.
            let victim = map
                .entries
                .iter()
                .filter(|(_, e)| Arc::strong_count(&e.lock) == 1)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(id, _)| id.clone());
            match victim {
                Some(id) => {
                    map.entries.remove(&id);
                },
                // Everything is in use; allow temporary overflow.
                None => break,
            }
        }
    }
}
