//! Round-robin balancing.

use std::sync::{Arc, Mutex};

use crate::conn::Conn;

use super::{next_handle_id, BalancerHandle};

struct Entry {
    id: u64,
    conn: Arc<Conn>,
}

struct Ring {
    entries: Vec<Entry>,
    next: usize,
}

/// Insertion-ordered ring; fair under equal latency.
pub struct RoundRobin {
    ring: Mutex<Ring>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(Ring {
                entries: Vec::new(),
                next: 0,
            }),
        }
    }

    pub(super) fn insert(&self, conn: Arc<Conn>) -> BalancerHandle {
        let id = next_handle_id();
        let mut ring = self.ring.lock().unwrap();
        ring.entries.push(Entry { id, conn });
        BalancerHandle::new(id)
    }

    pub(super) fn remove(&self, handle: &BalancerHandle) {
        let mut ring = self.ring.lock().unwrap();
        ring.entries.retain(|e| e.id != handle.id);
        if !ring.entries.is_empty() {
            ring.next %= ring.entries.len();
        } else {
            ring.next = 0;
        }
    }

    pub(super) fn next(&self) -> Option<Arc<Conn>> {
        let mut ring = self.ring.lock().unwrap();
        if ring.entries.is_empty() {
            return None;
        }
        let pos = ring.next % ring.entries.len();
        ring.next = (pos + 1) % ring.entries.len();
        Some(Arc::clone(&ring.entries[pos].conn))
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}
