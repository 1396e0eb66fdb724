//! Degenerate single-conn balancer, used when discovery is disabled.

use std::sync::{Arc, Mutex};

use crate::conn::Conn;

use super::{next_handle_id, BalancerHandle};

/// Holds at most one conn; a new insert replaces the previous one.
pub struct SingleConn {
    slot: Mutex<Option<(u64, Arc<Conn>)>>,
}

impl SingleConn {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub(super) fn insert(&self, conn: Arc<Conn>) -> BalancerHandle {
        let id = next_handle_id();
        *self.slot.lock().unwrap() = Some((id, conn));
        BalancerHandle::new(id)
    }

    pub(super) fn remove(&self, handle: &BalancerHandle) {
        let mut slot = self.slot.lock().unwrap();
        if matches!(&*slot, Some((id, _)) if *id == handle.id) {
            *slot = None;
        }
    }

    pub(super) fn next(&self) -> Option<Arc<Conn>> {
        self.slot.lock().unwrap().as_ref().map(|(_, c)| Arc::clone(c))
    }
}

impl Default for SingleConn {
    fn default() -> Self {
        Self::new()
    }
}
