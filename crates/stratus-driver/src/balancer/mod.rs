//! Connection balancing.
//!
//! A balancer owns the set of online conns and picks one per call. The
//! contract is insert/update/remove keyed by an opaque [`BalancerHandle`]
//! plus a concurrent-safe `next`. Strategies are tagged variants of one
//! [`Balancer`] enum; the [`multi`] variant composes siblings for the
//! locality split.

pub mod multi;
pub mod p2c;
pub mod round_robin;
pub mod single;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::conn::Conn;

pub use multi::{Lane, MultiBalancer};
pub use p2c::{P2cCriterion, PowerOfTwoChoices};
pub use round_robin::RoundRobin;
pub use single::SingleConn;

/// Balancer-visible endpoint metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancerInfo {
    pub local: bool,
    pub load_factor: f32,
}

/// Predicate deciding which multi-balancer lane takes a conn.
pub type LanePredicate = fn(&BalancerInfo) -> bool;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

fn next_handle_id() -> u64 {
    NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Stable reference to one inserted conn, consumed by `update`/`remove`.
///
/// Decouples the balancer from endpoint keys: the cluster stores the handle
/// next to its endpoint entry and never tells the balancer about addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancerHandle {
    lane: usize,
    id: u64,
}

impl BalancerHandle {
    fn new(id: u64) -> Self {
        Self { lane: 0, id }
    }

    /// A handle pointing at nothing; update/remove with it are no-ops.
    /// Issued when no multi-balancer lane accepts a conn.
    fn detached() -> Self {
        Self { lane: 0, id: 0 }
    }

    fn is_detached(&self) -> bool {
        self.id == 0
    }
}

/// The pluggable balancing policy.
pub enum Balancer {
    RoundRobin(RoundRobin),
    P2c(PowerOfTwoChoices),
    Single(SingleConn),
    Multi(MultiBalancer),
}

impl Balancer {
    pub fn round_robin() -> Self {
        Balancer::RoundRobin(RoundRobin::new())
    }

    pub fn p2c(criterion: P2cCriterion) -> Self {
        Balancer::P2c(PowerOfTwoChoices::new(criterion))
    }

    pub fn single() -> Self {
        Balancer::Single(SingleConn::new())
    }

    pub fn multi(lanes: Vec<Lane>) -> Self {
        Balancer::Multi(MultiBalancer::new(lanes))
    }

    /// Registers a conn, returning the handle for later update/remove.
    pub fn insert(&self, conn: Arc<Conn>, info: BalancerInfo) -> BalancerHandle {
        match self {
            Balancer::RoundRobin(b) => b.insert(conn),
            Balancer::P2c(b) => b.insert(conn, info),
            Balancer::Single(b) => b.insert(conn),
            Balancer::Multi(b) => b.insert(conn, info),
        }
    }

    /// Refreshes the metadata of an inserted conn so policies can re-sort.
    pub fn update(&self, handle: &BalancerHandle, info: BalancerInfo) {
        if handle.is_detached() {
            return;
        }
        match self {
            Balancer::RoundRobin(_) | Balancer::Single(_) => {}
            Balancer::P2c(b) => b.update(handle, info),
            Balancer::Multi(b) => b.update(handle, info),
        }
    }

    /// Deregisters a conn. The handle is dead afterwards.
    pub fn remove(&self, handle: &BalancerHandle) {
        if handle.is_detached() {
            return;
        }
        match self {
            Balancer::RoundRobin(b) => b.remove(handle),
            Balancer::P2c(b) => b.remove(handle),
            Balancer::Single(b) => b.remove(handle),
            Balancer::Multi(b) => b.remove(handle),
        }
    }

    /// Picks a conn for one call; `None` when empty. Safe under concurrent
    /// callers.
    pub fn next(&self) -> Option<Arc<Conn>> {
        match self {
            Balancer::RoundRobin(b) => b.next(),
            Balancer::P2c(b) => b.next(),
            Balancer::Single(b) => b.next(),
            Balancer::Multi(b) => b.next(),
        }
    }
}
