//! Power-of-two-choices balancing.
//!
//! Samples two distinct conns uniformly at random and keeps the one with
//! the lower criterion score. Pending operation count is the primary
//! signal; slow peers and remote peers pick up penalties. Ties break on
//! error rate, then insertion order.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::conn::Conn;

use super::{next_handle_id, BalancerHandle, BalancerInfo};

/// Additive score penalty for non-local conns when locality is preferred.
/// Finite, so a lone remote endpoint still beats nothing at all.
const LOCAL_PENALTY: f64 = 100.0;

/// Scoring knobs of the p2c strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct P2cCriterion {
    /// Penalize non-local conns.
    pub prefer_local: bool,
    /// Penalize conns whose average operation time is at or above this.
    pub op_time_threshold: Option<Duration>,
}

impl P2cCriterion {
    fn score(&self, conn: &Conn, info: &BalancerInfo, now: Instant) -> (f64, f64) {
        let stats = conn.runtime().stats(now);
        let mut score = stats.op_pending() as f64;
        if let Some(threshold) = self.op_time_threshold {
            if !threshold.is_zero() && stats.avg_op_time >= threshold {
                score += stats.avg_op_time.as_secs_f64() / threshold.as_secs_f64();
            }
        }
        if self.prefer_local && !info.local {
            score += LOCAL_PENALTY;
        }
        (score, stats.err_per_minute)
    }
}

struct Entry {
    id: u64,
    conn: Arc<Conn>,
    info: BalancerInfo,
}

struct State {
    entries: Vec<Entry>,
    rng: SmallRng,
}

/// The p2c strategy.
pub struct PowerOfTwoChoices {
    criterion: P2cCriterion,
    state: Mutex<State>,
}

impl PowerOfTwoChoices {
    pub fn new(criterion: P2cCriterion) -> Self {
        Self {
            criterion,
            state: Mutex::new(State {
                entries: Vec::new(),
                rng: SmallRng::from_entropy(),
            }),
        }
    }

    /// Deterministic sampling for tests.
    pub fn with_seed(criterion: P2cCriterion, seed: u64) -> Self {
        Self {
            criterion,
            state: Mutex::new(State {
                entries: Vec::new(),
                rng: SmallRng::seed_from_u64(seed),
            }),
        }
    }

    pub(super) fn insert(&self, conn: Arc<Conn>, info: BalancerInfo) -> BalancerHandle {
        let id = next_handle_id();
        let mut state = self.state.lock().unwrap();
        state.entries.push(Entry { id, conn, info });
        BalancerHandle::new(id)
    }

    pub(super) fn update(&self, handle: &BalancerHandle, info: BalancerInfo) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.id == handle.id) {
            entry.info = info;
        }
    }

    pub(super) fn remove(&self, handle: &BalancerHandle) {
        let mut state = self.state.lock().unwrap();
        state.entries.retain(|e| e.id != handle.id);
    }

    pub(super) fn next(&self) -> Option<Arc<Conn>> {
        let mut state = self.state.lock().unwrap();
        let n = state.entries.len();
        match n {
            0 => None,
            1 => Some(Arc::clone(&state.entries[0].conn)),
            _ => {
                // Two distinct positions, uniformly at random.
                let a = state.rng.gen_range(0..n);
                let mut b = state.rng.gen_range(0..n - 1);
                if b >= a {
                    b += 1;
                }
                let now = Instant::now();
                let ea = &state.entries[a];
                let eb = &state.entries[b];
                let (score_a, err_a) = self.criterion.score(&ea.conn, &ea.info, now);
                let (score_b, err_b) = self.criterion.score(&eb.conn, &eb.info, now);

                let pick_a = match score_a.partial_cmp(&score_b) {
                    Some(std::cmp::Ordering::Less) => true,
                    Some(std::cmp::Ordering::Greater) => false,
                    // Tie: lower error rate wins, then insertion order.
                    _ => match err_a.partial_cmp(&err_b) {
                        Some(std::cmp::Ordering::Less) => true,
                        Some(std::cmp::Ordering::Greater) => false,
                        _ => a < b,
                    },
                };
                let winner = if pick_a { ea } else { eb };
                Some(Arc::clone(&winner.conn))
            }
        }
    }
}
