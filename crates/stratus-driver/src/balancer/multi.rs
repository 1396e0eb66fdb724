//! Locality-splitting composite balancer.
//!
//! Routes each conn to the first lane whose predicate accepts its info and
//! answers `next` from lanes in declared order. The driver composes two
//! lanes (local-only, then everything else) when local endpoints are
//! preferred: as long as any local conn is alive it wins, regardless of its
//! performance indicators.

use std::sync::Arc;

use crate::conn::Conn;

use super::{Balancer, BalancerHandle, BalancerInfo, LanePredicate};

/// One sub-balancer plus the predicate that feeds it.
pub struct Lane {
    predicate: LanePredicate,
    balancer: Balancer,
}

impl Lane {
    pub fn new(balancer: Balancer, predicate: LanePredicate) -> Self {
        Self {
            predicate,
            balancer,
        }
    }
}

/// Ordered composition of sibling balancers.
pub struct MultiBalancer {
    lanes: Vec<Lane>,
}

impl MultiBalancer {
    pub fn new(lanes: Vec<Lane>) -> Self {
        Self { lanes }
    }

    pub(super) fn insert(&self, conn: Arc<Conn>, info: BalancerInfo) -> BalancerHandle {
        for (index, lane) in self.lanes.iter().enumerate() {
            if (lane.predicate)(&info) {
                let mut handle = lane.balancer.insert(conn, info);
                handle.lane = index;
                return handle;
            }
        }
        BalancerHandle::detached()
    }

    pub(super) fn update(&self, handle: &BalancerHandle, info: BalancerInfo) {
        if let Some(lane) = self.lanes.get(handle.lane) {
            lane.balancer.update(handle, info);
        }
    }

    pub(super) fn remove(&self, handle: &BalancerHandle) {
        if let Some(lane) = self.lanes.get(handle.lane) {
            lane.balancer.remove(handle);
        }
    }

    pub(super) fn next(&self) -> Option<Arc<Conn>> {
        self.lanes.iter().find_map(|lane| lane.balancer.next())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::online_conn;
    use super::*;

    fn local_split() -> Balancer {
        Balancer::multi(vec![
            Lane::new(Balancer::round_robin(), |info| info.local),
            Lane::new(Balancer::round_robin(), |info| !info.local),
        ])
    }

    fn info(local: bool) -> BalancerInfo {
        BalancerInfo {
            local,
            load_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn local_lane_wins_while_populated() {
        let multi = local_split();
        multi.insert(online_conn("remote", 1), info(false));
        multi.insert(online_conn("local", 1), info(true));

        for _ in 0..10 {
            assert_eq!(multi.next().unwrap().addr().host, "local");
        }
    }

    #[tokio::test]
    async fn falls_through_once_the_local_lane_empties() {
        let multi = local_split();
        let local = multi.insert(online_conn("local", 1), info(true));
        multi.insert(online_conn("remote", 1), info(false));

        assert_eq!(multi.next().unwrap().addr().host, "local");
        multi.remove(&local);
        assert_eq!(multi.next().unwrap().addr().host, "remote");
    }

    #[tokio::test]
    async fn handles_route_back_to_their_lane() {
        let multi = local_split();
        let remote = multi.insert(online_conn("remote", 1), info(false));
        multi.remove(&remote);
        assert!(multi.next().is_none());
    }

    #[tokio::test]
    async fn empty_composite_yields_none() {
        let multi = local_split();
        assert!(multi.next().is_none());
    }
}
