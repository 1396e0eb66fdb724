//! The live set of connections.
//!
//! A [`Cluster`] owns the endpoint registry and mediates the balancer:
//! discovery feeds `insert`/`update`/`remove`, the call path takes conns
//! out through `get`. One writer mutates the registry at a time; readers
//! (`get`, `stats`) share a read lock. Critical sections are short and
//! never span IO.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::sync::Notify;

use crate::balancer::{Balancer, BalancerHandle, BalancerInfo};
use crate::conn::{Conn, ConnAddr, ConnState, ConnStats};
use crate::context::Context;
use crate::dialer::InnerDialer;
use crate::endpoint::Endpoint;
use crate::error::DriverError;

struct ClusterEntry {
    endpoint: Endpoint,
    /// `None` is an offline placeholder: the endpoint is known but its
    /// last dial failed.
    conn: Option<Arc<Conn>>,
    handle: Option<BalancerHandle>,
}

struct ClusterInner {
    index: BTreeMap<ConnAddr, ClusterEntry>,
    balancer: Balancer,
    closed: bool,
}

pub(crate) struct Cluster {
    dialer: Arc<InnerDialer>,
    inner: RwLock<ClusterInner>,
    /// Wakes `get` waiters on inserts and on close.
    notify: Notify,
}

impl Cluster {
    pub(crate) fn new(dialer: Arc<InnerDialer>, balancer: Balancer) -> Self {
        Self {
            dialer,
            inner: RwLock::new(ClusterInner {
                index: BTreeMap::new(),
                balancer,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn key_of(endpoint: &Endpoint) -> ConnAddr {
        ConnAddr::new(endpoint.addr.clone(), endpoint.port)
    }

    fn info_of(endpoint: &Endpoint) -> BalancerInfo {
        BalancerInfo {
            local: endpoint.local,
            load_factor: endpoint.load_factor,
        }
    }

    /// Dials `endpoint` and registers the conn. A failed dial records an
    /// offline placeholder instead; a later discovery cycle retries it.
    /// Returns whether the endpoint went online.
    pub(crate) async fn insert(&self, ctx: &Context, endpoint: Endpoint) -> bool {
        let conn = match self
            .dialer
            .dial_host_port(ctx, &endpoint.addr, endpoint.port)
            .await
        {
            Ok(conn) => {
                conn.runtime().set_state(ConnState::Online);
                Some(Arc::new(conn))
            }
            Err(err) => {
                tracing::warn!(endpoint = %endpoint, error = %err, "endpoint dial failed, recording offline");
                None
            }
        };

        let mut to_close: Vec<Arc<Conn>> = Vec::new();
        let mut went_online = false;
        {
            let mut inner = self.inner.write().unwrap();
            if inner.closed {
                to_close.extend(conn);
            } else {
                let key = Self::key_of(&endpoint);
                let info = Self::info_of(&endpoint);
                let handle = conn
                    .as_ref()
                    .map(|c| inner.balancer.insert(Arc::clone(c), info));
                went_online = handle.is_some();
                let previous = inner.index.insert(
                    key,
                    ClusterEntry {
                        endpoint,
                        conn,
                        handle,
                    },
                );
                if let Some(previous) = previous {
                    if let Some(handle) = &previous.handle {
                        inner.balancer.remove(handle);
                    }
                    to_close.extend(previous.conn);
                }
            }
        }

        if went_online {
            self.notify.notify_waiters();
        }
        for conn in to_close {
            Self::close_async(conn);
        }
        went_online
    }

    /// Refreshes a known endpoint's metadata. An endpoint we have never
    /// seen, or one sitting behind an offline placeholder, goes through the
    /// insert path instead.
    pub(crate) async fn update(&self, ctx: &Context, endpoint: Endpoint) {
        let needs_dial = {
            let mut guard = self.inner.write().unwrap();
            if guard.closed {
                return;
            }
            let inner = &mut *guard;
            match inner.index.get_mut(&Self::key_of(&endpoint)) {
                Some(entry) => {
                    entry.endpoint = endpoint.clone();
                    match &entry.handle {
                        Some(handle) => {
                            inner.balancer.update(handle, Self::info_of(&endpoint));
                            false
                        }
                        None => true,
                    }
                }
                None => true,
            }
        };
        if needs_dial {
            self.insert(ctx, endpoint).await;
        }
    }

    /// Deregisters an endpoint. The channel closes asynchronously so
    /// outstanding calls drain under their own deadlines.
    pub(crate) fn remove(&self, endpoint: &Endpoint) {
        let conn = {
            let mut inner = self.inner.write().unwrap();
            if inner.closed {
                return;
            }
            match inner.index.remove(&Self::key_of(endpoint)) {
                Some(entry) => {
                    if let Some(handle) = &entry.handle {
                        inner.balancer.remove(handle);
                    }
                    entry.conn
                }
                None => None,
            }
        };
        if let Some(conn) = conn {
            conn.runtime().set_state(ConnState::Offline);
            tracing::debug!(addr = %conn.addr(), "endpoint removed from cluster");
            Self::close_async(conn);
        }
    }

    /// Picks a conn for one call, waiting until an online conn exists, the
    /// context fires, or the cluster closes.
    pub(crate) async fn get(&self, ctx: &Context) -> Result<Arc<Conn>, DriverError> {
        loop {
            // Register interest before checking, so an insert between the
            // check and the wait cannot be missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let inner = self.inner.read().unwrap();
                if inner.closed {
                    return Err(DriverError::Closed);
                }
                if let Some(conn) = inner.balancer.next() {
                    return Ok(conn);
                }
            }
            tokio::select! {
                _ = &mut notified => {}
                err = ctx.done() => return Err(err),
            }
        }
    }

    /// Visits every known endpoint with its stats snapshot. Offline
    /// placeholders report `ConnState::Offline` and zeroed counters.
    pub(crate) fn stats(&self, visitor: &mut dyn FnMut(&Endpoint, ConnStats)) {
        let inner = self.inner.read().unwrap();
        let now = Instant::now();
        for entry in inner.index.values() {
            let stats = match &entry.conn {
                Some(conn) => conn.runtime().stats(now),
                None => ConnStats {
                    state: ConnState::Offline,
                    ..ConnStats::default()
                },
            };
            visitor(&entry.endpoint, stats);
        }
    }

    /// Closes every conn exactly once and fails current and future `get`s
    /// with `Closed`. Idempotent.
    pub(crate) async fn close(&self) {
        let entries: Vec<ClusterEntry> = {
            let mut inner = self.inner.write().unwrap();
            if inner.closed {
                return;
            }
            inner.closed = true;
            std::mem::take(&mut inner.index).into_values().collect()
        };
        self.notify.notify_waiters();
        let closing = entries.into_iter().filter_map(|e| e.conn).map(|conn| async move {
            conn.runtime().set_state(ConnState::Offline);
            conn.channel().close().await;
        });
        futures::future::join_all(closing).await;
    }

    fn close_async(conn: Arc<Conn>) {
        tokio::spawn(async move {
            conn.channel().close().await;
        });
    }
}
