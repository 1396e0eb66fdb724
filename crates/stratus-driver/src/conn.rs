//! Connections and their runtime statistics.
//!
//! A [`Conn`] binds one transport channel to one endpoint address plus the
//! mutable [`ConnRuntime`] the balancer reads. Runtime updates are O(1)
//! arithmetic under a short mutex; nothing blocks while it is held.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use stratus_common::Channel;

use crate::error::DriverError;
use crate::series::Series;

const STATS_WINDOW: Duration = Duration::from_secs(60);
const STATS_BUCKETS: usize = 12;

/// Identity of one connection: the endpoint it is bound to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnAddr {
    pub host: String,
    pub port: u16,
}

impl ConnAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ConnAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Visibility state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnState {
    #[default]
    Unknown,
    /// Dialed successfully; eligible for balancing.
    Online,
    /// Registered but not usable: dial failed or the conn was removed.
    Offline,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnState::Online => "online",
            ConnState::Offline => "offline",
            ConnState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of a connection's counters.
#[derive(Debug, Clone, Default)]
pub struct ConnStats {
    pub state: ConnState,
    pub op_started: u64,
    pub op_succeed: u64,
    pub op_failed: u64,
    pub op_per_minute: f64,
    pub err_per_minute: f64,
    pub avg_op_time: Duration,
}

impl ConnStats {
    /// Operations started but not yet finished.
    pub fn op_pending(&self) -> u64 {
        self.op_started - (self.op_succeed + self.op_failed)
    }
}

struct RuntimeInner {
    state: ConnState,
    op_started: u64,
    op_succeed: u64,
    op_failed: u64,
    op_time: Series,
    op_rate: Series,
    err_rate: Series,
}

/// Mutable per-connection statistics feeding the balancer.
pub(crate) struct ConnRuntime {
    inner: Mutex<RuntimeInner>,
}

impl ConnRuntime {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RuntimeInner {
                state: ConnState::Unknown,
                op_started: 0,
                op_succeed: 0,
                op_failed: 0,
                op_time: Series::new(STATS_WINDOW, STATS_BUCKETS),
                op_rate: Series::new(STATS_WINDOW, STATS_BUCKETS),
                err_rate: Series::new(STATS_WINDOW, STATS_BUCKETS),
            }),
        }
    }

    pub(crate) fn state(&self) -> ConnState {
        self.inner.lock().unwrap().state
    }

    pub(crate) fn set_state(&self, state: ConnState) {
        self.inner.lock().unwrap().state = state;
    }

    pub(crate) fn stats(&self, now: Instant) -> ConnStats {
        let inner = self.inner.lock().unwrap();
        let mut stats = ConnStats {
            state: inner.state,
            op_started: inner.op_started,
            op_succeed: inner.op_succeed,
            op_failed: inner.op_failed,
            op_per_minute: inner.op_rate.sum_per(now, Duration::from_secs(60)),
            err_per_minute: inner.err_rate.sum_per(now, Duration::from_secs(60)),
            avg_op_time: Duration::ZERO,
        };
        let (time_sum, time_count) = inner.op_time.get(now);
        if time_count > 0 {
            stats.avg_op_time = Duration::from_nanos((time_sum / time_count as f64) as u64);
        }
        stats
    }

    pub(crate) fn operation_start(&self, start: Instant) {
        let mut inner = self.inner.lock().unwrap();
        inner.op_started += 1;
        inner.op_rate.add(start, 1.0);
    }

    /// Finishes one operation. `err` must be the timeout-class error if
    /// there was one, `None` otherwise; permanent API errors count as
    /// succeeded because the endpoint answered.
    pub(crate) fn operation_done(&self, start: Instant, end: Instant, err: Option<&DriverError>) {
        let mut inner = self.inner.lock().unwrap();
        if err.is_some() {
            inner.op_failed += 1;
            inner.err_rate.add(end, 1.0);
        } else {
            inner.op_succeed += 1;
        }
        let elapsed = end.saturating_duration_since(start);
        inner.op_time.add(end, elapsed.as_nanos() as f64);
    }

    pub(crate) fn stream_start(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        inner.op_rate.add(now, 1.0);
    }

    pub(crate) fn stream_recv(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        inner.op_rate.add(now, 1.0);
    }

    /// Finishes one stream. `failed` is false when the stream ended with the
    /// (hidden) end-of-stream sentinel.
    pub(crate) fn stream_done(&self, now: Instant, failed: bool) {
        let mut inner = self.inner.lock().unwrap();
        if failed {
            inner.err_rate.add(now, 1.0);
        }
    }
}

/// One transport channel bound to one endpoint.
pub struct Conn {
    addr: ConnAddr,
    channel: Channel,
    runtime: ConnRuntime,
}

impl Conn {
    pub(crate) fn new(channel: Channel, addr: ConnAddr) -> Self {
        Self {
            addr,
            channel,
            runtime: ConnRuntime::new(),
        }
    }

    pub fn addr(&self) -> &ConnAddr {
        &self.addr
    }

    /// Current stats snapshot.
    pub fn stats(&self) -> ConnStats {
        self.runtime.stats(Instant::now())
    }

    pub(crate) fn channel(&self) -> &Channel {
        &self.channel
    }

    pub(crate) fn runtime(&self) -> &ConnRuntime {
        &self.runtime
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("addr", &self.addr)
            .field("state", &self.runtime.state())
            .finish()
    }
}
