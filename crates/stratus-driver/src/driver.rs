//! The driver: public entry points and the call pipelines.
//!
//! `dial` bootstraps the cluster (one connection, an initial discovery
//! round, the background refresh), `call` and `stream_read` execute RPCs
//! over balancer-chosen conns, `close` tears everything down. The driver
//! retries nothing; every error surfaces to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use stratus_common::protocol::{CallRequest, OperationParams, StatusCode, TransportError, TransportErrorKind};
use stratus_common::StreamReceiver;

use crate::balancer::{Balancer, Lane, P2cCriterion};
use crate::cluster::Cluster;
use crate::config::{BalancingMethod, ContextDeadlineMapping, DriverConfig};
use crate::conn::{Conn, ConnStats};
use crate::context::Context;
use crate::dialer::{Dialer, InnerDialer};
use crate::endpoint::{diff_endpoints, sort_endpoints, split_host_port, Endpoint};
use crate::error::{hide_eof, is_timeout_class, DriverError, OpError};
use crate::meta::Meta;
use crate::operation::{Operation, StreamOperation};
use crate::repeater::Repeater;
use crate::trace::{DriverTrace, NopDriverTrace};

/// Dials `addr` with default network options.
///
/// Shorthand for [`Dialer::dial`] when no TLS, keepalive or custom dialing
/// function is needed.
pub async fn dial(ctx: &Context, addr: &str, config: DriverConfig) -> Result<Driver, DriverError> {
    Dialer::new(config).dial(ctx, addr).await
}

impl Dialer {
    /// Dials `addr` and initializes a driver instance on success.
    pub async fn dial(&self, ctx: &Context, addr: &str) -> Result<Driver, DriverError> {
        Driver::dial_with(self, ctx, addr).await
    }
}

/// A cluster-aware client of one Stratus database.
pub struct Driver {
    cluster: Arc<Cluster>,
    explorer: Option<Repeater>,
    meta: Arc<Meta>,
    trace: Arc<dyn DriverTrace>,

    request_timeout: Option<Duration>,
    stream_timeout: Option<Duration>,
    operation_timeout: Option<Duration>,
    operation_cancel_after: Option<Duration>,
    context_deadline_mapping: ContextDeadlineMapping,

    closed: AtomicBool,
}

impl Driver {
    async fn dial_with(dialer: &Dialer, ctx: &Context, addr: &str) -> Result<Driver, DriverError> {
        let config = dialer.config.clone();
        let trace: Arc<dyn DriverTrace> = config
            .trace
            .clone()
            .unwrap_or_else(|| Arc::new(NopDriverTrace));
        let meta = Arc::new(Meta::new(
            config.database.clone(),
            config.credentials.clone(),
        ));
        let inner_dialer = Arc::new(InnerDialer::new(
            dialer,
            Arc::clone(&trace),
            Arc::clone(&meta),
        ));

        let interval = config.discovery_interval.resolve();
        let balancer = match interval {
            None => Balancer::single(),
            Some(_) => new_balancer(&config),
        };
        let cluster = Arc::new(Cluster::new(Arc::clone(&inner_dialer), balancer));

        let explorer = match bootstrap(ctx, addr, interval, &cluster, &inner_dialer).await {
            Ok(explorer) => explorer,
            Err(err) => {
                cluster.close().await;
                return Err(err);
            }
        };

        Ok(Driver {
            cluster,
            explorer,
            meta,
            trace,
            request_timeout: config.request_timeout,
            stream_timeout: config.stream_timeout,
            operation_timeout: config.operation_timeout,
            operation_cancel_after: config.operation_cancel_after,
            context_deadline_mapping: config.context_deadline_mapping,
            closed: AtomicBool::new(false),
        })
    }

    /// Executes one unary operation.
    pub async fn call<O: Operation + ?Sized>(
        &self,
        ctx: &Context,
        op: &mut O,
    ) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        // The raw context feeds the trace hooks; the tightened one governs
        // the call.
        let raw_ctx = ctx;
        let call_ctx = match self.request_timeout {
            Some(t) => ctx.with_timeout(t),
            None => ctx.clone(),
        };

        let params = self.operation_params(&call_ctx);
        let metadata = self.meta.metadata(&call_ctx).await?;

        self.trace.get_conn_start(raw_ctx);
        let got = self.cluster.get(&call_ctx).await;
        self.trace
            .get_conn_done(raw_ctx, got.as_ref().ok().map(|c| c.addr()), got.as_ref().err());
        let conn = got?;

        let method = op.method().to_string();
        let mut request = CallRequest::new(&method, op.payload()).with_metadata(metadata);
        if let Some(params) = params {
            request = request.with_params(params);
        }

        let start = Instant::now();
        conn.runtime().operation_start(start);
        self.trace
            .operation_start(raw_ctx, conn.addr(), &method, params.as_ref());

        let result = invoke(&call_ctx, &conn, request, op).await;

        let err = result.as_ref().err();
        conn.runtime().operation_done(
            start,
            Instant::now(),
            err.filter(|e| is_timeout_class(e)),
        );
        self.trace.operation_done(raw_ctx, conn.addr(), &method, err);

        result
    }

    /// Executes one server-streaming operation.
    ///
    /// Returns once the request is on the wire; a background worker then
    /// feeds `op.process` one event per received message plus the terminal
    /// error. Cancelling `ctx` terminates the worker.
    pub async fn stream_read<S: StreamOperation>(
        &self,
        ctx: &Context,
        op: S,
    ) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        let raw_ctx = ctx.clone();
        // With a stream timeout the derived cancel is invoked on every exit
        // path: the guard covers synchronous failures, the worker takes it
        // over on successful handoff.
        let (stream_ctx, cancel_guard) = match self.stream_timeout {
            Some(t) => {
                let tightened = ctx.with_timeout(t);
                let guard = CancelGuard {
                    ctx: tightened.clone(),
                };
                (tightened, Some(guard))
            }
            None => (ctx.clone(), None),
        };

        let metadata = self.meta.metadata(&stream_ctx).await?;

        self.trace.get_conn_start(&raw_ctx);
        let got = self.cluster.get(&stream_ctx).await;
        self.trace
            .get_conn_done(&raw_ctx, got.as_ref().ok().map(|c| c.addr()), got.as_ref().err());
        let conn = got?;

        let method = op.method().to_string();
        let request = CallRequest::new(&method, op.payload()).with_metadata(metadata);

        conn.runtime().stream_start(Instant::now());
        self.trace.stream_start(&raw_ctx, conn.addr(), &method);

        let opened = stream_ctx
            .run_until_done(conn.channel().server_streaming(request))
            .await
            .and_then(|r| r.map_err(DriverError::from));
        let receiver = match opened {
            Ok(receiver) => receiver,
            Err(err) => {
                conn.runtime().stream_done(Instant::now(), true);
                self.trace
                    .stream_done(&raw_ctx, conn.addr(), &method, Some(&err));
                return Err(err);
            }
        };

        tokio::spawn(stream_worker(StreamWorker {
            stream_ctx,
            raw_ctx,
            conn,
            method,
            receiver,
            op,
            trace: Arc::clone(&self.trace),
            cancel_guard,
        }));
        Ok(())
    }

    /// Visits every cluster endpoint with its stats snapshot.
    pub fn read_conn_stats(&self, visitor: &mut dyn FnMut(&Endpoint, ConnStats)) {
        self.cluster.stats(visitor);
    }

    /// Stops background discovery and closes every connection. Idempotent;
    /// subsequent calls on the driver fail with [`DriverError::Closed`].
    pub async fn close(&self) -> Result<(), DriverError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(explorer) = &self.explorer {
            explorer.stop().await;
        }
        self.cluster.close().await;
        Ok(())
    }

    /// Resolves the server-side hints for one call. Explicit configuration
    /// wins; otherwise the context deadline maps per the configured rule.
    fn operation_params(&self, ctx: &Context) -> Option<OperationParams> {
        let mut operation_timeout = self.operation_timeout;
        let mut cancel_after = self.operation_cancel_after;
        if operation_timeout.is_none() && cancel_after.is_none() {
            if let Some(deadline) = ctx.deadline() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.context_deadline_mapping {
                    ContextDeadlineMapping::None => {}
                    ContextDeadlineMapping::OperationTimeout => {
                        operation_timeout = Some(remaining);
                    }
                    ContextDeadlineMapping::OperationCancelAfter => {
                        cancel_after = Some(remaining);
                    }
                }
            }
        }
        if operation_timeout.is_none() && cancel_after.is_none() {
            None
        } else {
            Some(OperationParams::new(operation_timeout, cancel_after))
        }
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("database", &self.meta.database())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Builds the configured balancing policy, wrapped in the locality split
/// when local endpoints are preferred.
fn new_balancer(config: &DriverConfig) -> Balancer {
    let new_policy = || match config.balancing_method {
        BalancingMethod::RoundRobin => Balancer::round_robin(),
        BalancingMethod::P2c => {
            let criterion = config
                .balancing_config
                .map(|c| P2cCriterion {
                    prefer_local: c.prefer_local,
                    op_time_threshold: c.op_time_threshold,
                })
                .unwrap_or_default();
            Balancer::p2c(criterion)
        }
    };
    if config.prefer_local_endpoints {
        Balancer::multi(vec![
            Lane::new(new_policy(), |info| info.local),
            Lane::new(new_policy(), |info| !info.local),
        ])
    } else {
        new_policy()
    }
}

/// Populates the cluster and, with discovery enabled, starts the
/// background refresh.
async fn bootstrap(
    ctx: &Context,
    addr: &str,
    interval: Option<Duration>,
    cluster: &Arc<Cluster>,
    dialer: &Arc<InnerDialer>,
) -> Result<Option<Repeater>, DriverError> {
    let Some(interval) = interval else {
        let (host, port) = split_host_port(addr)?;
        let endpoint = Endpoint::new(host, port);
        if !cluster.insert(ctx, endpoint).await {
            return Err(DriverError::Transport(TransportError::new(
                TransportErrorKind::Unavailable,
                format!("seed endpoint {addr} is not reachable"),
            )));
        }
        // Ensure the seed endpoint is actually handed out.
        cluster.get(ctx).await?;
        return Ok(None);
    };

    let mut curr = dialer.discover(ctx, addr).await?;
    // Sort once here so the background diff never re-sorts the current set.
    sort_endpoints(&mut curr);
    for endpoint in &curr {
        cluster.insert(ctx, endpoint.clone()).await;
    }

    let known = Arc::new(Mutex::new(curr));
    let seed = addr.to_string();
    let cluster = Arc::clone(cluster);
    let dialer = Arc::clone(dialer);
    let explorer = Repeater::spawn(interval, move |tick_ctx| {
        let cluster = Arc::clone(&cluster);
        let dialer = Arc::clone(&dialer);
        let known = Arc::clone(&known);
        let seed = seed.clone();
        async move {
            let mut next = match dialer.discover(&tick_ctx, &seed).await {
                Ok(next) => next,
                Err(err) => {
                    // A failed round never corrupts the current set.
                    tracing::warn!(error = %err, "background discovery failed, keeping previous endpoints");
                    return;
                }
            };
            sort_endpoints(&mut next);

            let prev = known.lock().unwrap().clone();
            let (mut updated, mut inserted, mut removed) = (vec![], vec![], vec![]);
            diff_endpoints(
                &prev,
                &next,
                |e| updated.push(e.clone()),
                |e| inserted.push(e.clone()),
                |e| removed.push(e.clone()),
            );
            for endpoint in updated {
                cluster.update(&tick_ctx, endpoint).await;
            }
            for endpoint in inserted {
                cluster.insert(&tick_ctx, endpoint).await;
            }
            for endpoint in &removed {
                cluster.remove(endpoint);
            }
            *known.lock().unwrap() = next;
        }
    });
    Ok(Some(explorer))
}

/// Sends one unary request over `conn` and classifies the reply.
async fn invoke<O: Operation + ?Sized>(
    ctx: &Context,
    conn: &Conn,
    request: CallRequest,
    op: &mut O,
) -> Result<(), DriverError> {
    let envelope = ctx.run_until_done(conn.channel().unary(request)).await??;

    if !envelope.ready {
        return Err(DriverError::OperationNotReady);
    }
    if envelope.status != StatusCode::Success {
        return Err(DriverError::Operation(OpError {
            status: envelope.status,
            issues: envelope.issues,
        }));
    }
    // An operation without a response container skips decoding; the
    // protocol may grow result bodies a caller chooses to ignore.
    if op.wants_result() {
        if let Some(raw) = envelope.result {
            op.decode_result(raw)?;
        }
    }
    Ok(())
}

/// Cancels the stream-timeout context when dropped.
struct CancelGuard {
    ctx: Context,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}

struct StreamWorker<S> {
    stream_ctx: Context,
    raw_ctx: Context,
    conn: Arc<Conn>,
    method: String,
    receiver: StreamReceiver,
    op: S,
    trace: Arc<dyn DriverTrace>,
    cancel_guard: Option<CancelGuard>,
}

/// The stream receive loop. Owns the terminal runtime/trace hooks and the
/// stream-timeout cancel; the caller-facing function has already returned.
async fn stream_worker<S: StreamOperation>(worker: StreamWorker<S>) {
    let StreamWorker {
        stream_ctx,
        raw_ctx,
        conn,
        method,
        mut receiver,
        mut op,
        trace,
        cancel_guard,
    } = worker;

    let terminal: DriverError = loop {
        conn.runtime().stream_recv(Instant::now());
        trace.stream_recv_start(&raw_ctx, conn.addr(), &method);

        let outcome = match stream_ctx.run_until_done(receiver.message()).await {
            Err(ctx_err) => Err(ctx_err),
            Ok(Err(transport)) => Err(DriverError::from(transport)),
            Ok(Ok(None)) => Err(DriverError::EndOfStream),
            Ok(Ok(Some(item))) => {
                if item.status == StatusCode::Success {
                    Ok(item.payload)
                } else {
                    Err(DriverError::Operation(OpError {
                        status: item.status,
                        issues: item.issues,
                    }))
                }
            }
        };

        match outcome {
            Ok(payload) => {
                trace.stream_recv_done(&raw_ctx, conn.addr(), &method, None);
                op.process(Ok(payload));
            }
            Err(err) => {
                trace.stream_recv_done(&raw_ctx, conn.addr(), &method, hide_eof(&err));
                // The handler sees the raw end-of-stream, unlike the hooks.
                op.process(Err(err.clone()));
                break err;
            }
        }
    };

    let hidden = hide_eof(&terminal);
    conn.runtime().stream_done(Instant::now(), hidden.is_some());
    trace.stream_done(&raw_ctx, conn.addr(), &method, hidden);
    drop(cancel_guard);
}
