//! In-process mock Stratus server for integration tests.
//!
//! Speaks the framed protocol over real TCP on a loopback port. Discovery
//! requests answer from a mutable endpoint list; everything else goes
//! through the test-provided behavior function.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use stratus_common::protocol::{
    CallRequest, OperationEnvelope, Reply, ReplyBody, StreamItem,
};
use stratus_common::transport::codec;
use stratus_driver::discovery::LIST_ENDPOINTS_METHOD;
use stratus_driver::{ConnAddr, Context, DriverError, DriverTrace, Endpoint};

/// What the server does with one non-discovery request.
pub enum Action {
    /// Answer with the given terminal envelope.
    Reply(OperationEnvelope),
    /// Stream the items, then a finish marker if `finish` is set.
    Stream { items: Vec<StreamItem>, finish: bool },
    /// Never answer; the caller's deadline governs.
    Hang,
}

type Behavior = Arc<dyn Fn(&CallRequest) -> Action + Send + Sync>;

struct ServerState {
    endpoints: Mutex<Vec<Endpoint>>,
    behavior: Behavior,
    calls: Mutex<Vec<CallRequest>>,
    accepted: AtomicUsize,
    disconnected: AtomicUsize,
}

pub struct MockServer {
    port: u16,
    state: Arc<ServerState>,
    accept_loop: JoinHandle<()>,
}

impl MockServer {
    /// Starts a server answering every non-discovery request with
    /// `behavior`.
    pub async fn start<F>(behavior: F) -> Self
    where
        F: Fn(&CallRequest) -> Action + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(ServerState {
            endpoints: Mutex::new(Vec::new()),
            behavior: Arc::new(behavior),
            calls: Mutex::new(Vec::new()),
            accepted: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
        });

        let accept_state = Arc::clone(&state);
        let accept_loop = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accept_state.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_conn(stream, Arc::clone(&accept_state)));
            }
        });

        Self {
            port,
            state,
            accept_loop,
        }
    }

    /// A server that answers every call with an empty success envelope.
    pub async fn start_ok() -> Self {
        Self::start(|_| Action::Reply(OperationEnvelope::success(None))).await
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// This server as a discovery endpoint entry.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port)
    }

    /// Replaces the endpoint list served to discovery requests.
    pub fn set_endpoints(&self, endpoints: Vec<Endpoint>) {
        *self.state.endpoints.lock().unwrap() = endpoints;
    }

    /// Total connections ever accepted.
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Total connections that have gone away again.
    pub fn disconnected(&self) -> usize {
        self.state.disconnected.load(Ordering::SeqCst)
    }

    /// Every request observed so far.
    pub fn calls(&self) -> Vec<CallRequest> {
        self.state.calls.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve_conn(stream: TcpStream, state: Arc<ServerState>) {
    let (mut read, write) = stream.into_split();
    let write = Arc::new(tokio::sync::Mutex::new(write));

    loop {
        let body = match codec::read_frame(&mut read, codec::MAX_RECV_FRAME).await {
            Ok(body) => body,
            Err(_) => break,
        };
        let request: CallRequest = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(_) => break,
        };
        state.calls.lock().unwrap().push(request.clone());

        let action = if request.method == LIST_ENDPOINTS_METHOD {
            let endpoints = state.endpoints.lock().unwrap().clone();
            Action::Reply(OperationEnvelope::success(Some(
                json!({ "endpoints": endpoints }),
            )))
        } else {
            (state.behavior)(&request)
        };

        let write = Arc::clone(&write);
        tokio::spawn(async move {
            match action {
                Action::Reply(envelope) => {
                    send_reply(
                        &write,
                        &Reply {
                            id: request.id,
                            body: ReplyBody::Operation(envelope),
                        },
                    )
                    .await;
                }
                Action::Stream { items, finish } => {
                    for item in items {
                        send_reply(
                            &write,
                            &Reply {
                                id: request.id,
                                body: ReplyBody::Item(item),
                            },
                        )
                        .await;
                    }
                    if finish {
                        send_reply(
                            &write,
                            &Reply {
                                id: request.id,
                                body: ReplyBody::Finish,
                            },
                        )
                        .await;
                    }
                }
                Action::Hang => {}
            }
        });
    }
    state.disconnected.fetch_add(1, Ordering::SeqCst);
}

async fn send_reply(write: &Arc<tokio::sync::Mutex<OwnedWriteHalf>>, reply: &Reply) {
    use tokio::io::AsyncWriteExt;

    let body = serde_json::to_vec(reply).unwrap();
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);

    let mut writer = write.lock().await;
    let _ = writer.write_all(&frame).await;
    let _ = writer.flush().await;
}

/// Trace sink recording hook invocations as flat strings.
pub struct RecordingTrace {
    events: Mutex<Vec<String>>,
}

impl RecordingTrace {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl DriverTrace for RecordingTrace {
    fn get_conn_start(&self, _ctx: &Context) {
        self.push("get_conn_start".to_string());
    }
    fn get_conn_done(&self, _ctx: &Context, addr: Option<&ConnAddr>, err: Option<&DriverError>) {
        self.push(format!(
            "get_conn_done addr={} ok={}",
            addr.map_or_else(|| "-".to_string(), |a| a.to_string()),
            err.is_none()
        ));
    }
    fn operation_start(
        &self,
        _ctx: &Context,
        _addr: &ConnAddr,
        method: &str,
        _params: Option<&stratus_driver::OperationParams>,
    ) {
        self.push(format!("operation_start {method}"));
    }
    fn operation_done(
        &self,
        _ctx: &Context,
        _addr: &ConnAddr,
        method: &str,
        err: Option<&DriverError>,
    ) {
        self.push(format!("operation_done {method} ok={}", err.is_none()));
    }
    fn stream_start(&self, _ctx: &Context, _addr: &ConnAddr, method: &str) {
        self.push(format!("stream_start {method}"));
    }
    fn stream_recv_start(&self, _ctx: &Context, _addr: &ConnAddr, _method: &str) {
        self.push("stream_recv_start".to_string());
    }
    fn stream_recv_done(
        &self,
        _ctx: &Context,
        _addr: &ConnAddr,
        _method: &str,
        err: Option<&DriverError>,
    ) {
        self.push(format!("stream_recv_done ok={}", err.is_none()));
    }
    fn stream_done(&self, _ctx: &Context, _addr: &ConnAddr, method: &str, err: Option<&DriverError>) {
        self.push(format!("stream_done {method} ok={}", err.is_none()));
    }
}
