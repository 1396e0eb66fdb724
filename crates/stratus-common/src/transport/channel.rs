//! The per-endpoint transport channel.
//!
//! A [`Channel`] owns exactly one connection. A background read loop
//! demultiplexes server frames to in-flight calls by request id, so any
//! number of unary and server-streaming calls can share the connection
//! concurrently.
//!
//! Lifecycle: the channel stays usable until [`Channel::close`] is called
//! or the read loop dies (EOF, IO error, oversized or undecodable frame).
//! Either way every pending and future call observes the same
//! [`TransportError`]; the channel never recovers, reconnection is the
//! owner's job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::codec;
use super::{BoxedIo, RawIo};
use crate::protocol::{
    CallRequest, OperationEnvelope, Reply, ReplyBody, RequestId, StreamItem, TransportError,
    TransportErrorKind,
};

enum PendingReply {
    Unary(oneshot::Sender<Result<OperationEnvelope, TransportError>>),
    Stream(mpsc::UnboundedSender<Result<Option<StreamItem>, TransportError>>),
}

struct Pending {
    calls: HashMap<RequestId, PendingReply>,
    /// Why the read loop died, if it did. Set once, never cleared.
    broken: Option<TransportError>,
}

struct ChannelInner {
    addr: String,
    writer: tokio::sync::Mutex<Option<WriteHalf<BoxedIo>>>,
    pending: Mutex<Pending>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    max_recv: usize,
}

/// One connection to one endpoint, shared by concurrent calls.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Wraps an established stream and spawns the read loop.
    pub fn new<S: RawIo + 'static>(stream: S, addr: impl Into<String>) -> Self {
        Self::with_max_recv(stream, addr, codec::MAX_RECV_FRAME)
    }

    /// Like [`Channel::new`] with an explicit inbound frame cap.
    pub fn with_max_recv<S: RawIo + 'static>(
        stream: S,
        addr: impl Into<String>,
        max_recv: usize,
    ) -> Self {
        let boxed: BoxedIo = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(boxed);
        let inner = Arc::new(ChannelInner {
            addr: addr.into(),
            writer: tokio::sync::Mutex::new(Some(write_half)),
            pending: Mutex::new(Pending {
                calls: HashMap::new(),
                broken: None,
            }),
            reader: Mutex::new(None),
            closed: AtomicBool::new(false),
            max_recv,
        });
        let handle = tokio::spawn(read_loop(Arc::clone(&inner), read_half));
        *inner.reader.lock().unwrap() = Some(handle);
        Self { inner }
    }

    /// The remote address this channel is connected to.
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Executes one unary call: sends the request, waits for its terminal
    /// operation envelope.
    pub async fn unary(
        &self,
        request: CallRequest,
    ) -> Result<OperationEnvelope, TransportError> {
        let frame = codec::encode_request(&request)?;
        let (tx, rx) = oneshot::channel();
        self.inner.register(request.id, PendingReply::Unary(tx))?;
        let _guard = PendingGuard {
            id: request.id,
            inner: Arc::clone(&self.inner),
        };

        self.send_frame(&frame).await?;

        match rx.await {
            Ok(result) => result,
            // Sender vanished without a reply: the channel was torn down
            // between drain and delivery.
            Err(_) => Err(self.inner.failure()),
        }
    }

    /// Opens a server-streaming call: sends the request once (the send half
    /// is closed implicitly by the protocol) and returns the receiver for
    /// the reply stream.
    pub async fn server_streaming(
        &self,
        request: CallRequest,
    ) -> Result<StreamReceiver, TransportError> {
        let frame = codec::encode_request(&request)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.register(request.id, PendingReply::Stream(tx))?;
        let guard = PendingGuard {
            id: request.id,
            inner: Arc::clone(&self.inner),
        };

        self.send_frame(&frame).await?;

        Ok(StreamReceiver {
            rx,
            finished: false,
            _guard: guard,
        })
    }

    /// Closes the channel: fails every pending call with `Unavailable`,
    /// shuts the writer down and stops the read loop. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.fail_pending(TransportError::closed());

        let mut writer = self.inner.writer.lock().await;
        if let Some(mut w) = writer.take() {
            let _ = w.shutdown().await;
        }
        drop(writer);

        let handle = self.inner.reader.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    async fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.inner.writer.lock().await;
        match writer.as_mut() {
            Some(w) => codec::write_frame(w, frame).await,
            None => Err(self.inner.failure()),
        }
    }
}

impl ChannelInner {
    fn register(&self, id: RequestId, reply: PendingReply) -> Result<(), TransportError> {
        let mut pending = self.pending.lock().unwrap();
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::closed());
        }
        if let Some(broken) = &pending.broken {
            return Err(broken.clone());
        }
        pending.calls.insert(id, reply);
        Ok(())
    }

    /// The error to report for a call that can no longer complete.
    fn failure(&self) -> TransportError {
        let pending = self.pending.lock().unwrap();
        pending.broken.clone().unwrap_or_else(TransportError::closed)
    }

    /// Fails and drains every pending call. First error wins as the sticky
    /// broken state.
    fn fail_pending(&self, err: TransportError) {
        let drained: Vec<PendingReply> = {
            let mut pending = self.pending.lock().unwrap();
            if pending.broken.is_none() {
                pending.broken = Some(err.clone());
            }
            pending.calls.drain().map(|(_, p)| p).collect()
        };
        for reply in drained {
            match reply {
                PendingReply::Unary(tx) => {
                    let _ = tx.send(Err(err.clone()));
                }
                PendingReply::Stream(tx) => {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }
    }

    fn dispatch(&self, reply: Reply) {
        let mut pending = self.pending.lock().unwrap();
        match reply.body {
            ReplyBody::Operation(envelope) => match pending.calls.remove(&reply.id) {
                Some(PendingReply::Unary(tx)) => {
                    let _ = tx.send(Ok(envelope));
                }
                Some(PendingReply::Stream(tx)) => {
                    let _ = tx.send(Err(TransportError::new(
                        TransportErrorKind::Internal,
                        "unary reply to a streaming call",
                    )));
                }
                None => {
                    tracing::debug!(addr = %self.addr, id = reply.id, "dropping unmatched reply");
                }
            },
            ReplyBody::Item(item) => {
                let receiver_gone = match pending.calls.get(&reply.id) {
                    Some(PendingReply::Stream(tx)) => tx.send(Ok(Some(item))).is_err(),
                    Some(PendingReply::Unary(_)) => {
                        if let Some(PendingReply::Unary(tx)) = pending.calls.remove(&reply.id) {
                            let _ = tx.send(Err(TransportError::new(
                                TransportErrorKind::Internal,
                                "stream item for a unary call",
                            )));
                        }
                        false
                    }
                    None => false,
                };
                if receiver_gone {
                    pending.calls.remove(&reply.id);
                }
            }
            ReplyBody::Finish => match pending.calls.remove(&reply.id) {
                Some(PendingReply::Stream(tx)) => {
                    let _ = tx.send(Ok(None));
                }
                Some(PendingReply::Unary(tx)) => {
                    let _ = tx.send(Err(TransportError::new(
                        TransportErrorKind::Internal,
                        "stream finish for a unary call",
                    )));
                }
                None => {}
            },
        }
    }
}

/// Removes the pending entry when a call future is dropped before its reply
/// arrives (context timeout, receiver dropped mid-stream). Removal after a
/// delivered reply is a no-op.
struct PendingGuard {
    id: RequestId,
    inner: Arc<ChannelInner>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self.inner.pending.lock().unwrap();
        pending.calls.remove(&self.id);
    }
}

/// Receiver half of a server-streaming call.
pub struct StreamReceiver {
    rx: mpsc::UnboundedReceiver<Result<Option<StreamItem>, TransportError>>,
    finished: bool,
    _guard: PendingGuard,
}

impl StreamReceiver {
    /// Receives the next stream message.
    ///
    /// Returns `Ok(Some(item))` per message, `Ok(None)` once the server
    /// finishes the stream, and `Err` on transport failure. After the first
    /// `Ok(None)` every subsequent call returns `Ok(None)`.
    pub async fn message(&mut self) -> Result<Option<StreamItem>, TransportError> {
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Ok(Some(item))) => Ok(Some(item)),
            Some(Ok(None)) => {
                self.finished = true;
                Ok(None)
            }
            Some(Err(err)) => {
                self.finished = true;
                Err(err)
            }
            None => {
                self.finished = true;
                Err(self._guard.inner.failure())
            }
        }
    }
}

async fn read_loop(inner: Arc<ChannelInner>, mut reader: ReadHalf<BoxedIo>) {
    let err = loop {
        let body = match codec::read_frame(&mut reader, inner.max_recv).await {
            Ok(body) => body,
            Err(err) => break err,
        };
        match codec::decode_reply(&body) {
            Ok(reply) => inner.dispatch(reply),
            Err(err) => break err,
        }
    };
    if !inner.closed.load(Ordering::SeqCst) {
        tracing::debug!(addr = %inner.addr, error = %err, "channel read loop terminated");
    }
    inner.fail_pending(err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusCode;
    use serde_json::json;
    use tokio::io::DuplexStream;

    /// Reads one request frame from the server half.
    async fn recv_request(server: &mut DuplexStream) -> CallRequest {
        let body = codec::read_frame(server, codec::MAX_RECV_FRAME).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn send_reply(server: &mut DuplexStream, reply: &Reply) {
        let body = serde_json::to_vec(reply).unwrap();
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        codec::write_frame(server, &frame).await.unwrap();
    }

    #[tokio::test]
    async fn unary_replies_demultiplex_by_id() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let channel = Channel::new(client, "test:1");

        let first = channel.unary(CallRequest::new("m", json!({"call": 1})));
        let second = channel.unary(CallRequest::new("m", json!({"call": 2})));

        let server_task = tokio::spawn(async move {
            let a = recv_request(&mut server).await;
            let b = recv_request(&mut server).await;
            // Answer in reverse order of arrival.
            send_reply(
                &mut server,
                &Reply {
                    id: b.id,
                    body: ReplyBody::Operation(OperationEnvelope::success(Some(json!("b")))),
                },
            )
            .await;
            send_reply(
                &mut server,
                &Reply {
                    id: a.id,
                    body: ReplyBody::Operation(OperationEnvelope::success(Some(json!("a")))),
                },
            )
            .await;
            server
        });

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap().result, Some(json!("a")));
        assert_eq!(second.unwrap().result, Some(json!("b")));
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn streaming_delivers_items_then_finish() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let channel = Channel::new(client, "test:1");

        let mut receiver = {
            let open = channel.server_streaming(CallRequest::new("s", json!({})));
            let serve = async {
                let req = recv_request(&mut server).await;
                for n in 0..3 {
                    send_reply(
                        &mut server,
                        &Reply {
                            id: req.id,
                            body: ReplyBody::Item(StreamItem::success(json!(n))),
                        },
                    )
                    .await;
                }
                send_reply(
                    &mut server,
                    &Reply {
                        id: req.id,
                        body: ReplyBody::Finish,
                    },
                )
                .await;
            };
            let (receiver, ()) = tokio::join!(open, serve);
            receiver.unwrap()
        };

        for n in 0..3 {
            let item = receiver.message().await.unwrap().unwrap();
            assert_eq!(item.payload, json!(n));
            assert_eq!(item.status, StatusCode::Success);
        }
        assert!(receiver.message().await.unwrap().is_none());
        // Idempotent after finish.
        assert!(receiver.message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn peer_disconnect_fails_pending_calls() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let channel = Channel::new(client, "test:1");

        let call = channel.unary(CallRequest::new("m", json!({})));
        let serve = async {
            let _ = recv_request(&mut server).await;
            drop(server);
        };
        let (result, ()) = tokio::join!(call, serve);
        let err = result.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn close_fails_pending_and_rejects_new_calls() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let channel = Channel::new(client, "test:1");

        let pending = {
            let chan = channel.clone();
            tokio::spawn(async move { chan.unary(CallRequest::new("m", json!({}))).await })
        };
        let _ = recv_request(&mut server).await;

        channel.close().await;
        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Unavailable);

        let err = channel
            .unary(CallRequest::new("m", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Unavailable);
        channel.close().await; // idempotent
    }

    #[tokio::test]
    async fn oversized_reply_poisons_the_channel() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let channel = Channel::with_max_recv(client, "test:1", 128);

        let call = channel.unary(CallRequest::new("m", json!({})));
        let serve = async {
            let req = recv_request(&mut server).await;
            // A legitimate reply that simply exceeds the tiny cap.
            send_reply(
                &mut server,
                &Reply {
                    id: req.id,
                    body: ReplyBody::Operation(OperationEnvelope::success(Some(json!(
                        "x".repeat(512)
                    )))),
                },
            )
            .await;
        };
        let (result, ()) = tokio::join!(call, serve);
        assert_eq!(
            result.unwrap_err().kind,
            TransportErrorKind::ResourceExhausted
        );
    }

    #[tokio::test]
    async fn late_replies_are_ignored() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let channel = Channel::new(client, "test:1");

        // A reply for an id nobody is waiting on must not break the channel.
        send_reply(
            &mut server,
            &Reply {
                id: 424242,
                body: ReplyBody::Operation(OperationEnvelope::success(None)),
            },
        )
        .await;

        let call = channel.unary(CallRequest::new("m", json!({})));
        let serve = async {
            let req = recv_request(&mut server).await;
            send_reply(
                &mut server,
                &Reply {
                    id: req.id,
                    body: ReplyBody::Operation(OperationEnvelope::success(Some(json!(1)))),
                },
            )
            .await;
        };
        let (result, ()) = tokio::join!(call, serve);
        assert_eq!(result.unwrap().result, Some(json!(1)));
    }
}
