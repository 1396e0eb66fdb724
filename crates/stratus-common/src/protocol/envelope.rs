//! Request and reply frames.
//!
//! A client sends [`CallRequest`] frames; the server answers with [`Reply`]
//! frames matched by request id. A unary call gets exactly one
//! [`ReplyBody::Operation`]; a server-streaming call gets zero or more
//! [`ReplyBody::Item`]s followed by [`ReplyBody::Finish`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::{Issue, StatusCode};

/// Unique identifier of one in-flight call on a channel.
pub type RequestId = u64;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a unique request id.
///
/// Upper 32 bits are seconds since the UNIX epoch, lower 32 bits an atomic
/// counter, so ids stay unique across process restarts and within one
/// runtime.
pub fn next_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    (timestamp << 32) | (counter & 0xFFFF_FFFF)
}

/// Server-side execution hints carried inside a request.
///
/// Durations travel as milliseconds. `operation_timeout` is a soft
/// deadline: the server aborts processing and reports `TIMEOUT`.
/// `cancel_after` is a hard cancellation hint: the server attempts to
/// cancel and reports the outcome either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_after_ms: Option<u64>,
}

impl OperationParams {
    pub fn new(operation_timeout: Option<Duration>, cancel_after: Option<Duration>) -> Self {
        Self {
            operation_timeout_ms: operation_timeout.map(|d| d.as_millis() as u64),
            cancel_after_ms: cancel_after.map(|d| d.as_millis() as u64),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operation_timeout_ms.is_none() && self.cancel_after_ms.is_none()
    }
}

/// One RPC call as it travels on the wire.
///
/// # Fields
///
/// - `id`: unique request identifier, used to demultiplex replies
/// - `method`: full method name, e.g. `"Stratus.Table/Execute"`
/// - `metadata`: flat header map (database name, auth ticket, sdk info)
/// - `params`: optional server-side execution hints
/// - `payload`: the request message, opaque to this layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<OperationParams>,
    pub payload: Value,
}

impl CallRequest {
    /// Creates a request with a freshly generated id and empty metadata.
    pub fn new(method: impl Into<String>, payload: Value) -> Self {
        Self {
            id: next_request_id(),
            method: method.into(),
            metadata: BTreeMap::new(),
            params: None,
            payload,
        }
    }

    /// Replaces the metadata map.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attaches operation params. Empty params are dropped rather than sent.
    pub fn with_params(mut self, params: OperationParams) -> Self {
        self.params = if params.is_empty() { None } else { Some(params) };
        self
    }
}

/// Terminal wrapper of every unary reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEnvelope {
    /// False when the server accepted the operation but has not finished it.
    pub ready: bool,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
    /// Result message, present only for operations that produce one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl OperationEnvelope {
    /// A ready, successful envelope carrying `result`.
    pub fn success(result: Option<Value>) -> Self {
        Self {
            ready: true,
            status: StatusCode::Success,
            issues: Vec::new(),
            result,
        }
    }

    /// A ready, failed envelope with the given status and issues.
    pub fn failure(status: StatusCode, issues: Vec<Issue>) -> Self {
        Self {
            ready: true,
            status,
            issues,
            result: None,
        }
    }
}

/// One message of a server stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamItem {
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
    pub payload: Value,
}

impl StreamItem {
    pub fn success(payload: Value) -> Self {
        Self {
            status: StatusCode::Success,
            issues: Vec::new(),
            payload,
        }
    }
}

/// One server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: RequestId,
    #[serde(flatten)]
    pub body: ReplyBody,
}

/// Payload of a server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ReplyBody {
    /// Terminal reply of a unary call.
    Operation(OperationEnvelope),
    /// One message of a server stream.
    Item(StreamItem),
    /// End-of-stream marker of a server stream.
    Finish,
}
