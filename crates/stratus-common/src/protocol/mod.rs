//! Stratus Protocol Definitions
//!
//! Core protocol types for the Stratus wire format: client request frames,
//! server reply frames, the operation envelope with its status/issue
//! vocabulary, and the transport error taxonomy.
//!
//! # Protocol Types
//!
//! - **[`CallRequest`]**: one RPC call with method name, metadata, optional
//!   operation params and an opaque payload
//! - **[`Reply`]**: one server frame, matched to a call by request id
//! - **[`OperationEnvelope`]**: the terminal `{ready, status, issues, result}`
//!   wrapper of every unary call
//! - **[`StreamItem`]**: one server-stream message carrying status and issues
//!   alongside its payload
//! - **[`TransportError`]**: transport-layer failures with a closed reason enum
//!
//! The driver is deliberately ignorant of payload schemas; everything below
//! the envelope fields is `serde_json::Value`.

pub mod envelope;
pub mod error;
pub mod status;

pub use envelope::{
    next_request_id, CallRequest, OperationEnvelope, OperationParams, Reply, ReplyBody, RequestId,
    StreamItem,
};
pub use error::{TransportError, TransportErrorKind};
pub use status::{Issue, StatusCode};
