//! Stratus Wire Protocol and Transport
//!
//! This crate provides the wire-level building blocks shared by the Stratus
//! driver: protocol message types, the framed codec, and the per-endpoint
//! transport channel.
//!
//! # Overview
//!
//! Every Stratus RPC travels as a single JSON frame over a long-lived TCP
//! (optionally TLS) connection. The server answers a unary call with one
//! terminal operation envelope, and a server-streaming call with zero or
//! more stream items followed by a finish marker. Frames are matched back
//! to their originating call by request id, so one connection carries any
//! number of concurrent calls.
//!
//! # Components
//!
//! - [`protocol`] - Request/reply frames, the operation envelope, status
//!   codes, issues and transport errors
//! - [`transport`] - The framed codec, TLS stream wrapper, and the
//!   multiplexing [`Channel`](transport::Channel)
//! - [`auth`] - The [`Credentials`](auth::Credentials) provider contract
//!
//! # Example
//!
//! ```no_run
//! use stratus_common::protocol::CallRequest;
//! use serde_json::json;
//!
//! let request = CallRequest::new("Stratus.Table/Execute", json!({"query": "SELECT 1"}));
//! assert_eq!(request.method, "Stratus.Table/Execute");
//! ```

pub mod auth;
pub mod protocol;
pub mod transport;

pub use auth::{AccessTokenCredentials, Credentials, CredentialsError};
pub use protocol::{
    CallRequest, Issue, OperationEnvelope, OperationParams, Reply, ReplyBody, StatusCode,
    StreamItem, TransportError, TransportErrorKind,
};
pub use transport::{Channel, StreamReceiver};
