//! Driver error taxonomy.
//!
//! Every failure a caller can see is a [`DriverError`] variant. The driver
//! retries nothing: each error surfaces as-is and higher layers decide what
//! to do with it. Errors are cheaply cloneable so the stream worker can hand
//! the terminal error to the process callback and still report it to the
//! trace hooks.

use std::sync::Arc;

use thiserror::Error;

use stratus_common::protocol::{Issue, StatusCode, TransportError};
use stratus_common::CredentialsError;

/// Server returned a non-success envelope status.
#[derive(Debug, Clone, Error)]
#[error("operation error: {status}{}", format_issues(.issues))]
pub struct OpError {
    pub status: StatusCode,
    pub issues: Vec<Issue>,
}

fn format_issues(issues: &[Issue]) -> String {
    if issues.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
    format!(": {}", rendered.join("; "))
}

/// Anything `call`, `stream_read` or `dial` can fail with.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// The driver was closed; nothing will ever succeed again.
    #[error("driver closed")]
    Closed,

    /// The server accepted the operation but has not completed it. This
    /// layer does not poll; the error is terminal here.
    #[error("operation is not ready")]
    OperationNotReady,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Operation(#[from] OpError),

    /// The caller's (or the request-timeout-tightened) deadline fired.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The caller's context was cancelled.
    #[error("canceled")]
    Canceled,

    /// The credentials provider failed; its error is preserved untouched.
    #[error("credentials: {0}")]
    Credentials(Arc<CredentialsError>),

    /// End-of-stream sentinel. Delivered to the stream process callback
    /// exactly once; never returned from `stream_read` itself.
    #[error("end of stream")]
    EndOfStream,

    /// The seed address could not be parsed as `host:port`.
    #[error("invalid endpoint address: {0}")]
    InvalidAddress(String),

    /// The envelope result did not decode into the response container.
    #[error("malformed result payload: {0}")]
    Decode(String),
}

impl DriverError {
    pub(crate) fn credentials(err: CredentialsError) -> Self {
        DriverError::Credentials(Arc::new(err))
    }

    /// Whether the error is a verdict about the server's status rather than
    /// the request: a non-success envelope with the given status.
    pub fn is_op_error(&self, status: StatusCode) -> bool {
        matches!(self, DriverError::Operation(op) if op.status == status)
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        DriverError::Decode(err.to_string())
    }
}

/// Whether `err` says something about the endpoint's health.
///
/// True for operation errors with a timeout-class status, every transport
/// error, and the two context errors. Permanent API errors (bad request,
/// precondition failures...) are excluded: the endpoint answered just fine.
pub fn is_timeout_class(err: &DriverError) -> bool {
    match err {
        DriverError::Operation(op) => op.status.is_timeout_class(),
        DriverError::Transport(_) => true,
        DriverError::DeadlineExceeded | DriverError::Canceled => true,
        _ => false,
    }
}

/// Hides the end-of-stream sentinel from runtime and trace bookkeeping.
pub(crate) fn hide_eof(err: &DriverError) -> Option<&DriverError> {
    match err {
        DriverError::EndOfStream => None,
        other => Some(other),
    }
}
