//! Server status codes and issues.
//!
//! Every operation envelope and stream item carries a [`StatusCode`] and a
//! (possibly empty) list of [`Issue`]s explaining it. The enum is closed:
//! values this client does not know decode to [`StatusCode::Unspecified`]
//! instead of failing the whole reply.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal status of a server-side operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum StatusCode {
    Success,
    BadRequest,
    Unauthorized,
    InternalError,
    Overloaded,
    Unavailable,
    Timeout,
    Cancelled,
    NotFound,
    PreconditionFailed,
    /// Catch-all for status values introduced after this client was built.
    Unspecified,
}

impl From<String> for StatusCode {
    fn from(s: String) -> Self {
        match s.as_str() {
            "SUCCESS" => StatusCode::Success,
            "BAD_REQUEST" => StatusCode::BadRequest,
            "UNAUTHORIZED" => StatusCode::Unauthorized,
            "INTERNAL_ERROR" => StatusCode::InternalError,
            "OVERLOADED" => StatusCode::Overloaded,
            "UNAVAILABLE" => StatusCode::Unavailable,
            "TIMEOUT" => StatusCode::Timeout,
            "CANCELLED" => StatusCode::Cancelled,
            "NOT_FOUND" => StatusCode::NotFound,
            "PRECONDITION_FAILED" => StatusCode::PreconditionFailed,
            _ => StatusCode::Unspecified,
        }
    }
}

impl StatusCode {
    /// Whether this status belongs to the timeout class used for endpoint
    /// health accounting. Only `Timeout` and `Cancelled` say anything about
    /// the peer; the rest are verdicts about the request itself.
    pub fn is_timeout_class(self) -> bool {
        matches!(self, StatusCode::Timeout | StatusCode::Cancelled)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCode::Success => "SUCCESS",
            StatusCode::BadRequest => "BAD_REQUEST",
            StatusCode::Unauthorized => "UNAUTHORIZED",
            StatusCode::InternalError => "INTERNAL_ERROR",
            StatusCode::Overloaded => "OVERLOADED",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::Timeout => "TIMEOUT",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::PreconditionFailed => "PRECONDITION_FAILED",
            StatusCode::Unspecified => "UNSPECIFIED",
        };
        f.write_str(s)
    }
}

/// A structured diagnostic attached to an envelope or stream item.
///
/// Issues may nest: a top-level issue summarizes, its children carry the
/// details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub code: u32,
    pub message: String,
    #[serde(default)]
    pub severity: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
}

impl Issue {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: 0,
            issues: Vec::new(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.issues.is_empty() {
            write!(f, " ({} nested)", self.issues.len())?;
        }
        Ok(())
    }
}
