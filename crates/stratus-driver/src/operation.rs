//! Driver-opaque operations.
//!
//! Per-service client stubs describe their RPCs through these traits; the
//! driver never learns message schemas. An [`Operation`] is one unary
//! request/response pair, a [`StreamOperation`] a server-streaming RPC with
//! its per-message handler.

use serde_json::Value;

use crate::error::DriverError;

/// One unary RPC.
pub trait Operation: Send {
    /// Full method name, e.g. `"Stratus.Table/Execute"`.
    fn method(&self) -> &str;

    /// The request message.
    fn payload(&self) -> Value;

    /// Whether this operation carries a response container.
    ///
    /// Operations without one skip result decoding even when the server
    /// sends a result; the protocol may grow bodies a caller chooses to
    /// ignore.
    fn wants_result(&self) -> bool {
        true
    }

    /// Decodes the envelope result into the response container.
    fn decode_result(&mut self, raw: Value) -> Result<(), DriverError>;
}

/// One server-streaming RPC.
///
/// `process` is invoked once per received message in arrival order, then
/// exactly once more with the terminal error: either
/// [`DriverError::EndOfStream`] for a clean finish or the failure that
/// ended the stream.
pub trait StreamOperation: Send + 'static {
    /// Full method name.
    fn method(&self) -> &str;

    /// The single request message sent before the stream opens.
    fn payload(&self) -> Value;

    /// Handles one stream event.
    fn process(&mut self, event: Result<Value, DriverError>);
}

/// A ready-made unary operation for callers without a typed stub.
///
/// Decodes the result into an `Option<Value>`.
pub struct RawOperation {
    method: String,
    payload: Value,
    result: Option<Value>,
}

impl RawOperation {
    pub fn new(method: impl Into<String>, payload: Value) -> Self {
        Self {
            method: method.into(),
            payload,
            result: None,
        }
    }

    /// The decoded result, if the call produced one.
    pub fn into_result(self) -> Option<Value> {
        self.result
    }
}

impl Operation for RawOperation {
    fn method(&self) -> &str {
        &self.method
    }

    fn payload(&self) -> Value {
        self.payload.clone()
    }

    fn decode_result(&mut self, raw: Value) -> Result<(), DriverError> {
        self.result = Some(raw);
        Ok(())
    }
}
