//! Endpoint discovery.
//!
//! One listing RPC returns the current endpoint set for a database. The
//! dialer calls it once synchronously at dial time and then periodically
//! from the background repeater, each time over a throwaway channel to the
//! seed address.

use serde::Deserialize;
use serde_json::json;

use stratus_common::protocol::{CallRequest, StatusCode};

use crate::conn::Conn;
use crate::context::Context;
use crate::endpoint::Endpoint;
use crate::error::{DriverError, OpError};
use crate::meta::Meta;

/// Method name of the listing RPC.
pub const LIST_ENDPOINTS_METHOD: &str = "Stratus.Discovery/ListEndpoints";

#[derive(Debug, Deserialize)]
struct ListEndpointsResult {
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

/// One-shot client for the listing RPC.
pub(crate) struct DiscoveryClient<'a> {
    conn: &'a Conn,
    meta: &'a Meta,
}

impl<'a> DiscoveryClient<'a> {
    pub(crate) fn new(conn: &'a Conn, meta: &'a Meta) -> Self {
        Self { conn, meta }
    }

    /// Lists the endpoints currently serving `database`.
    pub(crate) async fn discover(&self, ctx: &Context) -> Result<Vec<Endpoint>, DriverError> {
        let md = self.meta.metadata(ctx).await?;
        let request = CallRequest::new(
            LIST_ENDPOINTS_METHOD,
            json!({ "database": self.meta.database() }),
        )
        .with_metadata(md);

        let envelope = ctx
            .run_until_done(self.conn.channel().unary(request))
            .await??;

        if !envelope.ready {
            return Err(DriverError::OperationNotReady);
        }
        if envelope.status != StatusCode::Success {
            return Err(DriverError::Operation(OpError {
                status: envelope.status,
                issues: envelope.issues,
            }));
        }

        match envelope.result {
            Some(raw) => {
                let result: ListEndpointsResult = serde_json::from_value(raw)?;
                Ok(result.endpoints)
            }
            None => Ok(Vec::new()),
        }
    }
}
