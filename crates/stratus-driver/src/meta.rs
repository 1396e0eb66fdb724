//! Per-call metadata.
//!
//! Builds the outgoing header map for one call: database name, client build
//! info, and (when a provider is configured) the auth token. Token fetch
//! may block on IO and is bounded by the caller's context; provider
//! failures propagate unchanged.

use std::collections::BTreeMap;
use std::sync::Arc;

use stratus_common::auth::{AUTH_TICKET_HEADER, DATABASE_HEADER, SDK_INFO_HEADER};
use stratus_common::Credentials;

use crate::context::Context;
use crate::error::DriverError;

const SDK_INFO: &str = concat!("stratus-driver/", env!("CARGO_PKG_VERSION"));

pub(crate) struct Meta {
    database: String,
    credentials: Option<Arc<dyn Credentials>>,
}

impl Meta {
    pub(crate) fn new(database: String, credentials: Option<Arc<dyn Credentials>>) -> Self {
        Self {
            database,
            credentials,
        }
    }

    pub(crate) fn database(&self) -> &str {
        &self.database
    }

    /// The outgoing header set for one call.
    pub(crate) async fn metadata(
        &self,
        ctx: &Context,
    ) -> Result<BTreeMap<String, String>, DriverError> {
        let mut md = BTreeMap::new();
        md.insert(DATABASE_HEADER.to_string(), self.database.clone());
        md.insert(SDK_INFO_HEADER.to_string(), SDK_INFO.to_string());

        if let Some(credentials) = &self.credentials {
            let token = ctx
                .run_until_done(credentials.token())
                .await?
                .map_err(DriverError::credentials)?;
            md.insert(AUTH_TICKET_HEADER.to_string(), token);
        }
        Ok(md)
    }
}
