//! Stratus Driver
//!
//! Cluster-aware RPC dispatch for the Stratus distributed database: the
//! layer that turns one logical database address into a living pool of
//! connections and runs unary and server-streaming calls over it.
//!
//! # Overview
//!
//! `dial` bootstraps one connection to the seed address, runs an initial
//! endpoint discovery, dials every discovered endpoint into the cluster,
//! and keeps the set fresh with a background discovery loop. Each
//! [`Driver::call`] asks the configured balancer for a
//! connection, attaches metadata and server-side deadline hints, executes
//! the RPC and feeds the outcome back into the connection's runtime stats.
//!
//! # Key Features
//!
//! - **Pluggable balancing**: round-robin or power-of-two-choices, with an
//!   optional strict locality split ([`DriverConfig::prefer_local_endpoints`])
//! - **Layered deadlines**: per-call request timeout, per-stream timeout,
//!   and server-side `operation_timeout` / `cancel_after` hints derived
//!   from the caller's context
//! - **Background discovery**: sorted-merge reconciliation of the endpoint
//!   set; a failed round leaves the previous set untouched
//! - **Structured errors**: a closed [`DriverError`] taxonomy; the driver
//!   retries nothing and surfaces every failure
//!
//! # Usage
//!
//! ```rust,no_run
//! use serde_json::json;
//! use stratus_driver::{dial, Context, DriverConfig, RawOperation};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = Context::background();
//!     let driver = dial(&ctx, "db.local:2135", DriverConfig::new("/prod/orders")).await?;
//!
//!     let mut op = RawOperation::new("Stratus.Table/Execute", json!({"query": "SELECT 1"}));
//!     driver.call(&ctx, &mut op).await?;
//!     println!("result: {:?}", op.into_result());
//!
//!     driver.close().await?;
//!     Ok(())
//! }
//! ```

mod balancer;
mod cluster;
pub mod config;
pub mod conn;
pub mod context;
pub mod dialer;
pub mod discovery;
pub mod driver;
pub mod endpoint;
pub mod error;
mod meta;
pub mod operation;
mod repeater;
mod series;
pub mod trace;

pub use config::{
    BalancingMethod, ContextDeadlineMapping, DiscoveryInterval, DriverConfig, P2cConfig,
    DEFAULT_DISCOVERY_INTERVAL,
};
pub use conn::{Conn, ConnAddr, ConnState, ConnStats};
pub use context::Context;
pub use dialer::{Dialer, NetDial};
pub use driver::{dial, Driver};
pub use endpoint::{diff_endpoints, sort_endpoints, Endpoint};
pub use error::{is_timeout_class, DriverError, OpError};
pub use operation::{Operation, RawOperation, StreamOperation};
pub use trace::{DriverTrace, NopDriverTrace};

// Wire-level types callers need to configure the driver or interpret its
// errors.
pub use stratus_common::auth::{AccessTokenCredentials, Credentials, CredentialsError};
pub use stratus_common::protocol::{
    Issue, OperationParams, StatusCode, TransportError, TransportErrorKind,
};
