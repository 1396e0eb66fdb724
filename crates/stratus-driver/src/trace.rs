//! Driver trace hooks.
//!
//! A [`DriverTrace`] implementation observes the driver's life: dialing,
//! discovery rounds, conn acquisition, unary operations and stream
//! lifecycles. Hooks come in begin/end pairs and always receive the
//! caller's raw [`Context`] so a sink can see the original deadline, not
//! the driver-tightened one.
//!
//! Every hook has a no-op default; implement only what you need.

use crate::conn::ConnAddr;
use crate::context::Context;
use crate::endpoint::Endpoint;
use crate::error::DriverError;

use stratus_common::protocol::OperationParams;

/// Paired begin/end callbacks around the driver's moving parts.
#[allow(unused_variables)]
pub trait DriverTrace: Send + Sync {
    fn dial_start(&self, ctx: &Context, addr: &str) {}
    fn dial_done(&self, ctx: &Context, addr: &str, err: Option<&DriverError>) {}

    fn discovery_start(&self, ctx: &Context) {}
    fn discovery_done(&self, ctx: &Context, endpoints: &[Endpoint], err: Option<&DriverError>) {}

    fn get_conn_start(&self, ctx: &Context) {}
    fn get_conn_done(&self, ctx: &Context, addr: Option<&ConnAddr>, err: Option<&DriverError>) {}

    fn operation_start(
        &self,
        ctx: &Context,
        addr: &ConnAddr,
        method: &str,
        params: Option<&OperationParams>,
    ) {
    }
    fn operation_done(
        &self,
        ctx: &Context,
        addr: &ConnAddr,
        method: &str,
        err: Option<&DriverError>,
    ) {
    }

    fn stream_start(&self, ctx: &Context, addr: &ConnAddr, method: &str) {}
    fn stream_recv_start(&self, ctx: &Context, addr: &ConnAddr, method: &str) {}
    fn stream_recv_done(
        &self,
        ctx: &Context,
        addr: &ConnAddr,
        method: &str,
        err: Option<&DriverError>,
    ) {
    }
    fn stream_done(&self, ctx: &Context, addr: &ConnAddr, method: &str, err: Option<&DriverError>) {
    }
}

/// The default sink: observes nothing.
pub struct NopDriverTrace;

impl DriverTrace for NopDriverTrace {}
