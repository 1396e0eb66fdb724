//! Transport channel construction.
//!
//! The public [`Dialer`] carries network-level options next to the
//! [`DriverConfig`]; the crate-internal [`InnerDialer`] does the actual
//! work: resolve, connect (with keepalive and optional TLS), wrap the
//! stream in a [`Channel`], and run discovery over throwaway channels.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use stratus_common::transport::tls::maybe_tls;
use stratus_common::transport::BoxedIo;
use stratus_common::protocol::TransportError;
use stratus_common::Channel;

use crate::config::DriverConfig;
use crate::conn::{Conn, ConnAddr};
use crate::context::Context;
use crate::discovery::DiscoveryClient;
use crate::endpoint::Endpoint;
use crate::error::DriverError;
use crate::meta::Meta;
use crate::trace::DriverTrace;

/// Replaces the default TCP dialing function, e.g. to tunnel through a
/// proxy or to connect in-memory in tests. `addr` is `host:port`.
#[async_trait]
pub trait NetDial: Send + Sync {
    async fn dial(&self, addr: &str) -> io::Result<BoxedIo>;
}

/// Options of dialing and initialization of a driver instance.
#[derive(Clone)]
pub struct Dialer {
    /// Driver configuration.
    pub config: DriverConfig,

    /// Optional replacement for the default network dialing function.
    pub net_dial: Option<Arc<dyn NetDial>>,

    /// TLS client configuration. `None` means insecure plaintext.
    pub tls: Option<Arc<rustls::ClientConfig>>,

    /// Maximum time one dial may take. `None` disables the cap.
    pub timeout: Option<Duration>,

    /// TCP keepalive time. `None` disables keepalive probing. The value is
    /// applied verbatim; most kernels round it to whole seconds and enforce
    /// their own minimum.
    pub keepalive: Option<Duration>,
}

impl Dialer {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            net_dial: None,
            tls: None,
            timeout: None,
            keepalive: None,
        }
    }

    pub fn with_net_dial(mut self, net_dial: Arc<dyn NetDial>) -> Self {
        self.net_dial = Some(net_dial);
        self
    }

    pub fn with_tls(mut self, tls: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = Some(keepalive);
        self
    }
}

pub(crate) struct InnerDialer {
    net_dial: Option<Arc<dyn NetDial>>,
    tls: Option<Arc<rustls::ClientConfig>>,
    timeout: Option<Duration>,
    keepalive: Option<Duration>,
    trace: Arc<dyn DriverTrace>,
    meta: Arc<Meta>,
}

impl InnerDialer {
    pub(crate) fn new(dialer: &Dialer, trace: Arc<dyn DriverTrace>, meta: Arc<Meta>) -> Self {
        Self {
            net_dial: dialer.net_dial.clone(),
            tls: dialer.tls.clone(),
            timeout: dialer.timeout,
            keepalive: dialer.keepalive,
            trace,
            meta,
        }
    }

    /// Dials one endpoint and wraps the stream in a fresh channel.
    pub(crate) async fn dial_host_port(
        &self,
        ctx: &Context,
        host: &str,
        port: u16,
    ) -> Result<Conn, DriverError> {
        let addr = ConnAddr::new(host, port);
        let addr_str = addr.to_string();

        self.trace.dial_start(ctx, &addr_str);
        let result = self.connect(ctx, host, &addr_str).await;
        self.trace.dial_done(ctx, &addr_str, result.as_ref().err());

        let channel = result?;
        Ok(Conn::new(channel, addr))
    }

    pub(crate) async fn dial_addr(&self, ctx: &Context, addr: &str) -> Result<Conn, DriverError> {
        let (host, port) = crate::endpoint::split_host_port(addr)?;
        self.dial_host_port(ctx, &host, port).await
    }

    /// One discovery round: throwaway channel to the seed, one listing RPC,
    /// channel closed on the way out regardless of outcome.
    pub(crate) async fn discover(
        &self,
        ctx: &Context,
        seed: &str,
    ) -> Result<Vec<Endpoint>, DriverError> {
        self.trace.discovery_start(ctx);
        let result = self.discover_inner(ctx, seed).await;
        match &result {
            Ok(endpoints) => self.trace.discovery_done(ctx, endpoints, None),
            Err(err) => self.trace.discovery_done(ctx, &[], Some(err)),
        }
        result
    }

    async fn discover_inner(&self, ctx: &Context, seed: &str) -> Result<Vec<Endpoint>, DriverError> {
        let conn = self.dial_addr(ctx, seed).await?;

        let sub_ctx = match self.timeout {
            Some(t) => ctx.with_timeout(t),
            None => ctx.clone(),
        };
        let endpoints = DiscoveryClient::new(&conn, &self.meta)
            .discover(&sub_ctx)
            .await;

        conn.channel().close().await;
        endpoints
    }

    async fn connect(
        &self,
        ctx: &Context,
        host: &str,
        addr_str: &str,
    ) -> Result<Channel, DriverError> {
        let dial_ctx = match self.timeout {
            Some(t) => ctx.with_timeout(t),
            None => ctx.clone(),
        };

        let io: BoxedIo = match &self.net_dial {
            Some(net_dial) => dial_ctx
                .run_until_done(net_dial.dial(addr_str))
                .await?
                .map_err(|e| TransportError::from_io(e, "dialing"))?,
            None => dial_ctx.run_until_done(self.tcp_connect(addr_str)).await??,
        };

        let io = dial_ctx
            .run_until_done(maybe_tls(io, host, self.tls.clone()))
            .await?
            .map_err(|e| TransportError::from_io(e, "tls handshake"))?;

        Ok(Channel::new(io, addr_str))
    }

    async fn tcp_connect(&self, addr_str: &str) -> Result<BoxedIo, DriverError> {
        let addrs = tokio::net::lookup_host(addr_str)
            .await
            .map_err(|e| TransportError::from_io(e, "resolving address"))?;

        let mut last_err: Option<io::Error> = None;
        for addr in addrs {
            match self.connect_one(addr).await {
                Ok(io) => return Ok(io),
                Err(err) => {
                    tracing::debug!(%addr, error = %err, "connect attempt failed, trying next address");
                    last_err = Some(err);
                }
            }
        }
        let err = last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing"));
        Err(TransportError::from_io(err, "connecting").into())
    }

    async fn connect_one(&self, addr: SocketAddr) -> io::Result<BoxedIo> {
        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        let _ = socket.set_nodelay(true);
        if let Some(time) = self.keepalive {
            let keepalive = socket2::TcpKeepalive::new().with_time(time);
            socket.set_tcp_keepalive(&keepalive)?;
        }
        socket.set_nonblocking(true)?;

        let socket = tokio::net::TcpSocket::from_std_stream(socket.into());
        let stream = socket.connect(addr).await?;
        Ok(Box::new(stream))
    }
}
