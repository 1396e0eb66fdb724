//! Stratus Transport Layer
//!
//! Framed transport over TCP or TLS.
//!
//! # Wire Format
//!
//! Every message is one frame: `[4-byte length as u32 big-endian] + [JSON
//! body]`. Inbound frames larger than [`codec::MAX_RECV_FRAME`] (50 MiB)
//! poison the connection instead of being allocated.
//!
//! # Components
//!
//! - **[`codec`]**: frame read/write over any async stream
//! - **[`tls`]**: the [`MaybeTlsStream`](tls::MaybeTlsStream) wrapper and the
//!   client-side TLS handshake
//! - **[`channel`]**: the per-endpoint [`Channel`] that multiplexes
//!   concurrent unary and server-streaming calls over one connection

pub mod channel;
pub mod codec;
pub mod tls;

pub use channel::{Channel, StreamReceiver};
pub use tls::MaybeTlsStream;

use tokio::io::{AsyncRead, AsyncWrite};

/// Anything a channel can run over: plain TCP, TLS, or an in-memory pipe in
/// tests.
pub trait RawIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawIo for T {}

/// Boxed stream handed to a [`Channel`].
pub type BoxedIo = Box<dyn RawIo>;
