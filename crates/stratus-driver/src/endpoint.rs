//! Endpoints and the reconciliation diff.
//!
//! An [`Endpoint`] is one reachable database node. Identity is `(addr,
//! port)`; `load_factor` and `local` are mutable metadata that discovery
//! refreshes. Reconciliation works on lists sorted by identity and merges
//! them in one pass.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// One reachable database node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub addr: String,
    pub port: u16,
    /// Relative load reported by discovery; lower is better.
    #[serde(default)]
    pub load_factor: f32,
    /// Whether the node sits in the caller's locality.
    #[serde(default)]
    pub local: bool,
}

impl Endpoint {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            load_factor: 0.0,
            local: false,
        }
    }

    /// Total order on identity, ignoring metadata.
    pub fn cmp_identity(&self, other: &Endpoint) -> Ordering {
        (self.addr.as_str(), self.port).cmp(&(other.addr.as_str(), other.port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Sorts endpoints by identity, the order `diff_endpoints` requires.
pub fn sort_endpoints(endpoints: &mut [Endpoint]) {
    endpoints.sort_by(Endpoint::cmp_identity);
}

/// Sorted-merge diff of two endpoint lists.
///
/// Both inputs must be sorted by identity. For every key present in both
/// lists `on_update` fires with the `next` entry (metadata may have
/// changed); keys only in `next` fire `on_insert`; keys only in `prev` fire
/// `on_remove`.
pub fn diff_endpoints<U, I, R>(
    prev: &[Endpoint],
    next: &[Endpoint],
    mut on_update: U,
    mut on_insert: I,
    mut on_remove: R,
) where
    U: FnMut(&Endpoint),
    I: FnMut(&Endpoint),
    R: FnMut(&Endpoint),
{
    let (mut i, mut j) = (0, 0);
    while i < prev.len() && j < next.len() {
        match prev[i].cmp_identity(&next[j]) {
            Ordering::Equal => {
                on_update(&next[j]);
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                on_remove(&prev[i]);
                i += 1;
            }
            Ordering::Greater => {
                on_insert(&next[j]);
                j += 1;
            }
        }
    }
    for e in &prev[i..] {
        on_remove(e);
    }
    for e in &next[j..] {
        on_insert(e);
    }
}

/// Splits a `host:port` seed address. IPv6 hosts use the usual
/// `[addr]:port` bracket form.
pub fn split_host_port(addr: &str) -> Result<(String, u16), DriverError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| DriverError::InvalidAddress(addr.to_string()))?;
    let host = host.strip_prefix('[').map_or(host, |h| h.strip_suffix(']').unwrap_or(h));
    if host.is_empty() {
        return Err(DriverError::InvalidAddress(addr.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| DriverError::InvalidAddress(addr.to_string()))?;
    Ok((host.to_string(), port))
}
