//! Authentication for Stratus calls.
//!
//! The driver authenticates by attaching a token header to every call. Where
//! that token comes from is the application's business: the [`Credentials`]
//! trait abstracts the provider, and [`AccessTokenCredentials`] covers the
//! common static-token case.
//!
//! # Security Model
//!
//! - Tokens are opaque strings minted by an external authority
//! - A provider may refresh or fetch tokens over the network; the fetch is
//!   bounded by the caller's deadline, not by this crate
//! - Provider failures abort the call and propagate to the caller verbatim

use std::sync::Arc;

use async_trait::async_trait;

/// Metadata key carrying the database name.
pub const DATABASE_HEADER: &str = "x-stratus-database";

/// Metadata key carrying the auth token.
pub const AUTH_TICKET_HEADER: &str = "x-stratus-auth-ticket";

/// Metadata key identifying the client build.
pub const SDK_INFO_HEADER: &str = "x-stratus-sdk-info";

/// Opaque provider failure, surfaced to the caller unchanged.
pub type CredentialsError = Box<dyn std::error::Error + Send + Sync>;

/// Produces the auth token attached to outgoing calls.
///
/// Implementations may block on IO (token refresh, metadata service); the
/// driver bounds the fetch with the caller's context.
#[async_trait]
pub trait Credentials: Send + Sync {
    async fn token(&self) -> Result<String, CredentialsError>;
}

/// Credentials backed by a fixed access token.
#[derive(Clone)]
pub struct AccessTokenCredentials {
    token: String,
}

impl AccessTokenCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for AccessTokenCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never leak the token through Debug output.
        f.debug_struct("AccessTokenCredentials").finish_non_exhaustive()
    }
}

#[async_trait]
impl Credentials for AccessTokenCredentials {
    async fn token(&self) -> Result<String, CredentialsError> {
        Ok(self.token.clone())
    }
}

#[async_trait]
impl<T: Credentials + ?Sized> Credentials for Arc<T> {
    async fn token(&self) -> Result<String, CredentialsError> {
        (**self).token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn access_token_returns_configured_value() {
        let creds = AccessTokenCredentials::new("secret-token");
        assert_eq!(creds.token().await.unwrap(), "secret-token");
    }

    #[test]
    fn debug_does_not_leak_token() {
        let creds = AccessTokenCredentials::new("secret-token");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("secret-token"));
    }
}
