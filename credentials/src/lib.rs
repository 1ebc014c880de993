//! Bearer credentials for the remote storage and job-execution services.
//!
//! Consumers only ever see [`TokenProvider::get_token`]. Token minting lives
//! behind [`TokenSource`], and [`TokenCache`] sits in between so that a token
//! is reused until shortly before it expires and concurrent callers share a
//! single refresh.

mod cache;
mod client_credentials;
mod error;

use std::time::Duration;

use async_trait::async_trait;
pub use cache::{TokenCache, EXPIRY_SKEW, MAX_TOKEN_LIFETIME};
pub use client_credentials::{ClientCredentials, ClientCredentialsSource};
pub use error::{AuthError, AuthResult};

/// A freshly minted access token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

/// Mints access tokens for a scope. Implementations do not cache.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self, scope: &str) -> AuthResult<IssuedToken>;
}

/// Hands out a valid bearer token for a scope.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, scope: &str) -> AuthResult<String>;
}
