use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::{AuthError, AuthResult, IssuedToken, TokenSource};

#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// OAuth2 `client_credentials` grant against a token endpoint.
pub struct ClientCredentialsSource {
    http: reqwest::Client,
    token_url: String,
    credentials: ClientCredentials,
}

impl ClientCredentialsSource {
    pub fn new(http: reqwest::Client, token_url: &str, credentials: ClientCredentials) -> Self {
        Self {
            http,
            token_url: token_url.to_string(),
            credentials,
        }
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsSource {
    async fn fetch(&self, scope: &str) -> AuthResult<IssuedToken> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), scope, "token request rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let payload: TokenResponse = response.json().await?;
        Ok(IssuedToken {
            access_token: payload.access_token,
            expires_in: Duration::from_secs(payload.expires_in),
        })
    }
}
