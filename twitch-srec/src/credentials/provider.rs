//! App access token acquisition (OAuth client-credentials grant).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::AppConfig;
use crate::{Error, Result};

/// Bearer credential for API calls. The value is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Something that can obtain a fresh access token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a new token. Fails with [`Error::Auth`] on network or HTTP failure.
    async fn fetch_token(&self) -> Result<AccessToken>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Token provider backed by the Twitch OAuth token endpoint.
pub struct TwitchTokenProvider {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
}

impl TwitchTokenProvider {
    pub fn new(client: reqwest::Client, config: &AppConfig) -> Self {
        Self {
            client,
            endpoint: config.token_endpoint.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }
}

#[async_trait]
impl TokenProvider for TwitchTokenProvider {
    async fn fetch_token(&self) -> Result<AccessToken> {
        debug!(endpoint = %self.endpoint, "Requesting app access token");

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| Error::auth(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::auth(format!("token endpoint returned {status}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::auth(format!("invalid token response: {e}")))?;

        if body.access_token.is_empty() {
            return Err(Error::auth("token endpoint returned an empty token"));
        }

        Ok(AccessToken::new(body.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_value() {
        let token = AccessToken::new("super-secret");
        assert_eq!(format!("{token:?}"), "AccessToken(***)");
        assert_eq!(token.as_str(), "super-secret");
    }
}
