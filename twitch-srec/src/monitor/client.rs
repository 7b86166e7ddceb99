//! Status queries against the Helix streams endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};

use super::status::{StreamMetadata, StreamStatus};
use crate::config::AppConfig;
use crate::credentials::AccessToken;

/// Queries a channel's live status.
///
/// Implementations never fail: every transport or HTTP outcome is mapped to a
/// [`StreamStatus`] variant.
#[async_trait]
pub trait StatusClient: Send + Sync {
    async fn query_status(&self, channel: &str, token: &AccessToken) -> StreamStatus;
}

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    data: Vec<StreamMetadata>,
}

/// Map an HTTP status code and body to a [`StreamStatus`].
pub fn classify_response(status_code: u16, body: &str) -> StreamStatus {
    match status_code {
        401 => StreamStatus::Unauthorized,
        404 => StreamStatus::NotFound,
        200..=299 => match serde_json::from_str::<StreamsResponse>(body) {
            Ok(response) => match response.data.into_iter().next() {
                Some(metadata) => StreamStatus::Online(metadata),
                None => StreamStatus::Offline,
            },
            Err(e) => StreamStatus::TransientError(format!("invalid response body: {e}")),
        },
        code => StreamStatus::TransientError(format!("HTTP {code}")),
    }
}

/// [`StatusClient`] over `GET <endpoint>?user_login=<name>`.
pub struct HelixStatusClient {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
}

impl HelixStatusClient {
    /// `client` should carry the request timeout.
    pub fn new(client: reqwest::Client, config: &AppConfig) -> Self {
        Self {
            client,
            endpoint: config.status_endpoint.clone(),
            client_id: config.client_id.clone(),
        }
    }
}

#[async_trait]
impl StatusClient for HelixStatusClient {
    async fn query_status(&self, channel: &str, token: &AccessToken) -> StreamStatus {
        trace!(channel, "Querying stream status");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("user_login", channel)])
            .header("Client-ID", &self.client_id)
            .bearer_auth(token.as_str())
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                debug!(channel, error = %e, "Status request failed");
                let reason = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    format!("request failed: {e}")
                };
                return StreamStatus::TransientError(reason);
            }
        };

        let code = response.status().as_u16();
        match response.text().await {
            Ok(body) => classify_response(code, &body),
            Err(e) => StreamStatus::TransientError(format!("reading response body: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_unauthorized_and_not_found() {
        assert_eq!(classify_response(401, ""), StreamStatus::Unauthorized);
        assert_eq!(classify_response(404, "{}"), StreamStatus::NotFound);
    }

    #[test]
    fn test_classify_empty_data_is_offline() {
        assert_eq!(classify_response(200, r#"{"data":[]}"#), StreamStatus::Offline);
    }

    #[test]
    fn test_classify_first_entry_is_used() {
        let body = r#"{
            "data": [
                {"id": "111", "title": "Ranked Play!", "game_name": "Chess",
                 "started_at": "2024-01-02T03:04:05Z", "viewer_count": 10},
                {"id": "222", "title": "other"}
            ],
            "pagination": {}
        }"#;
        let StreamStatus::Online(metadata) = classify_response(200, body) else {
            panic!("expected online");
        };
        assert_eq!(metadata.title(), "Ranked Play!");
        assert_eq!(metadata.id, "111");
        assert_eq!(metadata.game_name.as_deref(), Some("Chess"));
        assert_eq!(metadata.started_at.as_deref(), Some("2024-01-02T03:04:05Z"));
    }

    #[test]
    fn test_classify_null_or_missing_title_is_still_online() {
        for body in [
            r#"{"data":[{"id":"1","title":null}]}"#,
            r#"{"data":[{"id":"1"}]}"#,
        ] {
            let StreamStatus::Online(metadata) = classify_response(200, body) else {
                panic!("expected online for {body}");
            };
            assert_eq!(metadata.title, None);
            assert_eq!(metadata.title(), "");
            assert_eq!(metadata.id, "1");
        }
    }

    #[test]
    fn test_classify_server_errors_are_transient() {
        for code in [500, 502, 503, 429, 400] {
            assert!(matches!(
                classify_response(code, ""),
                StreamStatus::TransientError(_)
            ));
        }
    }

    #[test]
    fn test_classify_garbage_body_is_transient() {
        assert!(matches!(
            classify_response(200, "<html>"),
            StreamStatus::TransientError(_)
        ));
    }
}
