use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use pointy_core::{ConnectionId, Message, PushError, PushOutcome, Pusher};

/// Pushes messages through an external connection gateway that exposes
/// `POST {endpoint}/@connections/{connection_id}`.
///
/// `410 Gone` means the gateway no longer holds the connection.
pub struct GatewayPusher {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl GatewayPusher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url_for(&self, connection_id: &ConnectionId) -> String {
        format!("{}/@connections/{}", self.endpoint, connection_id)
    }
}

#[async_trait]
impl Pusher for GatewayPusher {
    async fn send(
        &self,
        connection_id: &ConnectionId,
        message: &Message,
    ) -> Result<PushOutcome, PushError> {
        let body = message
            .to_json()
            .map_err(|e| PushError::Encode(e.to_string()))?;

        let response = self
            .client
            .post(self.url_for(connection_id))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PushError::Timeout(self.timeout)
                } else {
                    PushError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(PushOutcome::Delivered);
        }
        if status == StatusCode::GONE {
            return Ok(PushOutcome::Gone);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PushError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
