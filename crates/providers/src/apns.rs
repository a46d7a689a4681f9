use async_trait::async_trait;
use stampsync_core::ports::PushGateway;
use stampsync_core::{SyncError, SyncResult};
use tracing::debug;

use crate::{status_error, transport_error};

/// Wallet pass updates go out as empty background pushes on the pass
/// type id topic; the device then asks the pass web service for changes.
#[derive(Clone)]
pub struct ApnsClient {
    client: reqwest::Client,
    base_url: String,
    topic: String,
    auth_token: Option<String>,
}

impl ApnsClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        topic: &str,
        auth_token: Option<String>,
    ) -> SyncResult<Self> {
        if topic.trim().is_empty() {
            return Err(SyncError::Config("APNs topic (pass type id) is empty".to_string()));
        }
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            topic: topic.to_string(),
            auth_token,
        })
    }
}

#[async_trait]
impl PushGateway for ApnsClient {
    async fn send_wake(&self, push_token: &str) -> SyncResult<()> {
        let url = format!("{}/3/device/{}", self.base_url, push_token);
        let mut request = self
            .client
            .post(&url)
            .header("apns-topic", &self.topic)
            .header("apns-push-type", "background")
            .header("apns-priority", "5")
            .json(&serde_json::json!({}));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| transport_error("apns", e))?;
        let status = resp.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "apns wake accepted");
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error("apns", status, &body))
    }
}
