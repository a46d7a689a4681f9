use async_trait::async_trait;
use serde::Serialize;
use stampsync_core::ports::Renderer;
use stampsync_core::types::{Design, DesignStyle, Platform, Resolution};
use stampsync_core::{SyncError, SyncResult};

use crate::{status_error, transport_error};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest<'a> {
    design_id: &'a str,
    total_stamps: i32,
    style: &'a DesignStyle,
    stamp_count: i32,
    platform: Platform,
    resolution: Resolution,
}

/// Client for the strip render service. It answers each request with the
/// PNG bytes of one strip.
#[derive(Clone)]
pub struct HttpRenderer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRenderer {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/render/strip", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(
        &self,
        design: &Design,
        stamp_count: i32,
        platform: Platform,
        resolution: Resolution,
    ) -> SyncResult<Vec<u8>> {
        let payload = RenderRequest {
            design_id: &design.id,
            total_stamps: design.total_stamps,
            style: &design.style,
            stamp_count,
            platform,
            resolution,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .header("Accept", "image/png")
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error("render service", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error("render service", status, &body));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| transport_error("render service", e))?;
        if bytes.is_empty() {
            return Err(SyncError::TransientRemote(
                "render service returned an empty image".to_string(),
            ));
        }
        Ok(bytes.to_vec())
    }
}
