use async_trait::async_trait;
use reqwest::StatusCode;
use stampsync_core::ports::ObjectStorage;
use stampsync_core::SyncResult;
use tracing::debug;

use crate::{status_error, transport_error};

/// Bucket-style object storage over plain HTTP: `PUT` writes, `DELETE`
/// removes, objects are publicly readable at the same URL.
#[derive(Clone)]
pub struct HttpObjectStorage {
    client: reqwest::Client,
    bucket_url: String,
    token: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(client: reqwest::Client, base_url: &str, bucket: &str, token: Option<String>) -> Self {
        Self {
            client,
            bucket_url: format!("{}/{}", base_url.trim_end_matches('/'), bucket.trim_matches('/')),
            token,
        }
    }

    pub fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.bucket_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> SyncResult<String> {
        let url = self.public_url(path);
        let resp = self
            .authorize(self.client.put(&url))
            .header("Content-Type", content_type)
            .header("Cache-Control", "public, max-age=31536000, immutable")
            .body(bytes)
            .send()
            .await
            .map_err(|e| transport_error("object storage", e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error("object storage", status, &body));
        }
        Ok(url)
    }

    async fn delete(&self, paths: &[String]) -> SyncResult<()> {
        for path in paths {
            let resp = self
                .authorize(self.client.delete(self.public_url(path)))
                .send()
                .await
                .map_err(|e| transport_error("object storage", e))?;
            let status = resp.status();
            if status == StatusCode::NOT_FOUND {
                debug!(path = %path, "artifact already gone");
                continue;
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(status_error("object storage", status, &body));
            }
        }
        Ok(())
    }
}
