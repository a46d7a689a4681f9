//! HTTP clients for the remote services the sync core talks to.

pub mod apns;
pub mod google;
pub mod render;
pub mod storage;

pub use apns::ApnsClient;
pub use google::{GoogleWalletClient, SaveTokenSigner};
pub use render::HttpRenderer;
pub use storage::HttpObjectStorage;

use reqwest::StatusCode;
use stampsync_core::{SyncError, SyncResult};
use std::time::Duration;

pub fn http_client(timeout: Duration) -> SyncResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SyncError::Config(format!("http client: {}", e)))
}

/// 5xx and 429 are worth retrying, any other 4xx is not.
pub(crate) fn status_error(service: &str, status: StatusCode, body: &str) -> SyncError {
    let detail = format!("{} returned HTTP {}: {}", service, status.as_u16(), truncate(body, 200));
    if status == StatusCode::NOT_FOUND {
        SyncError::NotFound(detail)
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        SyncError::TransientRemote(detail)
    } else {
        SyncError::RemoteRejected(detail)
    }
}

pub(crate) fn transport_error(service: &str, err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::TransientRemote(format!("{} timed out: {}", service, err))
    } else {
        SyncError::TransientRemote(format!("{} unreachable: {}", service, err))
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            status_error("x", StatusCode::SERVICE_UNAVAILABLE, ""),
            SyncError::TransientRemote(_)
        ));
        assert!(matches!(
            status_error("x", StatusCode::TOO_MANY_REQUESTS, ""),
            SyncError::TransientRemote(_)
        ));
        assert!(matches!(
            status_error("x", StatusCode::NOT_FOUND, ""),
            SyncError::NotFound(_)
        ));
        assert!(matches!(
            status_error("x", StatusCode::BAD_REQUEST, ""),
            SyncError::RemoteRejected(_)
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
