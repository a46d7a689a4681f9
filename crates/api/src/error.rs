use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use stampsync_core::SyncError;
use tracing::error;

use crate::state::RequestId;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    RateLimited,
    Unavailable,
    Internal,
}

#[derive(Debug)]
pub struct ApiError {
    pub error: AppError,
    pub request_id: String,
}

impl AppError {
    pub fn with_request_id(self, request_id: &str) -> ApiError {
        ApiError {
            error: self,
            request_id: request_id.to_string(),
        }
    }
}

impl RequestId {
    pub fn reject(&self, err: impl Into<AppError>) -> ApiError {
        err.into().with_request_id(&self.0)
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            SyncError::InvariantViolation(msg) => AppError::Conflict(msg),
            SyncError::DuplicateCallback(nonce) => {
                AppError::Conflict(format!("callback {} already processed", nonce))
            }
            SyncError::RateLimited => AppError::RateLimited,
            err if err.is_transient() => {
                error!(error = %err, "transient failure");
                AppError::Unavailable
            }
            err => {
                error!(error = %err, "request failed");
                AppError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match self.error {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests".to_string(),
            ),
            AppError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "Temporarily unavailable, retry later".to_string(),
            ),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Unexpected error".to_string(),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody {
                    code: code.to_string(),
                    message,
                    request_id: self.request_id,
                },
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use std::time::Duration;

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    fn render(err: ApiError) -> (StatusCode, serde_json::Value) {
        rt().block_on(async {
            let response = err.into_response();
            let status = response.status();
            let body = to_bytes(response.into_body(), 4096).await.unwrap();
            (status, serde_json::from_slice(&body).unwrap())
        })
    }

    #[test]
    fn test_with_request_id() {
        let err = AppError::Internal.with_request_id("req_123");
        assert_eq!(err.request_id, "req_123");
    }

    #[test]
    fn test_reject_through_request_id() {
        let id = RequestId("req_abc".to_string());
        let err = id.reject(AppError::BadRequest("missing nonce".to_string()));
        assert_eq!(err.request_id, "req_abc");
    }

    #[test]
    fn test_bad_request_response() {
        let (status, json) =
            render(AppError::BadRequest("missing field".to_string()).with_request_id("req_001"));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_request");
        assert_eq!(json["error"]["message"], "missing field");
        assert_eq!(json["error"]["request_id"], "req_001");
    }

    #[test]
    fn test_not_found_from_sync_error() {
        let err = AppError::from(SyncError::NotFound("design des_1".to_string()));
        let (status, json) = render(err.with_request_id("req_002"));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
        assert_eq!(json["error"]["message"], "design des_1 not found");
    }

    #[test]
    fn test_invariant_violation_is_conflict() {
        let err = AppError::from(SyncError::InvariantViolation(
            "stamp count 9 outside 0..=8".to_string(),
        ));
        let (status, json) = render(err.with_request_id("req_003"));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["message"], "stamp count 9 outside 0..=8");
    }

    #[test]
    fn test_transient_errors_are_unavailable() {
        for err in [
            SyncError::Storage("pool timed out".to_string()),
            SyncError::Timeout(Duration::from_secs(30)),
            SyncError::TransientRemote("502".to_string()),
        ] {
            let (status, json) = render(AppError::from(err).with_request_id("req_004"));
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(json["error"]["code"], "unavailable");
        }
    }

    #[test]
    fn test_internal_error_hides_detail() {
        let err = AppError::from(SyncError::Config("google private key: bad pem".to_string()));
        let (status, json) = render(err.with_request_id("req_005"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["message"], "Unexpected error");
    }

    #[test]
    fn test_unauthorized_response() {
        let (status, json) =
            render(AppError::Unauthorized("invalid signature".to_string()).with_request_id("req_006"));
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "unauthorized");
        assert_eq!(json["error"]["message"], "invalid signature");
    }
}
