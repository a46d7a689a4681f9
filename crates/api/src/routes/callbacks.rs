use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use stampsync_core::auth::{
    timestamp_is_fresh, verify_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use stampsync_core::types::{customer_id_from_object, CallbackAction};
use stampsync_core::SyncError;
use tracing::{debug, error, info, warn};

use crate::{
    error::{ApiError, ApiResult, AppError},
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/google/callback", post(google_callback))
        .with_state(state)
}

/// Save/delete notification posted by Google Wallet.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleCallbackRequest {
    event_type: Option<String>,
    object_id: Option<String>,
    class_id: Option<String>,
    nonce: Option<String>,
    exp_time_millis: Option<i64>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct CallbackResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<CallbackAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl CallbackResponse {
    fn ignored(message: &str) -> Json<Self> {
        Json(Self {
            status: "ignored",
            action: None,
            message: Some(message.to_string()),
        })
    }
}

async fn google_callback(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<CallbackResponse>> {
    if let Some(secret) = state.auth.callback_secret.as_deref() {
        verify_callback(secret, &headers, &body, state.sync.clock.now().timestamp())
            .map_err(|e| request_id.reject(e))?;
    }

    let payload: GoogleCallbackRequest = serde_json::from_slice(&body).map_err(|e| {
        request_id.reject(AppError::BadRequest(format!("invalid callback payload: {}", e)))
    })?;

    let (Some(nonce), Some(object_id)) = (payload.nonce.as_deref(), payload.object_id.as_deref())
    else {
        debug!(request_id = %request_id.0, "callback without nonce or objectId");
        return Ok(CallbackResponse::ignored("nonce and objectId are required"));
    };
    let event_type = payload.event_type.as_deref().unwrap_or_default();

    let Some(customer_id) = customer_id_from_object(object_id) else {
        return Ok(CallbackResponse::ignored("objectId has no customer part"));
    };
    if CallbackAction::from_event_type(event_type) == CallbackAction::Register {
        match state.sync.designs.get_customer(customer_id).await {
            Ok(_) => {}
            Err(SyncError::NotFound(_)) => {
                info!(object_id, customer_id, "callback for unknown customer");
                return Ok(CallbackResponse::ignored("customer not found"));
            }
            Err(err) => return Err(internal(&request_id, err)),
        }
    }

    debug!(
        nonce,
        object_id,
        class_id = payload.class_id.as_deref().unwrap_or_default(),
        exp_time_millis = payload.exp_time_millis,
        "google callback received"
    );

    let result = state
        .sync
        .callbacks
        .process(nonce, event_type, object_id)
        .await
        .map_err(|e| internal(&request_id, e))?;

    if result.already_processed {
        return Ok(Json(CallbackResponse {
            status: "duplicate",
            action: None,
            message: None,
        }));
    }
    Ok(Json(CallbackResponse {
        status: "ok",
        action: Some(result.action),
        message: None,
    }))
}

/// Any failure after the nonce is claimed asks the provider to retry.
fn internal(request_id: &RequestId, err: SyncError) -> ApiError {
    error!(request_id = %request_id.0, error = %err, "callback processing failed");
    request_id.reject(AppError::Internal)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(format!("missing {} header", name)))
}

fn verify_callback(secret: &str, headers: &HeaderMap, body: &[u8], now: i64) -> Result<(), AppError> {
    let signature = header_str(headers, SIGNATURE_HEADER)?;
    let timestamp: i64 = header_str(headers, TIMESTAMP_HEADER)?
        .parse()
        .map_err(|_| AppError::Unauthorized("invalid timestamp".to_string()))?;

    if !timestamp_is_fresh(timestamp, now) {
        warn!(timestamp, now, "stale callback timestamp");
        return Err(AppError::Unauthorized("stale timestamp".to_string()));
    }
    let body = std::str::from_utf8(body)
        .map_err(|_| AppError::BadRequest("callback body is not utf-8".to_string()))?;
    if !verify_signature(secret, timestamp, body, signature) {
        return Err(AppError::Unauthorized("invalid signature".to_string()));
    }
    Ok(())
}
