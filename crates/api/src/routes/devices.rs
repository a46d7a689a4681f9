//! Wallet's pass web service callbacks for device (un)registration.
//!
//! The serial number of every pass is the customer id; the push token a
//! device sends here is the handle the Apple adapter wakes.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use stampsync_core::auth::verify_pass_token;
use stampsync_core::types::Platform;
use tracing::{info, warn};

use crate::{
    error::{ApiResult, AppError},
    middleware::auth::apple_pass_token,
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/devices/{device_library_id}/registrations/{pass_type_id}/{serial_number}",
            post(register_device).delete(unregister_device),
        )
        .route("/v1/log", post(receive_logs))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct DevicePath {
    device_library_id: String,
    pass_type_id: String,
    serial_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterDeviceRequest {
    push_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogRequest {
    #[serde(default)]
    logs: Vec<JsonValue>,
}

async fn register_device(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(path): Path<DevicePath>,
    headers: HeaderMap,
    Json(payload): Json<RegisterDeviceRequest>,
) -> ApiResult<StatusCode> {
    authorize(&state, &path, &headers).map_err(|e| request_id.reject(e))?;

    let push_token = payload
        .push_token
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| request_id.reject(AppError::BadRequest("pushToken required".to_string())))?;

    let created = state
        .sync
        .registry
        .register_device(
            &path.serial_number,
            Platform::Apple,
            &push_token,
            Some(&path.device_library_id),
        )
        .await
        .map_err(|e| request_id.reject(e))?;

    info!(
        customer_id = %path.serial_number,
        device_library_id = %path.device_library_id,
        created,
        "apple device registered"
    );
    Ok(if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    })
}

async fn unregister_device(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(path): Path<DevicePath>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    authorize(&state, &path, &headers).map_err(|e| request_id.reject(e))?;

    let removed = state
        .sync
        .registry
        .unregister_device(&path.serial_number, &path.device_library_id)
        .await
        .map_err(|e| request_id.reject(e))?;
    if !removed {
        info!(
            customer_id = %path.serial_number,
            device_library_id = %path.device_library_id,
            "unregister for unknown device"
        );
    }
    Ok(StatusCode::OK)
}

async fn receive_logs(Json(payload): Json<LogRequest>) -> StatusCode {
    for entry in payload.logs {
        warn!(entry = %entry, "wallet device log");
    }
    StatusCode::OK
}

fn authorize(state: &AppState, path: &DevicePath, headers: &HeaderMap) -> Result<(), AppError> {
    if path.pass_type_id != state.auth.pass_type_id {
        return Err(AppError::NotFound(format!(
            "pass type {} not served here",
            path.pass_type_id
        )));
    }
    let Some(secret) = state.auth.pass_auth_secret.as_deref() else {
        return Err(AppError::Unauthorized(
            "pass authentication is not configured".to_string(),
        ));
    };
    let token = apple_pass_token(headers)?;
    if !verify_pass_token(secret, &path.serial_number, token) {
        return Err(AppError::Unauthorized("invalid authentication".to_string()));
    }
    Ok(())
}
