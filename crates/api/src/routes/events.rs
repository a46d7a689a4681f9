//! Domain events from the loyalty backend. Each endpoint is called after
//! the backend committed its own write and only drives wallet sync.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use stampsync_core::coordinator::{ActivationReport, DesignUpdate, RegenerationReport};
use stampsync_core::types::{
    Business, CacheSummary, Customer, Design, DesignStyle, PlatformOutcomes, WalletReferences,
};
use stampsync_core::SyncResult;
use tracing::info;

use crate::{
    error::{ApiResult, AppError},
    state::{AppState, RequestId},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/internal/customers/{id}/created", post(customer_created))
        .route("/internal/customers/{id}/stamps", post(stamps_changed))
        .route("/internal/designs/{id}/created", post(design_created))
        .route("/internal/designs/{id}/updated", post(design_updated))
        .route("/internal/designs/{id}/activate", post(design_activate))
        .route("/internal/designs/{id}/regenerate", post(design_regenerate))
        .route("/internal/designs/{id}", delete(design_deleted))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct StampsChangedRequest {
    stamps: i32,
}

/// Rendering inputs of the design as they were before the edit.
#[derive(Debug, Deserialize)]
struct DesignUpdatedRequest {
    previous_total_stamps: i32,
    previous_style: DesignStyle,
}

#[derive(Debug, Serialize)]
struct DesignUpdatedResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<RegenerationReport>,
}

#[derive(Debug, Serialize)]
struct DesignDeletedResponse {
    design_id: String,
    removed_strips: usize,
}

async fn load_customer(state: &AppState, id: &str) -> SyncResult<(Customer, Business, Option<Design>)> {
    let designs = &state.sync.designs;
    let customer = designs.get_customer(id).await?;
    let business = designs.get_business(&customer.business_id).await?;
    let design = designs.get_active_design(&business.id).await?;
    Ok((customer, business, design))
}

async fn load_design(state: &AppState, id: &str) -> SyncResult<(Business, Design)> {
    let designs = &state.sync.designs;
    let design = designs.get_design(id).await?;
    let business = designs.get_business(&design.business_id).await?;
    Ok((business, design))
}

fn no_active_design(business: &Business) -> AppError {
    AppError::Conflict(format!("business {} has no active design", business.id))
}

async fn customer_created(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<WalletReferences>> {
    let (customer, business, design) = load_customer(&state, &id)
        .await
        .map_err(|e| request_id.reject(e))?;
    let design = design.ok_or_else(|| request_id.reject(no_active_design(&business)))?;

    let references = state
        .sync
        .coordinator
        .on_customer_created(&customer, &business, &design)
        .await
        .map_err(|e| request_id.reject(e))?;
    Ok(Json(references))
}

/// Always 200 once the input is valid: platform failures are reported in
/// the outcomes, never as an error status.
async fn stamps_changed(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    Json(payload): Json<StampsChangedRequest>,
) -> ApiResult<Json<PlatformOutcomes>> {
    let (customer, business, design) = load_customer(&state, &id)
        .await
        .map_err(|e| request_id.reject(e))?;
    let design = design.ok_or_else(|| request_id.reject(no_active_design(&business)))?;

    let outcomes = state
        .sync
        .coordinator
        .on_stamp_changed(&customer, &business, &design, payload.stamps)
        .await
        .map_err(|e| request_id.reject(e))?;
    Ok(Json(outcomes))
}

async fn design_created(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<CacheSummary>> {
    let (business, design) = load_design(&state, &id)
        .await
        .map_err(|e| request_id.reject(e))?;
    let summary = state
        .sync
        .coordinator
        .on_design_created(&business, &design)
        .await
        .map_err(|e| request_id.reject(e))?;
    Ok(Json(summary))
}

async fn design_updated(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
    Json(payload): Json<DesignUpdatedRequest>,
) -> ApiResult<(StatusCode, Json<DesignUpdatedResponse>)> {
    let (business, after) = load_design(&state, &id)
        .await
        .map_err(|e| request_id.reject(e))?;
    let mut before = after.clone();
    before.total_stamps = payload.previous_total_stamps;
    before.style = payload.previous_style;

    let update = state
        .sync
        .coordinator
        .on_design_updated(&business, &before, &after)
        .await
        .map_err(|e| request_id.reject(e))?;

    let (status, body) = match update {
        DesignUpdate::Unchanged => (StatusCode::OK, ("unchanged", None)),
        DesignUpdate::Regenerated(report) => (StatusCode::OK, ("regenerated", Some(report))),
        DesignUpdate::Scheduled(ticket) => {
            // the ticket is dropped; the regeneration keeps running
            info!(design_id = %ticket.design_id, "regeneration accepted");
            (StatusCode::ACCEPTED, ("scheduled", None))
        }
        DesignUpdate::AlreadyRegenerating => (StatusCode::ACCEPTED, ("already_regenerating", None)),
    };
    Ok((
        status,
        Json(DesignUpdatedResponse {
            status: body.0,
            report: body.1,
        }),
    ))
}

async fn design_activate(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<ActivationReport>> {
    let (business, design) = load_design(&state, &id)
        .await
        .map_err(|e| request_id.reject(e))?;
    let report = state
        .sync
        .coordinator
        .on_design_activated(&business, &design)
        .await
        .map_err(|e| request_id.reject(e))?;
    Ok(Json(report))
}

async fn design_regenerate(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<RegenerationReport>> {
    let report = state
        .sync
        .coordinator
        .retry_regeneration(&id)
        .await
        .map_err(|e| request_id.reject(e))?;
    Ok(Json(report))
}

async fn design_deleted(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<DesignDeletedResponse>> {
    let (business, design) = load_design(&state, &id)
        .await
        .map_err(|e| request_id.reject(e))?;
    let removed_strips = state
        .sync
        .coordinator
        .on_design_deleted(&business, &design)
        .await
        .map_err(|e| request_id.reject(e))?;
    Ok(Json(DesignDeletedResponse {
        design_id: design.id,
        removed_strips,
    }))
}
