pub mod callbacks;
pub mod devices;
pub mod events;
pub mod health;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    Router,
};

use crate::middleware::{auth::internal_auth, metrics::metrics, request_id::request_id};
use crate::state::AppState;

/// Full HTTP surface. Request ids are assigned outermost so every error
/// body, auth failures included, carries one.
pub fn app(state: AppState) -> Router {
    let internal = events::router(state.clone())
        .layer(from_fn_with_state(state.clone(), internal_auth));

    Router::new()
        .merge(health::router(state.clone()))
        .merge(callbacks::router(state.clone()))
        .merge(devices::router(state))
        .merge(internal)
        .layer(from_fn(metrics))
        .layer(from_fn(request_id))
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
