use axum::{body::Body, http::Request, middleware::Next, response::Response};
use stampsync_core::metrics::METRICS;

pub async fn metrics(req: Request<Body>, next: Next) -> Response {
    let resp = next.run(req).await;
    METRICS.record_http_response(resp.status().as_u16());
    resp
}
