use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::{
    error::{ApiError, AppError},
    state::{AppState, RequestId},
};

/// Guards the internal event endpoints with the shared bearer token.
pub async fn internal_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .cloned()
        .unwrap_or_else(|| RequestId(String::new()));

    let Some(expected) = state.auth.internal_token.as_deref() else {
        return Err(request_id.reject(AppError::Unauthorized(
            "internal endpoints are disabled".to_string(),
        )));
    };

    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| {
            request_id.reject(AppError::Unauthorized(
                "missing authorization header".to_string(),
            ))
        })?;
    let token = parse_scheme(header_value, "Bearer").map_err(|e| request_id.reject(e))?;

    if !constant_time_eq(token, expected) {
        return Err(request_id.reject(AppError::Unauthorized("invalid token".to_string())));
    }
    Ok(next.run(req).await)
}

/// Token from an `ApplePass <token>` header, as sent by Wallet on device
/// (un)registration.
pub fn apple_pass_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("missing authorization header".to_string()))?;
    parse_scheme(value, "ApplePass")
}

fn parse_scheme<'a>(value: &'a HeaderValue, scheme: &str) -> Result<&'a str, AppError> {
    let value = value
        .to_str()
        .map_err(|_| AppError::Unauthorized("invalid authorization header".to_string()))?;
    let mut parts = value.splitn(2, ' ');
    let presented = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if presented != scheme || token.is_empty() {
        return Err(AppError::Unauthorized(
            "invalid authorization header".to_string(),
        ));
    }
    Ok(token)
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_apple_pass_token() {
        assert_eq!(apple_pass_token(&headers("ApplePass abc123")).unwrap(), "abc123");
    }

    #[test]
    fn test_apple_pass_rejects_other_schemes() {
        assert!(apple_pass_token(&headers("Bearer abc123")).is_err());
        assert!(apple_pass_token(&headers("ApplePass ")).is_err());
        assert!(apple_pass_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secret-longer"));
    }
}
