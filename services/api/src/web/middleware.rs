//! services/api/src/web/middleware.rs
//!
//! Caller identification and request-id middleware.

use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use newsgenie_core::ports::PortError;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// The numeric user id taken from the `x-user-id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub i64);

/// Middleware that validates the `x-user-id` header.
///
/// If valid, inserts the `UserId` into request extensions for handlers to use.
/// If invalid or missing, answers 401 with the error envelope.
pub async fn require_user(mut req: Request, next: Next) -> Response {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|id| *id > 0);

    match user_id {
        Some(id) => {
            req.extensions_mut().insert(UserId(id));
            next.run(req).await
        }
        None => ApiError::Port(PortError::Unauthorized).into_response(),
    }
}

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserId>()
            .copied()
            .ok_or(ApiError::Port(PortError::Unauthorized))
    }
}

/// Tags every request with a fresh id, records it on a span and echoes it back.
pub async fn request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path()
    );

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}
