//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and its mapping
//! onto HTTP responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use newsgenie_core::ports::PortError;
use tracing::error;

use crate::config::ConfigError;
use crate::web::envelope::Envelope;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from the core.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure to apply the schema at startup.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// Status, error code and optional `Retry-After` seconds for one error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClass {
    pub status: StatusCode,
    pub code: &'static str,
    pub retry_after: Option<u32>,
}

impl ErrorClass {
    const fn new(status: StatusCode, code: &'static str, retry_after: Option<u32>) -> Self {
        Self {
            status,
            code,
            retry_after,
        }
    }
}

const INTERNAL: ErrorClass = ErrorClass::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", None);

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        let ApiError::Port(port) = self else {
            return INTERNAL;
        };
        match port {
            PortError::Validation(_) => ErrorClass::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", None),
            PortError::Unauthorized => ErrorClass::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", None),
            PortError::NotFound(_) => ErrorClass::new(StatusCode::NOT_FOUND, "NOT_FOUND", None),
            PortError::ConcurrencyConflict(_) | PortError::Duplicate(_) => {
                ErrorClass::new(StatusCode::CONFLICT, "CONFLICT", Some(1))
            }
            PortError::JsonContract(_) => ErrorClass::new(StatusCode::BAD_GATEWAY, "JSON_CONTRACT_VIOLATION", None),
            PortError::UpstreamUnavailable(_) => {
                ErrorClass::new(StatusCode::SERVICE_UNAVAILABLE, "UPSTREAM_UNAVAILABLE", Some(5))
            }
            PortError::UpstreamTimeout(_) => ErrorClass::new(StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT", Some(5)),
            PortError::Unexpected(_) => INTERNAL,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let class = self.class();
        let message = match &self {
            ApiError::Port(PortError::Unauthorized) => "Missing or invalid x-user-id header".to_string(),
            ApiError::Port(port) if class != INTERNAL => port.to_string(),
            _ => {
                error!(error = %self, "request failed");
                "An internal error occurred".to_string()
            }
        };

        let mut response = (class.status, Json(Envelope::error(class.code, message))).into_response();
        if let Some(seconds) = class.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}
