//! services/api/src/web/envelope.rs
//!
//! The JSON envelope every response is wrapped in, success or failure.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultType {
    Success,
    Error,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SuccessBody<T> {
    pub data: T,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `NOT_FOUND`.
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub result_type: ResultType,
    pub success: Option<SuccessBody<T>>,
    pub error: Option<ErrorBody>,
    pub meta: Meta,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            result_type: ResultType::Success,
            success: Some(SuccessBody { data }),
            error: None,
            meta: Meta { timestamp: Utc::now() },
        }
    }
}

impl Envelope<()> {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            result_type: ResultType::Error,
            success: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message: message.into(),
            }),
            meta: Meta { timestamp: Utc::now() },
        }
    }
}

/// A handler's successful payload; serialised inside a SUCCESS envelope.
pub struct ApiSuccess<T>(pub StatusCode, pub T);

impl<T> ApiSuccess<T> {
    pub fn ok(data: T) -> Self {
        Self(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Self {
        Self(StatusCode::CREATED, data)
    }
}

impl<T: Serialize> IntoResponse for ApiSuccess<T> {
    fn into_response(self) -> Response {
        (self.0, Json(Envelope::success(self.1))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope_shape() {
        let value = serde_json::to_value(Envelope::success(json!({"id": 3}))).unwrap();

        assert_eq!(value["resultType"], "SUCCESS");
        assert_eq!(value["success"]["data"]["id"], 3);
        assert!(value["error"].is_null());
        assert!(value["meta"]["timestamp"].is_string());
    }

    #[test]
    fn error_envelope_shape() {
        let value = serde_json::to_value(Envelope::error("NOT_FOUND", "gone")).unwrap();

        assert_eq!(value["resultType"], "ERROR");
        assert!(value["success"].is_null());
        assert_eq!(value["error"]["code"], "NOT_FOUND");
        assert_eq!(value["error"]["message"], "gone");
    }
}
