//! JSON error responses for the HTTP boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SandpitError;

const GONE_MESSAGE: &str =
    "The sandbox session has expired or stopped. You need to create a new sandbox to continue.";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("No active sandbox. Please create a new sandbox first.")]
    NoActiveSandbox,

    /// The sandbox was reclaimed; the caller must recreate it
    #[error("Sandbox has stopped. Please create a new sandbox.")]
    Gone,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl From<SandpitError> for ApiError {
    fn from(e: SandpitError) -> Self {
        match e {
            SandpitError::NoActiveSandbox | SandpitError::ProviderTerminated => {
                ApiError::NoActiveSandbox
            }
            SandpitError::SandboxExpired { .. } => ApiError::Gone,
            SandpitError::Unsupported { .. } => ApiError::Unsupported(e.to_string()),
            SandpitError::FileRead { .. } => ApiError::NotFound(e.to_string()),
            SandpitError::SandboxTimeout { .. } => ApiError::Timeout(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_recreation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) | ApiError::NoActiveSandbox => StatusCode::BAD_REQUEST,
            ApiError::Gone => StatusCode::GONE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error = self.to_string();
        match &self {
            ApiError::Internal(_) => tracing::error!(status = %status, error = %error, "Server error"),
            _ => tracing::warn!(status = %status, error = %error, "Client error"),
        }

        let gone = matches!(self, ApiError::Gone);
        let body = ErrorResponse {
            success: false,
            error,
            needs_recreation: gone,
            message: gone.then(|| GONE_MESSAGE.to_string()),
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            ApiError::from(SandpitError::NoActiveSandbox),
            ApiError::NoActiveSandbox
        ));
        assert!(matches!(
            ApiError::from(SandpitError::SandboxExpired {
                sandbox_id: "sbx".to_string()
            }),
            ApiError::Gone
        ));
        assert!(matches!(
            ApiError::from(SandpitError::Provisioning("denied".to_string())),
            ApiError::Internal(_)
        ));
    }

    #[tokio::test]
    async fn test_gone_body() {
        let response = ApiError::Gone.into_response();
        assert_eq!(response.status(), StatusCode::GONE);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["needsRecreation"], true);
        assert!(json["message"].is_string());
    }

    #[tokio::test]
    async fn test_bad_request_omits_recreation_flag() {
        let response = ApiError::BadRequest("Command is required".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Command is required");
        assert!(json.get("needsRecreation").is_none());
    }
}
