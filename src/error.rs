use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::users::repo::StoreError;

/// Errors surfaced to API callers through the error envelope.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Internal(String),

    #[error("unexpected error: {0:#}")]
    Unexpected(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to clients.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Unexpected(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Invalid(msg) => AppError::Validation(msg),
            StoreError::Backend(e) => AppError::Unexpected(e),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub status_code: u16,
    pub message: String,
    pub success: bool,
    pub errors: Vec<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AppError::Internal(_) | AppError::Unexpected(_) => error!(error = %self, "request failed"),
            AppError::Unauthorized(_) | AppError::Conflict(_) => warn!(%status, error = %self, "request rejected"),
            _ => debug!(%status, error = %self, "request rejected"),
        }

        let body = ErrorEnvelope {
            status_code: status.as_u16(),
            message: self.client_message(),
            success: false,
            errors: Vec::new(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn envelope_carries_status_and_message() {
        let res = AppError::unauthorized("invalid old password").into_response();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["statusCode"], 401);
        assert_eq!(json["message"], "invalid old password");
        assert_eq!(json["success"], false);
        assert_eq!(json["errors"], serde_json::json!([]));
    }

    #[test]
    fn unexpected_errors_hide_details() {
        let err = AppError::from(anyhow::anyhow!("connection refused to 10.0.0.3"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.client_message(), "internal server error");
    }

    #[test]
    fn store_conflict_maps_to_409() {
        let err = AppError::from(StoreError::Conflict("email already exists".into()));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
