use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::quota::features::LimitConfigError;
use crate::quota::service::QuotaError;
use crate::quota::store::StoreError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Daily limit reached for {feature}")]
    QuotaExceeded {
        feature: String,
        resets_at: Option<DateTime<Utc>>,
    },

    #[error("Quota store error: {0}")]
    Store(#[from] StoreError),
}

impl From<QuotaError> for AppError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::Config(LimitConfigError::UnknownFeature(name)) => {
                AppError::NotFound(format!("Unknown feature '{name}'"))
            }
            QuotaError::Config(other) => AppError::NotFound(other.to_string()),
            QuotaError::Store(e) => AppError::Store(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::QuotaExceeded { feature, resets_at } => {
                let message = match resets_at {
                    Some(at) => format!(
                        "Daily limit reached for {feature}. Try again after {}",
                        at.to_rfc3339()
                    ),
                    None => format!("Daily limit reached for {feature}"),
                };
                (StatusCode::TOO_MANY_REQUESTS, "QUOTA_EXCEEDED", message)
            }
            AppError::Store(e) => {
                tracing::error!("Quota store error: {e}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "QUOTA_STORE_UNAVAILABLE",
                    "Usage information is temporarily unavailable".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
