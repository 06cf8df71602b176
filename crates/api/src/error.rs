//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use teamwallet_billing::BillingError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Authentication required")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Resource errors
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NoChange(String),
    #[error("{0}")]
    InvalidState(String),

    // Billing errors
    #[error("Insufficient wallet balance")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
        shortfall: Decimal,
    },

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),

            // Resources
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::NoChange(msg) => (StatusCode::CONFLICT, "NO_CHANGE", msg.clone()),
            ApiError::InvalidState(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_STATE", msg.clone()),

            // Billing
            ApiError::InsufficientBalance { .. } => (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_BALANCE", self.to_string()),

            // Internal (details stay in the logs)
            ApiError::Database(detail) => {
                tracing::error!(error = %detail, "Database error while handling request");
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string())
            }
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error while handling request");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error".to_string())
            }
        };

        let mut error = json!({
            "code": code,
            "message": message,
        });

        if let ApiError::InsufficientBalance {
            required,
            available,
            shortfall,
        } = &self
        {
            error["details"] = json!({
                "required": required.to_string(),
                "available": available.to_string(),
                "shortfall": shortfall.to_string(),
            });
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::NotFound(msg) => ApiError::NotFound(msg),
            BillingError::Conflict(msg) => ApiError::Conflict(msg),
            BillingError::InvalidInput(msg) => ApiError::Validation(msg),
            BillingError::InsufficientBalance {
                required,
                available,
                shortfall,
            } => ApiError::InsufficientBalance {
                required,
                available,
                shortfall,
            },
            BillingError::InvalidState(msg) => ApiError::InvalidState(msg),
            BillingError::Forbidden(msg) => ApiError::Forbidden(msg),
            BillingError::NoOp(msg) => ApiError::NoChange(msg),
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
