//! Billing error types

use rust_decimal::Decimal;
use thiserror::Error;

/// Billing-specific errors
///
/// Every variant except `Database` and `Internal` is a business-rule
/// rejection: the caller should show it to the user rather than retry.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient wallet balance: required {required}, available {available} (short by {shortfall})")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
        shortfall: Decimal,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("No change: {0}")]
    NoOp(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Page number whose row offset does not fit in an `i64`
    pub fn page_out_of_range(page: i64) -> Self {
        BillingError::InvalidInput(format!("Page {} is out of range", page))
    }

    /// Build an `InsufficientBalance` error, computing the shortfall
    pub fn insufficient_balance(required: Decimal, available: Decimal) -> Self {
        BillingError::InsufficientBalance {
            required,
            available,
            shortfall: (required - available).max(Decimal::ZERO),
        }
    }

    /// Store/infrastructure failures (the only kinds worth retrying)
    pub fn is_internal(&self) -> bool {
        matches!(self, BillingError::Database(_) | BillingError::Internal(_))
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::NotFound(_) => "NOT_FOUND",
            BillingError::Conflict(_) => "CONFLICT",
            BillingError::InvalidInput(_) => "INVALID_INPUT",
            BillingError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            BillingError::InvalidState(_) => "INVALID_STATE",
            BillingError::Forbidden(_) => "FORBIDDEN",
            BillingError::NoOp(_) => "NO_CHANGE",
            BillingError::Database(_) => "DATABASE_ERROR",
            BillingError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// PostgreSQL unique_violation
const PG_UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(PG_UNIQUE_VIOLATION) => {
                BillingError::Conflict(db_err.message().to_string())
            }
            _ => BillingError::Database(err.to_string()),
        }
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
