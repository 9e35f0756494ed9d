use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid {field}: {message}")]
    BadField { field: &'static str, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid payment amount: {0}")]
    InvalidAmount(i64),

    #[error("Invalid quantity {quantity} for '{product}': serialized lines sell exactly one unit")]
    InvalidQuantity { product: String, quantity: i64 },

    #[error("Payment of {amount} exceeds remaining amount {remaining}")]
    OverPayment { amount: i64, remaining: i64 },

    #[error("Insufficient stock for '{product}': {available} available, {requested} requested")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    #[error("Variant not found: {0}")]
    VariantNotFound(String),

    #[error("Variant already sold: {0}")]
    VariantAlreadySold(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        // SQLITE_BUSY: another writer held the lock past the busy timeout.
        // That is contention, not infrastructure failure.
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some("5") {
                return AppError::Conflict("database busy, retry the operation".to_string());
            }
        }
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl AppError {
    /// Stable label used for the error counter metric.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "validation",
            AppError::BadField { .. } => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden(_) => "forbidden",
            AppError::InvalidAmount(_) => "invalid_amount",
            AppError::InvalidQuantity { .. } => "invalid_quantity",
            AppError::OverPayment { .. } => "over_payment",
            AppError::InsufficientStock { .. } => "insufficient_stock",
            AppError::VariantNotFound(_) => "variant_not_found",
            AppError::VariantAlreadySold(_) => "variant_already_sold",
            AppError::Conflict(_) => "conflict",
            AppError::DatabaseError(_) => "database",
            AppError::ConfigError(_) => "config",
        }
    }
}

/// Whether a sqlx error is a unique-constraint violation, used by the number
/// allocation retry loop.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Classify the failure of a numbered insert. Losing the number to a
/// concurrent writer is a conflict the caller can retry, not an
/// infrastructure failure.
pub fn number_collision(err: sqlx::Error, number: &str) -> AppError {
    if is_unique_violation(&err) {
        return AppError::Conflict(format!("invoice number {} already taken", number));
    }
    AppError::from(err)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let (status, error_message, details) = match &self {
            AppError::ValidationError(err) => (
                StatusCode::BAD_REQUEST,
                "Validation error".to_string(),
                Some(err.to_string()),
            ),
            AppError::BadField { .. }
            | AppError::InvalidAmount(_)
            | AppError::InvalidQuantity { .. }
            | AppError::OverPayment { .. }
            | AppError::InsufficientStock { .. }
            | AppError::VariantNotFound(_)
            | AppError::VariantAlreadySold(_) => {
                (StatusCode::BAD_REQUEST, self.to_string(), None)
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string(), None),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string(), None),
            AppError::Conflict(_) => (StatusCode::CONFLICT, self.to_string(), None),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response()
    }
}
