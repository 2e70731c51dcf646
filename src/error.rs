//! Error types

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TraderError>;

#[derive(Debug, Error)]
pub enum TraderError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Market data error: {0}")]
    MarketData(String),

    #[error("Quantity must be a positive number of shares, got {0}")]
    InvalidQuantity(i64),

    #[error("Price must be positive, got {0}")]
    InvalidPrice(Decimal),

    #[error("Insufficient funds.")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Insufficient shares to sell.")]
    InsufficientShares { requested: i64, held: i64 },

    #[error("Stock not found: {0}")]
    StockNotFound(String),

    #[error("No holding of {0}")]
    HoldingNotFound(String),

    #[error("Profile not found for user {0}")]
    ProfileNotFound(i64),

    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Amount out of range: {0}")]
    Overflow(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

impl TraderError {
    pub fn status(&self) -> StatusCode {
        match self {
            TraderError::InvalidQuantity(_)
            | TraderError::InvalidPrice(_)
            | TraderError::InsufficientFunds { .. }
            | TraderError::InsufficientShares { .. }
            | TraderError::InvalidInput(_)
            | TraderError::Overflow(_) => StatusCode::BAD_REQUEST,
            TraderError::StockNotFound(_)
            | TraderError::HoldingNotFound(_)
            | TraderError::ProfileNotFound(_) => StatusCode::NOT_FOUND,
            TraderError::UsernameTaken(_) => StatusCode::CONFLICT,
            TraderError::InvalidCredentials | TraderError::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            TraderError::MarketData(_) | TraderError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for TraderError {
    fn from(rejection: JsonRejection) -> Self {
        TraderError::InvalidInput(rejection.body_text())
    }
}

impl IntoResponse for TraderError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
            format!("Transaction failed: {}", self)
        } else {
            self.to_string()
        };

        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}
