//! Error types for the OTP service.

use crate::types::TransactionStatus;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the credit ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Debit refused; state is unchanged.
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    /// The transaction was already completed. Not an alarm.
    #[error("Transaction already credited: {0}")]
    AlreadyCredited(Uuid),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("Transaction {id} is {status}")]
    TransactionClosed { id: Uuid, status: TransactionStatus },

    #[error("Transaction {0} cannot be credited")]
    NotCreditable(Uuid),

    #[error("Transaction {transaction_id} does not belong to user {user_id}")]
    OwnershipMismatch { transaction_id: Uuid, user_id: Uuid },

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Transport-level failure talking to a payment or delivery provider.
///
/// Retriable by the caller. Never a definitive business outcome.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("{gateway} request timed out")]
    Timeout { gateway: String },

    #[error("{gateway} transport error: {message}")]
    Transport { gateway: String, message: String },

    #[error("{gateway} API error ({status}): {message}")]
    Api {
        gateway: String,
        status: u16,
        message: String,
    },

    #[error("Gateway not configured: {0}")]
    NotConfigured(String),
}

impl GatewayError {
    pub(crate) fn transport(gateway: impl Into<String>, err: impl std::fmt::Display) -> Self {
        GatewayError::Transport {
            gateway: gateway.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn timeout(gateway: impl Into<String>) -> Self {
        GatewayError::Timeout {
            gateway: gateway.into(),
        }
    }
}

/// Snapshot persistence errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),
}

impl From<aes_gcm::Error> for StoreError {
    fn from(_: aes_gcm::Error) -> Self {
        StoreError::Encryption("AES-GCM encryption/decryption failed".to_string())
    }
}

/// Service-level error rendered by the HTTP layer.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error(transparent)]
    Gateway(GatewayError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientBalance {
                required,
                available,
            } => ServiceError::InsufficientBalance {
                required,
                available,
            },
            LedgerError::TransactionNotFound(_) | LedgerError::UserNotFound(_) => {
                ServiceError::NotFound(e.to_string())
            }
            LedgerError::AlreadyCredited(_) | LedgerError::TransactionClosed { .. } => {
                ServiceError::Conflict(e.to_string())
            }
            LedgerError::NotCreditable(_)
            | LedgerError::OwnershipMismatch { .. }
            | LedgerError::InvalidAmount(_) => ServiceError::Validation(e.to_string()),
            LedgerError::Storage(e) => ServiceError::Storage(e),
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotConfigured(name) => {
                ServiceError::Validation(format!("payment gateway not available: {}", name))
            }
            other => ServiceError::Gateway(other),
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ServiceError::InsufficientBalance { .. } => {
                (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_BALANCE")
            }
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ServiceError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ServiceError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ServiceError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            ServiceError::Gateway(_) => (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR"),
            ServiceError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            ServiceError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let error = match &self {
            ServiceError::Gateway(e) => {
                tracing::warn!(error = %e, "Provider call failed");
                "payment or delivery provider unavailable, try again".to_string()
            }
            ServiceError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure");
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
