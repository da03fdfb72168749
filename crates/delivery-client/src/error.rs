//! Delivery client errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unauthorized: check the delivery API key")]
    Unauthorized,

    #[error("Message rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    /// Whether the failure is a transport problem worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Http(e) => e.is_timeout() || e.is_connect(),
            DeliveryError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
