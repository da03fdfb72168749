//! Delivery API types.

use serde::{Deserialize, Serialize};

/// Outgoing OTP dispatch request.
#[derive(Debug, Clone, Serialize)]
pub struct SendOtpRequest {
    /// Phone number in E.164 format or email address.
    pub identifier: String,
    /// One of `whatsapp`, `sms`, `email`, `voice`.
    pub channel: String,
    pub code: String,
    /// Seconds until the code stops being accepted.
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

/// Response to a dispatch request.
#[derive(Debug, Clone, Deserialize)]
pub struct SendOtpResponse {
    pub otp_id: String,
    #[serde(default)]
    pub status: MessageStatus,
}

/// Provider-side message state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Queued,
    Sent,
    Delivered,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Delivery status poll response.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryStatusResponse {
    pub otp_id: String,
    pub status: MessageStatus,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// Error body returned by the API on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(alias = "message")]
    pub error: String,
}
