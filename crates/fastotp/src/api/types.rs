//! API request/response types.

use crate::otp::{OtpIssuedView, Verification, VerifyFailure};
use crate::store::StoreStats;
use crate::types::{
    ApiKey, ApiKeyStatus, Channel, GatewayKind, KeyEnvironment, OtpLog, OtpPurpose, OtpStatus,
};
use crate::validation::mask_identifier;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub persistent: bool,
    pub gateways: Vec<GatewayKind>,
    #[serde(flatten)]
    pub counts: StoreStats,
}

/// Send OTP request, authenticated with an API key.
#[derive(Debug, Deserialize)]
pub struct SendOtpRequest {
    pub identifier: String,
    #[serde(default = "default_channel")]
    pub channel: Channel,
    pub length: Option<u8>,
    pub ttl_seconds: Option<u64>,
}

fn default_channel() -> Channel {
    Channel::Whatsapp
}

/// Verify OTP request. Either `otp_log_id` or `identifier` selects the log.
#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub otp_log_id: Option<Uuid>,
    pub identifier: Option<String>,
    pub code: String,
}

/// Registration verification request.
#[derive(Debug, Deserialize)]
pub struct VerifyCodeRequest {
    pub code: String,
}

/// Outcome of a verification attempt.
#[derive(Debug, Serialize)]
pub struct VerificationView {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<VerifyFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_log_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

impl From<Verification> for VerificationView {
    fn from(v: Verification) -> Self {
        match v {
            Verification::Verified {
                otp_log_id,
                verified_at,
            } => Self {
                ok: true,
                reason: None,
                otp_log_id: Some(otp_log_id),
                verified_at: Some(verified_at),
            },
            Verification::Rejected(reason) => Self {
                ok: false,
                reason: Some(reason),
                otp_log_id: None,
                verified_at: None,
            },
        }
    }
}

/// Issued OTP response.
pub type SendOtpResponse = OtpIssuedView;

/// OTP history row. The code hash never leaves the service.
#[derive(Debug, Serialize)]
pub struct OtpLogView {
    pub id: Uuid,
    pub identifier: String,
    pub channel: Channel,
    pub purpose: OtpPurpose,
    pub status: OtpStatus,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub cost_credits: Decimal,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl From<OtpLog> for OtpLogView {
    fn from(log: OtpLog) -> Self {
        Self {
            id: log.id,
            identifier: mask_identifier(&log.identifier),
            channel: log.channel,
            purpose: log.purpose,
            status: log.status,
            country_code: log.country_code,
            country_name: log.country_name,
            cost_credits: log.cost_credits,
            latency_ms: log.latency_ms,
            error: log.error,
            created_at: log.created_at,
            sent_at: log.sent_at,
            verified_at: log.verified_at,
            expires_at: log.expires_at,
        }
    }
}

/// Create API key request.
#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub user_id: Uuid,
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: KeyEnvironment,
}

fn default_environment() -> KeyEnvironment {
    KeyEnvironment::Live
}

/// API key as shown to its owner. `key` is only present on creation.
#[derive(Debug, Serialize)]
pub struct ApiKeyView {
    pub id: Uuid,
    pub name: String,
    pub prefix: String,
    pub environment: KeyEnvironment,
    pub status: ApiKeyStatus,
    pub total_requests: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl From<ApiKey> for ApiKeyView {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            prefix: key.prefix,
            environment: key.environment,
            status: key.status,
            total_requests: key.total_requests,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
            key: None,
        }
    }
}

/// Top-up request.
#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub user_id: Uuid,
    pub package_id: u32,
    pub gateway: String,
}

/// Redirect-style callback parameters. Paystack sends `reference` and
/// `trxref`, Flutterwave sends `tx_ref`.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub reference: Option<String>,
    pub trxref: Option<String>,
    pub tx_ref: Option<String>,
}

impl CallbackQuery {
    pub fn reference(self) -> Option<String> {
        self.reference
            .or(self.trxref)
            .or(self.tx_ref)
            .filter(|r| !r.trim().is_empty())
    }
}

/// Server-to-server notification body. Only the reference is read; the
/// charge is always re-verified with the gateway.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookBody {
    pub reference: Option<String>,
    pub data: Option<CallbackQuery>,
}

impl WebhookBody {
    pub fn reference(self) -> Option<String> {
        self.reference
            .filter(|r| !r.trim().is_empty())
            .or_else(|| self.data.and_then(CallbackQuery::reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_reference_precedence() {
        let query = CallbackQuery {
            reference: None,
            trxref: Some("abc".into()),
            tx_ref: Some("def".into()),
        };
        assert_eq!(query.reference().as_deref(), Some("abc"));
        assert_eq!(CallbackQuery::default().reference(), None);
    }

    #[test]
    fn test_webhook_reference() {
        let paystack: WebhookBody = serde_json::from_str(
            r#"{"event":"charge.success","data":{"reference":"ps_1","amount":500000}}"#,
        )
        .unwrap();
        assert_eq!(paystack.reference().as_deref(), Some("ps_1"));

        let flutterwave: WebhookBody =
            serde_json::from_str(r#"{"event":"charge.completed","data":{"tx_ref":"txn-9"}}"#)
                .unwrap();
        assert_eq!(flutterwave.reference().as_deref(), Some("txn-9"));
    }

    #[test]
    fn test_verification_view() {
        let view = VerificationView::from(Verification::Rejected(VerifyFailure::Expired));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["reason"], "expired");
        assert!(json.get("otp_log_id").is_none());
    }
}
