//! Core types for the OTP and credit ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a user.
pub type UserId = Uuid;

/// Credits are fixed-point with four decimal places.
pub const CREDIT_SCALE: u32 = 4;

/// Currency amounts carry two decimal places.
pub const CURRENCY_SCALE: u32 = 2;

/// Round a credit amount to ledger precision.
pub fn to_credits(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp(CREDIT_SCALE);
    rounded.rescale(CREDIT_SCALE);
    rounded
}

/// Delivery channel for an OTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Sms,
    Email,
    Voice,
}

impl Channel {
    /// Whether identifiers on this channel are phone numbers.
    pub fn is_phone(&self) -> bool {
        !matches!(self, Channel::Email)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp",
            Channel::Sms => "sms",
            Channel::Email => "email",
            Channel::Voice => "voice",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "whatsapp" => Ok(Channel::Whatsapp),
            "sms" => Ok(Channel::Sms),
            "email" => Ok(Channel::Email),
            "voice" => Ok(Channel::Voice),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// E.164 WhatsApp number used for registration OTPs.
    pub whatsapp_number: String,
    pub phone_number: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub company_name: Option<String>,
    pub is_verified: bool,
    pub is_active: bool,
    pub avatar_initials: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub whatsapp_number: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub company_name: Option<String>,
}

/// Profile fields a user may change. Absent fields are left alone; an empty
/// `phone_number` or `company_name` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Derive avatar initials from a name, falling back to the first two
/// characters of `fallback` when either name part is missing.
pub fn avatar_initials(first_name: &str, last_name: &str, fallback: &str) -> String {
    let first = first_name.trim().chars().next();
    let last = last_name.trim().chars().next();

    match (first, last) {
        (Some(f), Some(l)) => f.to_uppercase().chain(l.to_uppercase()).collect(),
        _ => fallback.trim().chars().take(2).flat_map(char::to_uppercase).collect(),
    }
}

/// Spendable credit balance for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditBalance {
    pub user_id: UserId,
    /// Remaining credits, never negative.
    pub balance: Decimal,
    /// Lifetime credits added by completed top-ups.
    pub total_topped_up: Decimal,
    /// Lifetime credits debited for OTPs.
    pub total_consumed: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl CreditBalance {
    /// Create a new empty balance for a user.
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: to_credits(Decimal::ZERO),
            total_topped_up: to_credits(Decimal::ZERO),
            total_consumed: to_credits(Decimal::ZERO),
            updated_at: now,
        }
    }

    pub fn has_credits(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

/// Kind of balance-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Topup,
    Consumption,
    Refund,
}

/// Transaction status. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Source of funds for a top-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Paystack,
    Flutterwave,
    Dummy,
    /// Signup trial grant, no external processor.
    Trial,
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayKind::Paystack => write!(f, "paystack"),
            GatewayKind::Flutterwave => write!(f, "flutterwave"),
            GatewayKind::Dummy => write!(f, "dummy"),
            GatewayKind::Trial => write!(f, "trial"),
        }
    }
}

impl FromStr for GatewayKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paystack" => Ok(GatewayKind::Paystack),
            "flutterwave" => Ok(GatewayKind::Flutterwave),
            "dummy" => Ok(GatewayKind::Dummy),
            other => Err(format!("unknown payment gateway: {}", other)),
        }
    }
}

/// Record of a balance-affecting intent. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    /// Price in USD at initiation, zero for consumption and refunds.
    pub amount_usd: Decimal,
    pub credits: Decimal,
    pub gateway: Option<GatewayKind>,
    /// Processor reference, unique across transactions.
    pub gateway_ref: Option<String>,
    /// Amount the processor was asked to charge, in `charge_currency`.
    pub charge_amount: Option<Decimal>,
    pub charge_currency: Option<String>,
    pub package_id: Option<u32>,
    pub description: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// A new pending transaction with no gateway details.
    pub fn pending(
        user_id: UserId,
        transaction_type: TransactionType,
        credits: Decimal,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            transaction_type,
            status: TransactionStatus::Pending,
            amount_usd: Decimal::ZERO,
            credits: to_credits(credits),
            gateway: None,
            gateway_ref: None,
            charge_amount: None,
            charge_currency: None,
            package_id: None,
            description: description.into(),
            metadata: serde_json::Value::Null,
            created_at: now,
            completed_at: None,
        }
    }
}

/// Package tier label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageTier {
    Starter,
    Pro,
    Enterprise,
    Scale,
}

/// Catalog entry for purchasable credits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditPackage {
    pub id: u32,
    pub name: String,
    pub tier: PackageTier,
    pub credits: u32,
    pub price_usd: Decimal,
    pub price_per_otp: Decimal,
    pub is_popular: bool,
    pub is_active: bool,
    pub description: String,
    pub features: Vec<String>,
}

impl CreditPackage {
    /// The catalog seeded into a fresh store.
    pub fn default_catalog() -> Vec<CreditPackage> {
        #[allow(clippy::too_many_arguments)]
        fn package(
            id: u32,
            name: &str,
            tier: PackageTier,
            credits: u32,
            price_cents: i64,
            per_otp_millis: i64,
            is_popular: bool,
            description: &str,
            features: &[&str],
        ) -> CreditPackage {
            CreditPackage {
                id,
                name: name.to_string(),
                tier,
                credits,
                price_usd: Decimal::new(price_cents, CURRENCY_SCALE),
                price_per_otp: Decimal::new(per_otp_millis, 3),
                is_popular,
                is_active: true,
                description: description.to_string(),
                features: features.iter().map(|f| f.to_string()).collect(),
            }
        }

        vec![
            package(
                1,
                "Starter",
                PackageTier::Starter,
                500,
                500,
                10,
                false,
                "For side projects and testing",
                &["500 OTP credits", "WhatsApp, SMS and email", "Email support"],
            ),
            package(
                2,
                "Pro",
                PackageTier::Pro,
                5_000,
                4_000,
                8,
                true,
                "For growing products",
                &["5,000 OTP credits", "All channels", "Delivery analytics", "Priority support"],
            ),
            package(
                3,
                "Enterprise",
                PackageTier::Enterprise,
                50_000,
                35_000,
                7,
                false,
                "For high-volume verification",
                &["50,000 OTP credits", "All channels", "Dedicated sender ID", "SLA"],
            ),
            package(
                4,
                "Scale",
                PackageTier::Scale,
                200_000,
                120_000,
                6,
                false,
                "For platforms at scale",
                &["200,000 OTP credits", "All channels", "Custom routing", "Account manager"],
            ),
        ]
    }
}

/// OTP log status.
///
/// `pending -> sent -> delivered -> verified`, with `failed` and `expired`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpStatus {
    Pending,
    Sent,
    Delivered,
    Verified,
    Failed,
    Expired,
}

impl OtpStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OtpStatus::Verified | OtpStatus::Failed | OtpStatus::Expired)
    }

    /// Whether a code may be checked against a log in this state.
    pub fn is_verifiable(&self) -> bool {
        matches!(self, OtpStatus::Sent | OtpStatus::Delivered)
    }

    /// Whether a lookup by identifier may land on this log. Undispatched and
    /// failed logs are skipped so they never shadow an older live code.
    pub fn is_lookup_candidate(&self) -> bool {
        !matches!(self, OtpStatus::Pending | OtpStatus::Failed)
    }

    pub fn can_transition_to(&self, next: OtpStatus) -> bool {
        use OtpStatus::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Failed)
                | (Pending, Expired)
                | (Sent, Delivered)
                | (Sent, Failed)
                | (Sent, Verified)
                | (Sent, Expired)
                | (Delivered, Verified)
                | (Delivered, Expired)
        )
    }
}

impl fmt::Display for OtpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OtpStatus::Pending => "pending",
            OtpStatus::Sent => "sent",
            OtpStatus::Delivered => "delivered",
            OtpStatus::Verified => "verified",
            OtpStatus::Failed => "failed",
            OtpStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Why an OTP was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpPurpose {
    /// Account verification; free and flips the user's verified flag.
    Registration,
    /// Customer traffic via an API key; debited from the balance.
    Transactional,
}

/// One record per OTP issuance. Holds the code hash, never the code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpLog {
    pub id: Uuid,
    pub user_id: UserId,
    pub api_key_id: Option<Uuid>,
    pub identifier: String,
    pub channel: Channel,
    pub purpose: OtpPurpose,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub otp_hash: String,
    pub status: OtpStatus,
    pub provider_ref: Option<String>,
    pub latency_ms: Option<u64>,
    pub cost_credits: Decimal,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl OtpLog {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// API key environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyEnvironment {
    Live,
    Test,
}

impl fmt::Display for KeyEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyEnvironment::Live => write!(f, "live"),
            KeyEnvironment::Test => write!(f, "test"),
        }
    }
}

/// API key status. Revocation is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
}

/// Stored API key. The raw key is only ever returned at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: UserId,
    pub name: String,
    /// Display prefix, e.g. `fotk_live_Ab...`.
    pub prefix: String,
    /// SHA-256 of the raw key, hex encoded.
    pub key_hash: String,
    pub environment: KeyEnvironment,
    pub status: ApiKeyStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub created_at: DateTime<Utc>,
}
