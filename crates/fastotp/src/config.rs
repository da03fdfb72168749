//! Service configuration.
//!
//! Built once at startup from `FASTOTP__*` environment variables and passed
//! to every component. Nothing reads the environment afterwards.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub otp: OtpConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

/// OTP generation and hashing.
#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    /// HMAC key for code hashes and the snapshot key root.
    #[serde(default = "default_secret")]
    pub secret: SecretString,
    #[serde(default = "default_otp_length")]
    pub default_length: u8,
    #[serde(default = "default_otp_ttl", with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Return plaintext codes to callers. Development only.
    #[serde(default)]
    pub expose_code: bool,
    #[serde(default = "default_dispatch_timeout", with = "humantime_serde")]
    pub dispatch_timeout: Duration,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            default_length: default_otp_length(),
            default_ttl: default_otp_ttl(),
            expose_code: false,
            dispatch_timeout: default_dispatch_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Credits granted at signup.
    #[serde(default = "default_trial_credits")]
    pub trial_credits: Decimal,
    /// Cost for identifiers outside the coverage table.
    #[serde(default = "default_cost_per_otp")]
    pub default_cost_per_otp: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            trial_credits: default_trial_credits(),
            default_cost_per_otp: default_cost_per_otp(),
        }
    }
}

/// Which delivery adapter to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Log a masked identifier and accept. Development.
    #[default]
    Log,
    /// Dispatch through the delivery API.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub mode: DeliveryMode,
    #[serde(default = "default_delivery_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_delivery_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub sender_id: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Log,
            api_url: default_delivery_url(),
            api_key: None,
            timeout: default_delivery_timeout(),
            sender_id: None,
        }
    }
}

/// Payment gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Public base URL the gateways redirect back to.
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
    #[serde(default = "default_gateway_timeout", with = "humantime_serde")]
    pub gateway_timeout: Duration,
    /// Pending top-ups older than this are failed by the sweeper.
    #[serde(default = "default_pending_ttl", with = "humantime_serde")]
    pub pending_ttl: Duration,
    pub paystack: Option<PaystackConfig>,
    pub flutterwave: Option<FlutterwaveConfig>,
    #[serde(default)]
    pub dummy: DummyConfig,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            callback_base_url: default_callback_base_url(),
            gateway_timeout: default_gateway_timeout(),
            pending_ttl: default_pending_ttl(),
            paystack: None,
            flutterwave: None,
            dummy: DummyConfig::default(),
        }
    }
}

impl PaymentsConfig {
    /// Callback URL for a gateway, e.g. `{base}/v1/payments/callback/paystack`.
    pub fn callback_url(&self, gateway: &str) -> String {
        format!(
            "{}/v1/payments/callback/{}",
            self.callback_base_url.trim_end_matches('/'),
            gateway
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaystackConfig {
    pub secret_key: SecretString,
    #[serde(default = "default_paystack_url")]
    pub base_url: String,
    /// Settlement currency; USD prices are converted with `usd_rate`.
    #[serde(default = "default_paystack_currency")]
    pub currency: String,
    #[serde(default = "default_usd_rate")]
    pub usd_rate: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlutterwaveConfig {
    pub secret_key: SecretString,
    #[serde(default = "default_flutterwave_url")]
    pub base_url: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Gateway that succeeds without collecting money. Off unless enabled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DummyConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: default_sweep_interval(),
        }
    }
}

/// Snapshot storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    #[serde(default = "default_persist")]
    pub persist: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            persist: default_persist(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_global_rpm")]
    pub global_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_minute: default_global_rpm(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of the human formatter.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_secret() -> SecretString {
    SecretString::new(String::new())
}

fn default_otp_length() -> u8 {
    6
}

fn default_otp_ttl() -> Duration {
    Duration::from_secs(600)
}

fn default_dispatch_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_trial_credits() -> Decimal {
    Decimal::new(5, 0)
}

fn default_cost_per_otp() -> Decimal {
    Decimal::new(50, 4)
}

fn default_delivery_url() -> String {
    "https://api.fastotp.co/v1".into()
}

fn default_delivery_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_currency() -> String {
    "USD".into()
}

fn default_callback_base_url() -> String {
    "http://localhost:8080".into()
}

fn default_gateway_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_pending_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_paystack_url() -> String {
    "https://api.paystack.co".into()
}

fn default_paystack_currency() -> String {
    "NGN".into()
}

fn default_usd_rate() -> Decimal {
    Decimal::new(1600, 0)
}

fn default_flutterwave_url() -> String {
    "https://api.flutterwave.com/v3".into()
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/data/fastotp.enc")
}

fn default_persist() -> bool {
    true
}

fn default_global_rpm() -> u32 {
    120
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("FASTOTP")
                    .prefix_separator("__")
                    .separator("__")
                    // Secrets and phone-like values must stay strings
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.otp.secret.expose_secret().trim().is_empty() {
            bail!("FASTOTP__OTP__SECRET must be set");
        }
        if !(4..=8).contains(&self.otp.default_length) {
            bail!(
                "otp.default_length must be between 4 and 8, got {}",
                self.otp.default_length
            );
        }
        if self.otp.default_ttl.is_zero() || self.otp.default_ttl > crate::otp::MAX_TTL {
            bail!(
                "otp.default_ttl must be between 1s and {}s",
                crate::otp::MAX_TTL.as_secs()
            );
        }
        if self.ledger.trial_credits.is_sign_negative() {
            bail!("ledger.trial_credits must not be negative");
        }
        if self.ledger.default_cost_per_otp <= Decimal::ZERO {
            bail!("ledger.default_cost_per_otp must be positive");
        }
        if self.delivery.mode == DeliveryMode::Http && self.delivery.api_key.is_none() {
            bail!("delivery.api_key is required when delivery.mode = http");
        }
        Ok(())
    }
}
