//! Paystack adapter.
//!
//! Amounts go over the wire in minor units (kobo for NGN).

use super::{handle_response, request_error, ChargeInitiation, ChargeRequest, ChargeVerification, PaymentGateway};
use crate::config::PaystackConfig;
use crate::error::GatewayError;
use crate::types::GatewayKind;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use urlencoding::encode;

const KIND: GatewayKind = GatewayKind::Paystack;

pub struct PaystackGateway {
    client: Client,
    base_url: String,
    secret_key: SecretString,
    currency: String,
    usd_rate: Decimal,
}

#[derive(Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    amount: i64,
    currency: &'a str,
    reference: &'a str,
    callback_url: &'a str,
    metadata: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    gateway_response: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

impl PaystackGateway {
    pub fn new(config: &PaystackConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| request_error(KIND, e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            currency: config.currency.to_uppercase(),
            usd_rate: config.usd_rate,
        })
    }

    /// Price in the settlement currency, rounded to cents.
    fn charge_amount(&self, amount_usd: Decimal) -> Decimal {
        let amount = if self.currency == "USD" {
            amount_usd
        } else {
            amount_usd * self.usd_rate
        };
        amount.round_dp(2)
    }

    fn api_error(message: String) -> GatewayError {
        GatewayError::Api {
            gateway: KIND.to_string(),
            status: 200,
            message,
        }
    }
}

fn to_minor(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED).round().to_i64()
}

fn from_minor(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn kind(&self) -> GatewayKind {
        KIND
    }

    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn initiate_charge(&self, request: &ChargeRequest) -> Result<ChargeInitiation, GatewayError> {
        let amount = self.charge_amount(request.amount_usd);
        let minor = to_minor(amount)
            .ok_or_else(|| Self::api_error(format!("amount out of range: {}", amount)))?;

        let body = InitializeBody {
            email: &request.customer_email,
            amount: minor,
            currency: &self.currency,
            reference: &request.reference,
            callback_url: &request.callback_url,
            metadata: &request.metadata,
        };

        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(self.secret_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(KIND, e))?;

        let envelope: Envelope<InitializeData> = handle_response(KIND, response).await?;
        let data = match envelope {
            Envelope {
                status: true,
                data: Some(data),
                ..
            } => data,
            Envelope { message, .. } => return Err(Self::api_error(message)),
        };

        debug!(reference = %data.reference, %amount, currency = %self.currency, "Paystack charge initialized");
        Ok(ChargeInitiation {
            checkout_url: data.authorization_url,
            reference: data.reference,
            amount,
            currency: self.currency.clone(),
        })
    }

    #[instrument(skip(self))]
    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayError> {
        let response = self
            .client
            .get(format!("{}/transaction/verify/{}", self.base_url, encode(reference)))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await
            .map_err(|e| request_error(KIND, e))?;

        let envelope: Envelope<VerifyData> = handle_response(KIND, response).await?;
        let data = match envelope {
            Envelope {
                status: true,
                data: Some(data),
                ..
            } => data,
            Envelope { message, .. } => return Err(Self::api_error(message)),
        };

        Ok(match data.status.as_str() {
            "success" => ChargeVerification::Success {
                amount: from_minor(data.amount),
                currency: data.currency.to_uppercase(),
                metadata: data.metadata,
            },
            "failed" | "reversed" => ChargeVerification::Failed {
                reason: data.gateway_response.unwrap_or(data.status),
            },
            // abandoned, ongoing, pending, processing, queued
            _ => ChargeVerification::Pending,
        })
    }
}
