//! Payment gateway port and adapters.
//!
//! Adapters only talk to the processor. Matching a confirmed charge to a
//! local transaction is the job of [`crate::reconciler::Reconciler`].

mod dummy;
mod flutterwave;
mod paystack;

pub use dummy::DummyGateway;
pub use flutterwave::FlutterwaveGateway;
pub use paystack::PaystackGateway;

use crate::config::PaymentsConfig;
use crate::error::GatewayError;
use crate::types::GatewayKind;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A charge to open with a processor.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    /// Local transaction id, used as the merchant reference.
    pub reference: String,
    pub amount_usd: Decimal,
    pub customer_email: String,
    pub description: String,
    pub callback_url: String,
    pub metadata: serde_json::Value,
}

/// Where to send the customer, and what the processor will charge.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeInitiation {
    pub checkout_url: String,
    /// Processor reference used for verification.
    pub reference: String,
    /// Amount in major units of `currency`.
    pub amount: Decimal,
    pub currency: String,
}

/// Processor-reported state of a charge.
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeVerification {
    Success {
        /// Major units of `currency`.
        amount: Decimal,
        currency: String,
        metadata: serde_json::Value,
    },
    Failed {
        reason: String,
    },
    Pending,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    async fn initiate_charge(&self, request: &ChargeRequest) -> Result<ChargeInitiation, GatewayError>;

    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayError>;
}

/// Configured gateways by kind.
#[derive(Clone, Default)]
pub struct Gateways {
    gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl Gateways {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every gateway that has configuration.
    pub fn from_config(config: &PaymentsConfig) -> Result<Self, GatewayError> {
        let mut gateways = Self::new();

        if let Some(paystack) = &config.paystack {
            gateways.insert(Arc::new(PaystackGateway::new(paystack, config.gateway_timeout)?));
        }
        if let Some(flutterwave) = &config.flutterwave {
            gateways.insert(Arc::new(FlutterwaveGateway::new(
                flutterwave,
                config.gateway_timeout,
            )?));
        }
        if config.dummy.enabled {
            warn!("Dummy payment gateway enabled; top-ups succeed without payment");
            gateways.insert(Arc::new(DummyGateway::new(config.currency.clone())));
        }

        info!(gateways = ?gateways.kinds(), "Payment gateways configured");
        Ok(gateways)
    }

    pub fn insert(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.kind(), gateway);
    }

    pub fn get(&self, kind: GatewayKind) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways
            .get(&kind)
            .cloned()
            .ok_or_else(|| GatewayError::NotConfigured(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<GatewayKind> {
        let mut kinds: Vec<_> = self.gateways.keys().copied().collect();
        kinds.sort_by_key(|k| k.to_string());
        kinds
    }
}

/// Map a reqwest failure to a gateway error.
pub(crate) fn request_error(gateway: GatewayKind, e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::timeout(gateway.to_string())
    } else {
        GatewayError::transport(gateway.to_string(), e)
    }
}

/// Decode a processor response, turning non-2xx statuses into `Api` errors.
pub(crate) async fn handle_response<T: DeserializeOwned>(
    gateway: GatewayKind,
    response: reqwest::Response,
) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| request_error(gateway, e))?;

    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(body);
        warn!(%gateway, status = %status, message = %message, "Payment gateway request failed");
        return Err(GatewayError::Api {
            gateway: gateway.to_string(),
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| GatewayError::transport(gateway.to_string(), e))
}
