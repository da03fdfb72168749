//! Development gateway: every charge succeeds without collecting money.
//!
//! The checkout URL points straight at the callback endpoint so the
//! top-up completes as soon as the browser follows it.

use super::{ChargeInitiation, ChargeRequest, ChargeVerification, PaymentGateway};
use crate::error::GatewayError;
use crate::types::GatewayKind;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

pub struct DummyGateway {
    currency: String,
    charges: Mutex<HashMap<String, (Decimal, serde_json::Value)>>,
}

impl DummyGateway {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into().to_uppercase(),
            charges: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PaymentGateway for DummyGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Dummy
    }

    async fn initiate_charge(&self, request: &ChargeRequest) -> Result<ChargeInitiation, GatewayError> {
        let reference = format!("dummy_{}", request.reference);
        let amount = request.amount_usd.round_dp(2);
        self.charges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(reference.clone(), (amount, request.metadata.clone()));

        let separator = if request.callback_url.contains('?') { '&' } else { '?' };
        let checkout_url = format!(
            "{}{}reference={}",
            request.callback_url,
            separator,
            urlencoding::encode(&reference)
        );

        info!(%reference, %amount, "Dummy gateway created checkout");
        Ok(ChargeInitiation {
            checkout_url,
            reference,
            amount,
            currency: self.currency.clone(),
        })
    }

    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayError> {
        let charge = self
            .charges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(reference)
            .cloned();

        Ok(match charge {
            Some((amount, metadata)) => ChargeVerification::Success {
                amount,
                currency: self.currency.clone(),
                metadata,
            },
            None => ChargeVerification::Failed {
                reason: "unknown dummy reference".into(),
            },
        })
    }
}
