//! Development delivery adapter that only logs.

use super::{DeliveryGateway, DeliveryOutcome, DeliveryRequest, DeliveryStatus};
use crate::error::GatewayError;
use crate::validation::mask_identifier;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

/// Accepts every dispatch and reports it delivered.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDeliveryGateway;

impl LogDeliveryGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeliveryGateway for LogDeliveryGateway {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, GatewayError> {
        let provider_ref = format!("log_{}", Uuid::new_v4().simple());
        info!(
            identifier = %mask_identifier(&request.identifier),
            channel = %request.channel,
            %provider_ref,
            "OTP dispatch (log delivery, no message sent)"
        );
        Ok(DeliveryOutcome::Accepted {
            provider_ref,
            latency_ms: 0,
        })
    }

    async fn status(&self, _provider_ref: &str) -> Result<DeliveryStatus, GatewayError> {
        Ok(DeliveryStatus::Delivered)
    }
}
