//! Delivery gateway port.
//!
//! The OTP engine dispatches codes through a [`DeliveryGateway`]. Outcomes are
//! tagged variants so callers match exhaustively on accepted vs rejected,
//! while transport problems surface as [`GatewayError`].

mod http;
mod log;

pub use http::HttpDeliveryGateway;
pub use log::LogDeliveryGateway;

use crate::config::{DeliveryConfig, DeliveryMode};
use crate::error::GatewayError;
use crate::types::Channel;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Code dispatch request.
#[derive(Clone)]
pub struct DeliveryRequest {
    pub identifier: String,
    pub channel: Channel,
    pub code: String,
    pub ttl: Duration,
}

impl std::fmt::Debug for DeliveryRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryRequest")
            .field("identifier", &crate::validation::mask_identifier(&self.identifier))
            .field("channel", &self.channel)
            .field("code", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Definitive answer from the provider for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Accepted {
        provider_ref: String,
        latency_ms: u64,
    },
    Rejected {
        reason: String,
        latency_ms: u64,
    },
}

/// Provider-side state of a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Delivered,
    Failed { reason: String },
    Unknown,
}

#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &'static str;

    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, GatewayError>;

    async fn status(&self, provider_ref: &str) -> Result<DeliveryStatus, GatewayError>;
}

/// Build the delivery adapter selected in configuration.
pub fn from_config(config: &DeliveryConfig) -> Result<Arc<dyn DeliveryGateway>, GatewayError> {
    match config.mode {
        DeliveryMode::Log => Ok(Arc::new(LogDeliveryGateway::new())),
        DeliveryMode::Http => {
            let api_key = config
                .api_key
                .as_ref()
                .ok_or_else(|| GatewayError::NotConfigured("delivery.api_key".into()))?;
            Ok(Arc::new(HttpDeliveryGateway::new(
                &config.api_url,
                api_key,
                config.timeout,
                config.sender_id.clone(),
            )?))
        }
    }
}
