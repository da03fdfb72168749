//! Delivery adapter over the FastOTP delivery API.

use super::{DeliveryGateway, DeliveryOutcome, DeliveryRequest, DeliveryStatus};
use crate::error::GatewayError;
use crate::validation::mask_identifier;
use async_trait::async_trait;
use delivery_client::{DeliveryClient, DeliveryError, MessageStatus, SendOtpRequest};
use secrecy::{ExposeSecret, SecretString};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

const GATEWAY: &str = "delivery";

pub struct HttpDeliveryGateway {
    client: DeliveryClient,
    sender_id: Option<String>,
}

impl HttpDeliveryGateway {
    pub fn new(
        api_url: &str,
        api_key: &SecretString,
        timeout: Duration,
        sender_id: Option<String>,
    ) -> Result<Self, GatewayError> {
        let client = DeliveryClient::new(api_url, api_key.expose_secret().clone(), timeout)
            .map_err(|e| GatewayError::transport(GATEWAY, e))?;
        Ok(Self { client, sender_id })
    }

    pub fn from_client(client: DeliveryClient, sender_id: Option<String>) -> Self {
        Self { client, sender_id }
    }
}

fn map_error(e: DeliveryError) -> GatewayError {
    match e {
        DeliveryError::Http(e) if e.is_timeout() => GatewayError::timeout(GATEWAY),
        DeliveryError::Api { status, message } => GatewayError::Api {
            gateway: GATEWAY.into(),
            status,
            message,
        },
        DeliveryError::Unauthorized => GatewayError::Api {
            gateway: GATEWAY.into(),
            status: 401,
            message: "unauthorized".into(),
        },
        other => GatewayError::transport(GATEWAY, other),
    }
}

#[async_trait]
impl DeliveryGateway for HttpDeliveryGateway {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self, request), fields(identifier = %mask_identifier(&request.identifier), channel = %request.channel))]
    async fn send(&self, request: &DeliveryRequest) -> Result<DeliveryOutcome, GatewayError> {
        let body = SendOtpRequest {
            identifier: request.identifier.clone(),
            channel: request.channel.to_string(),
            code: request.code.clone(),
            expires_in: request.ttl.as_secs(),
            sender_id: self.sender_id.clone(),
        };

        let started = Instant::now();
        let result = self.client.send_otp(&body).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) if response.status == MessageStatus::Failed => {
                warn!(otp_id = %response.otp_id, "Provider accepted then failed the message");
                Ok(DeliveryOutcome::Rejected {
                    reason: "provider reported failure".into(),
                    latency_ms,
                })
            }
            Ok(response) => {
                debug!(otp_id = %response.otp_id, latency_ms, "OTP dispatched");
                Ok(DeliveryOutcome::Accepted {
                    provider_ref: response.otp_id,
                    latency_ms,
                })
            }
            Err(DeliveryError::Rejected(reason)) => {
                warn!(%reason, "Provider rejected OTP");
                Ok(DeliveryOutcome::Rejected { reason, latency_ms })
            }
            Err(e) => Err(map_error(e)),
        }
    }

    #[instrument(skip(self))]
    async fn status(&self, provider_ref: &str) -> Result<DeliveryStatus, GatewayError> {
        let response = self
            .client
            .delivery_status(provider_ref)
            .await
            .map_err(map_error)?;

        Ok(match response.status {
            MessageStatus::Queued => DeliveryStatus::Queued,
            MessageStatus::Sent => DeliveryStatus::Sent,
            MessageStatus::Delivered => DeliveryStatus::Delivered,
            MessageStatus::Failed => DeliveryStatus::Failed {
                reason: response.error.unwrap_or_else(|| "delivery failed".into()),
            },
            MessageStatus::Unknown => DeliveryStatus::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Channel;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> HttpDeliveryGateway {
        HttpDeliveryGateway::new(
            &server.uri(),
            &SecretString::new("dk_test".into()),
            Duration::from_secs(2),
            Some("FastOTP".into()),
        )
        .unwrap()
    }

    fn request() -> DeliveryRequest {
        DeliveryRequest {
            identifier: "+2348031234567".into(),
            channel: Channel::Sms,
            code: "482913".into(),
            ttl: Duration::from_secs(600),
        }
    }

    #[tokio::test]
    async fn test_send_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(header("authorization", "Bearer dk_test"))
            .and(body_partial_json(serde_json::json!({
                "identifier": "+2348031234567",
                "channel": "sms",
                "expires_in": 600,
                "sender_id": "FastOTP"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "otp_id": "msg_1",
                "status": "queued"
            })))
            .mount(&server)
            .await;

        let outcome = gateway(&server).send(&request()).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Accepted { ref provider_ref, .. } if provider_ref == "msg_1"));
    }

    #[tokio::test]
    async fn test_send_rejected_is_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_json(serde_json::json!({ "error": "unroutable number" })),
            )
            .mount(&server)
            .await;

        let outcome = gateway(&server).send(&request()).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Rejected { ref reason, .. } if reason.contains("unroutable")));
    }

    #[tokio::test]
    async fn test_send_server_error_is_gateway_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = gateway(&server).send(&request()).await;
        assert!(matches!(result, Err(GatewayError::Api { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_send_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_json(serde_json::json!({ "otp_id": "late" })),
            )
            .mount(&server)
            .await;

        let result = gateway(&server).send(&request()).await;
        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_status_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/msg_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "otp_id": "msg_1",
                "status": "failed",
                "error": "handset unreachable"
            })))
            .mount(&server)
            .await;

        let status = gateway(&server).status("msg_1").await.unwrap();
        assert_eq!(
            status,
            DeliveryStatus::Failed {
                reason: "handset unreachable".into()
            }
        );
    }
}
