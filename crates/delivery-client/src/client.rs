//! Delivery HTTP client.

use crate::error::DeliveryError;
use crate::types::*;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use urlencoding::encode;

/// FastOTP delivery API client.
///
/// The API key is held as a `SecretString` so it never shows up in debug output.
#[derive(Clone)]
pub struct DeliveryClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl DeliveryClient {
    /// Create a new delivery client.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: SecretString::new(api_key.into()),
        })
    }

    /// Check if the delivery API is reachable.
    pub async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Dispatch a code over the requested channel.
    #[instrument(skip(self, request), fields(channel = %request.channel))]
    pub async fn send_otp(&self, request: &SendOtpRequest) -> Result<SendOtpResponse, DeliveryError> {
        let response = self
            .client
            .post(format!("{}/send", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(request)
            .send()
            .await?;

        let sent: SendOtpResponse = Self::handle_response(response).await?;
        debug!(otp_id = %sent.otp_id, "OTP accepted by provider");
        Ok(sent)
    }

    /// Poll the provider for the delivery state of a previously sent code.
    #[instrument(skip(self))]
    pub async fn delivery_status(&self, otp_id: &str) -> Result<DeliveryStatusResponse, DeliveryError> {
        let response = self
            .client
            .get(format!("{}/status/{}", self.base_url, encode(otp_id)))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T, DeliveryError> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await?;
            return Ok(serde_json::from_str(&body)?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);

        warn!(status = %status, message = %message, "Delivery API request failed");

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(DeliveryError::Unauthorized),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(DeliveryError::Rejected(message))
            }
            _ => Err(DeliveryError::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }
}
