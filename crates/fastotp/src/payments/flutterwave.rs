//! Flutterwave Standard adapter. `tx_ref` is the local transaction id.

use super::{handle_response, request_error, ChargeInitiation, ChargeRequest, ChargeVerification, PaymentGateway};
use crate::config::FlutterwaveConfig;
use crate::error::GatewayError;
use crate::types::GatewayKind;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const KIND: GatewayKind = GatewayKind::Flutterwave;

pub struct FlutterwaveGateway {
    client: Client,
    base_url: String,
    secret_key: SecretString,
    currency: String,
}

#[derive(Serialize)]
struct PaymentBody<'a> {
    tx_ref: &'a str,
    amount: Decimal,
    currency: &'a str,
    redirect_url: &'a str,
    customer: Customer<'a>,
    customizations: Customizations<'a>,
    meta: &'a serde_json::Value,
}

#[derive(Serialize)]
struct Customer<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct Customizations<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct PaymentLink {
    link: String,
}

#[derive(Deserialize)]
struct TransactionData {
    status: String,
    amount: Decimal,
    currency: String,
    #[serde(default)]
    processor_response: Option<String>,
    #[serde(default)]
    meta: serde_json::Value,
}

impl FlutterwaveGateway {
    pub fn new(config: &FlutterwaveConfig, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| request_error(KIND, e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            currency: config.currency.to_uppercase(),
        })
    }

    fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, GatewayError> {
        match (envelope.status.as_str(), envelope.data) {
            ("success", Some(data)) => Ok(data),
            _ => Err(GatewayError::Api {
                gateway: KIND.to_string(),
                status: 200,
                message: envelope.message,
            }),
        }
    }
}

#[async_trait]
impl PaymentGateway for FlutterwaveGateway {
    fn kind(&self) -> GatewayKind {
        KIND
    }

    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn initiate_charge(&self, request: &ChargeRequest) -> Result<ChargeInitiation, GatewayError> {
        // Prices are in USD; other settlement currencies are not converted here
        let amount = request.amount_usd.round_dp(2);
        let body = PaymentBody {
            tx_ref: &request.reference,
            amount,
            currency: &self.currency,
            redirect_url: &request.callback_url,
            customer: Customer {
                email: &request.customer_email,
            },
            customizations: Customizations {
                title: "FastOTP credits",
                description: &request.description,
            },
            meta: &request.metadata,
        };

        let response = self
            .client
            .post(format!("{}/payments", self.base_url))
            .bearer_auth(self.secret_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(KIND, e))?;

        let link: PaymentLink = Self::unwrap_envelope(handle_response(KIND, response).await?)?;
        debug!(%amount, currency = %self.currency, "Flutterwave payment link created");

        Ok(ChargeInitiation {
            checkout_url: link.link,
            reference: request.reference.clone(),
            amount,
            currency: self.currency.clone(),
        })
    }

    #[instrument(skip(self))]
    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, GatewayError> {
        let response = self
            .client
            .get(format!("{}/transactions/verify_by_reference", self.base_url))
            .query(&[("tx_ref", reference)])
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await
            .map_err(|e| request_error(KIND, e))?;

        let data: TransactionData = Self::unwrap_envelope(handle_response(KIND, response).await?)?;

        Ok(match data.status.as_str() {
            "successful" => ChargeVerification::Success {
                amount: data.amount.round_dp(2),
                currency: data.currency.to_uppercase(),
                metadata: data.meta,
            },
            "failed" | "cancelled" => ChargeVerification::Failed {
                reason: data.processor_response.unwrap_or(data.status),
            },
            _ => ChargeVerification::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> FlutterwaveGateway {
        let config = FlutterwaveConfig {
            secret_key: SecretString::new("FLWSECK_TEST-1".into()),
            base_url: server.uri(),
            currency: "USD".into(),
        };
        FlutterwaveGateway::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_initiate_charge() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments"))
            .and(header("authorization", "Bearer FLWSECK_TEST-1"))
            .and(body_partial_json(json!({
                "tx_ref": "txn-2",
                "currency": "USD",
                "customer": { "email": "ada@example.com" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "message": "Hosted Link",
                "data": { "link": "https://checkout.flutterwave.com/v3/hosted/pay/xyz" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = ChargeRequest {
            reference: "txn-2".into(),
            amount_usd: dec!(40),
            customer_email: "ada@example.com".into(),
            description: "Pro".into(),
            callback_url: "http://localhost:8080/v1/payments/callback/flutterwave".into(),
            metadata: json!({}),
        };
        let initiation = gateway(&server).initiate_charge(&request).await.unwrap();
        assert_eq!(
            initiation.checkout_url,
            "https://checkout.flutterwave.com/v3/hosted/pay/xyz"
        );
        assert_eq!(initiation.reference, "txn-2");
        assert_eq!(initiation.amount, dec!(40));
    }

    #[tokio::test]
    async fn test_verify_by_reference() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transactions/verify_by_reference"))
            .and(query_param("tx_ref", "txn-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "message": "Transaction fetched successfully",
                "data": {
                    "id": 4521,
                    "tx_ref": "txn-2",
                    "status": "successful",
                    "amount": 40.0,
                    "currency": "USD",
                    "meta": null
                }
            })))
            .mount(&server)
            .await;

        match gateway(&server).verify_charge("txn-2").await.unwrap() {
            ChargeVerification::Success { amount, currency, .. } => {
                assert_eq!(amount, dec!(40));
                assert_eq!(currency, "USD");
            }
            other => panic!("unexpected verification: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_verify_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transactions/verify_by_reference"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "message": "Transaction fetched successfully",
                "data": {
                    "status": "failed",
                    "amount": 40.0,
                    "currency": "USD",
                    "processor_response": "Insufficient funds"
                }
            })))
            .mount(&server)
            .await;

        assert_eq!(
            gateway(&server).verify_charge("txn-3").await.unwrap(),
            ChargeVerification::Failed {
                reason: "Insufficient funds".into()
            }
        );
    }

    #[tokio::test]
    async fn test_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transactions/verify_by_reference"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "error",
                "message": "No transaction was found for this id",
                "data": null
            })))
            .mount(&server)
            .await;

        assert!(matches!(
            gateway(&server).verify_charge("missing").await,
            Err(GatewayError::Api { status: 400, .. })
        ));
    }
}
