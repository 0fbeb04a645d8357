use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use creatorpay_common::AppError;
use crate::config::PayPalConfig;

use super::{BatchStatus, GatewayBatch, GatewayError, PayoutGateway, PayoutInstruction};

// Refresh the OAuth token this long before the processor would expire it.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct PayPalGateway {
    client: Client,
    config: PayPalConfig,
    token: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
struct SenderBatchHeader<'a> {
    sender_batch_id: &'a str,
    email_subject: &'a str,
}

#[derive(Debug, Serialize)]
struct ItemAmount {
    value: String,
    currency: String,
}

#[derive(Debug, Serialize)]
struct PayoutItem<'a> {
    recipient_type: &'static str,
    amount: ItemAmount,
    receiver: &'a str,
    sender_item_id: &'a str,
    note: &'a str,
}

#[derive(Debug, Serialize)]
struct PayoutsSubmission<'a> {
    sender_batch_header: SenderBatchHeader<'a>,
    items: Vec<PayoutItem<'a>>,
}

#[derive(Debug, Deserialize)]
struct BatchHeader {
    payout_batch_id: String,
    batch_status: String,
}

#[derive(Debug, Deserialize)]
struct PayoutsEnvelope {
    batch_header: BatchHeader,
}

#[derive(Debug, Deserialize)]
struct PayoutsListResponse {
    #[serde(default)]
    items: Vec<PayoutsEnvelope>,
}

#[derive(Debug, Deserialize)]
struct PayPalErrorBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
}

impl PayPalGateway {
    pub fn new(config: &PayPalConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
            token: Arc::new(RwLock::new(None)),
        })
    }

    fn basic_auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.config.client_id, self.config.client_secret);
        let encoded = general_purpose::STANDARD.encode(credentials.as_bytes());
        format!("Basic {}", encoded)
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.value.clone());
            }
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.config.base_url))
            .header("Authorization", self.basic_auth_header())
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Auth(format!("Token request failed: {}", body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *self.token.write().await = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }

    fn map_batch_status(status: &str) -> BatchStatus {
        match status {
            "PENDING" => BatchStatus::Pending,
            "PROCESSING" => BatchStatus::Processing,
            "SUCCESS" => BatchStatus::Success,
            "CANCELED" => BatchStatus::Cancelled,
            _ => BatchStatus::Denied,
        }
    }

    async fn rejection_from(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let body: PayPalErrorBody = response.json().await.unwrap_or(PayPalErrorBody {
            name: String::new(),
            message: String::new(),
        });

        if status == reqwest::StatusCode::UNAUTHORIZED {
            GatewayError::Auth(body.message)
        } else {
            GatewayError::Rejected(format!("{} {}", body.name, body.message))
        }
    }
}

#[async_trait]
impl PayoutGateway for PayPalGateway {
    async fn submit_payout(
        &self,
        instruction: &PayoutInstruction,
    ) -> Result<GatewayBatch, GatewayError> {
        let token = self.access_token().await?;

        let submission = PayoutsSubmission {
            sender_batch_header: SenderBatchHeader {
                sender_batch_id: &instruction.idempotency_key,
                email_subject: "You have a payout from CreatorPay",
            },
            items: vec![PayoutItem {
                recipient_type: "EMAIL",
                amount: ItemAmount {
                    value: format!("{:.2}", instruction.amount),
                    currency: instruction.currency.clone(),
                },
                receiver: &instruction.receiver,
                sender_item_id: &instruction.idempotency_key,
                note: &instruction.note,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/payments/payouts", self.config.base_url))
            .bearer_auth(token)
            .json(&submission)
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(Self::rejection_from(response).await);
        }

        let envelope: PayoutsEnvelope = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(GatewayBatch {
            batch_id: envelope.batch_header.payout_batch_id,
            status: Self::map_batch_status(&envelope.batch_header.batch_status),
        })
    }

    async fn lookup_payout(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<GatewayBatch>, GatewayError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(format!("{}/v1/payments/payouts", self.config.base_url))
            .query(&[("sender_batch_id", idempotency_key)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::rejection_from(response).await);
        }

        let list: PayoutsListResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(list.items.into_iter().next().map(|envelope| GatewayBatch {
            batch_id: envelope.batch_header.payout_batch_id,
            status: Self::map_batch_status(&envelope.batch_header.batch_status),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use rust_decimal::Decimal;

    fn config(base_url: String) -> PayPalConfig {
        PayPalConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            base_url,
            request_timeout_seconds: 5,
        }
    }

    fn instruction() -> PayoutInstruction {
        PayoutInstruction {
            idempotency_key: "payout-11111111-2222-3333-4444-555555555555".to_string(),
            receiver: "creator@example.com".to_string(),
            amount: Decimal::new(2450, 2),
            currency: "USD".to_string(),
            note: "Creator earnings payout".to_string(),
        }
    }

    async fn token_mock(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/v1/oauth2/token")
            .with_status(200)
            .with_body(r#"{"access_token":"test-token","expires_in":3600}"#)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn submits_payout_and_returns_batch_id() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let _payout = server
            .mock("POST", "/v1/payments/payouts")
            .match_header("authorization", "Bearer test-token")
            .match_body(Matcher::PartialJsonString(
                r#"{"sender_batch_header":{"sender_batch_id":"payout-11111111-2222-3333-4444-555555555555"},"items":[{"receiver":"creator@example.com","amount":{"value":"24.50","currency":"USD"}}]}"#.to_string(),
            ))
            .with_status(201)
            .with_body(r#"{"batch_header":{"payout_batch_id":"BATCH-123","batch_status":"PENDING"}}"#)
            .create_async()
            .await;

        let gateway = PayPalGateway::new(&config(server.url())).unwrap();
        let batch = gateway.submit_payout(&instruction()).await.unwrap();

        assert_eq!(batch.batch_id, "BATCH-123");
        assert_eq!(batch.status, BatchStatus::Pending);
    }

    #[tokio::test]
    async fn token_failure_is_an_auth_error() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/v1/oauth2/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client"}"#)
            .create_async()
            .await;

        let gateway = PayPalGateway::new(&config(server.url())).unwrap();
        let err = gateway.submit_payout(&instruction()).await.unwrap_err();

        assert!(matches!(err, GatewayError::Auth(_)));
    }

    #[tokio::test]
    async fn denied_submission_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let _payout = server
            .mock("POST", "/v1/payments/payouts")
            .with_status(422)
            .with_body(r#"{"name":"INSUFFICIENT_FUNDS","message":"Sender account has insufficient funds"}"#)
            .create_async()
            .await;

        let gateway = PayPalGateway::new(&config(server.url())).unwrap();
        let err = gateway.submit_payout(&instruction()).await.unwrap_err();

        match err {
            GatewayError::Rejected(message) => assert!(message.contains("INSUFFICIENT_FUNDS")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn lookup_finds_submitted_batch() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let _lookup = server
            .mock("GET", "/v1/payments/payouts")
            .match_query(Matcher::UrlEncoded(
                "sender_batch_id".to_string(),
                "payout-11111111-2222-3333-4444-555555555555".to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"items":[{"batch_header":{"payout_batch_id":"BATCH-123","batch_status":"SUCCESS"}}]}"#)
            .create_async()
            .await;

        let gateway = PayPalGateway::new(&config(server.url())).unwrap();
        let batch = gateway
            .lookup_payout("payout-11111111-2222-3333-4444-555555555555")
            .await
            .unwrap()
            .expect("batch should be found");

        assert_eq!(batch.batch_id, "BATCH-123");
        assert_eq!(batch.status, BatchStatus::Success);
    }

    #[tokio::test]
    async fn lookup_of_unknown_key_returns_none() {
        let mut server = mockito::Server::new_async().await;
        let _token = token_mock(&mut server).await;
        let _lookup = server
            .mock("GET", "/v1/payments/payouts")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"items":[]}"#)
            .create_async()
            .await;

        let gateway = PayPalGateway::new(&config(server.url())).unwrap();
        let batch = gateway.lookup_payout("payout-unknown").await.unwrap();

        assert!(batch.is_none());
    }
}
