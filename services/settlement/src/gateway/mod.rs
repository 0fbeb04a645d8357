pub mod paypal;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use creatorpay_common::AppError;

pub use self::paypal::PayPalGateway;

/// A payout instruction for the external processor. The idempotency key makes
/// a retried submission recognizable as the same transfer.
#[derive(Debug, Clone)]
pub struct PayoutInstruction {
    pub idempotency_key: String,
    pub receiver: String,
    pub amount: Decimal,
    pub currency: String,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Processing,
    Success,
    Denied,
    Cancelled,
}

impl BatchStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, BatchStatus::Denied | BatchStatus::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct GatewayBatch {
    pub batch_id: String,
    pub status: BatchStatus,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Payout network authentication failed: {0}")]
    Auth(String),

    #[error("Payout rejected by the network: {0}")]
    Rejected(String),

    #[error("Payout network request timed out")]
    Timeout,

    #[error("Payout network error: {0}")]
    Network(String),

    #[error("Unexpected payout network response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::ExternalService(err.to_string())
    }
}

/// The dispatcher is the only caller; everything else reads and writes rows.
#[async_trait]
pub trait PayoutGateway: Send + Sync {
    /// Submit a transfer. Resubmitting the same idempotency key must not
    /// produce a second real-world transfer.
    async fn submit_payout(
        &self,
        instruction: &PayoutInstruction,
    ) -> Result<GatewayBatch, GatewayError>;

    /// Look up the outcome of a previously submitted transfer by its
    /// idempotency key. `None` means the network never received it.
    async fn lookup_payout(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<GatewayBatch>, GatewayError>;
}
