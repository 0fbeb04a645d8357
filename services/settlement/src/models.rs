use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use creatorpay_common::AppError;

// Enums

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Subscription,
    Content,
    Tip,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Subscription => "subscription",
            PaymentType::Content => "content",
            PaymentType::Tip => "tip",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "subscription" => Some(PaymentType::Subscription),
            "content" => Some(PaymentType::Content),
            "tip" => Some(PaymentType::Tip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
            PayoutStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(PayoutStatus::Pending),
            "processing" => Some(PayoutStatus::Processing),
            "completed" => Some(PayoutStatus::Completed),
            "failed" => Some(PayoutStatus::Failed),
            "cancelled" => Some(PayoutStatus::Cancelled),
            _ => None,
        }
    }

    /// Dispatch may only start from `pending` or a previously failed attempt.
    pub fn can_begin_processing(&self) -> bool {
        matches!(self, PayoutStatus::Pending | PayoutStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Completed | PayoutStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Processing,
    Completed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Processing => "processing",
            SettlementStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(SettlementStatus::Pending),
            "processing" => Some(SettlementStatus::Processing),
            "completed" => Some(SettlementStatus::Completed),
            _ => None,
        }
    }
}

// Calendar month key for settlements, rendered as "YYYY-MM"

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && year > 0 {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// Half-open UTC window [start, end) covering the calendar month.
    pub fn bounds(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
        let start = Utc
            .with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| AppError::Validation(format!("Invalid month: {}", self)))?;

        let (next_year, next_month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        let end = Utc
            .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| AppError::Validation(format!("Invalid month: {}", self)))?;

        Ok((start, end))
    }

    /// The aggregator only runs over fully-elapsed months.
    pub fn is_fully_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.bounds() {
            Ok((_, end)) => end <= now,
            Err(_) => false,
        }
    }

    /// The month before the given instant, the default target for scheduled runs.
    pub fn previous(now: DateTime<Utc>) -> Self {
        if now.month() == 1 {
            Self { year: now.year() - 1, month: 12 }
        } else {
            Self { year: now.year(), month: now.month() - 1 }
        }
    }
}

impl std::fmt::Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl std::str::FromStr for YearMonth {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::Validation(format!("Invalid year-month: {}", raw));

        let (year, month) = raw.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;

        YearMonth::new(year, month).ok_or_else(invalid)
    }
}

// Validation failures for payout requests; surfaced immediately, never retried.

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayoutError {
    #[error("No payout destination linked to this account")]
    NoDestinationLinked,

    #[error("Payout amount is below the minimum of {minimum}")]
    BelowMinimum { minimum: Decimal },

    #[error("Insufficient balance: {available} available")]
    InsufficientBalance { available: Decimal },
}

impl From<PayoutError> for AppError {
    fn from(err: PayoutError) -> Self {
        AppError::Payout(err.to_string())
    }
}

// Request / response models

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutResponse {
    pub payout_id: Uuid,
    pub creator_id: Uuid,
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub payout_email: String,
    pub status: PayoutStatus,
    pub external_batch_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub creator_id: Uuid,
    pub total_earnings: Decimal,
    pub platform_fee: Decimal,
    pub net_earnings: Decimal,
    pub paid_out: Decimal,
    pub pending_balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub payer_id: Uuid,
    pub creator_id: Uuid,
    pub gross_amount: Decimal,
    pub payment_type: PaymentType,
    pub platform_fee: Decimal,
    pub creator_amount: Decimal,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementResponse {
    pub settlement_id: Uuid,
    pub creator_id: Uuid,
    pub year_month: String,
    pub subscription_earnings: Decimal,
    pub content_earnings: Decimal,
    pub tip_earnings: Decimal,
    pub platform_fee: Decimal,
    pub total_earnings: Decimal,
    pub net_amount: Decimal,
    pub status: SettlementStatus,
    pub payout_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordPaymentRequest {
    pub payer_id: Uuid,
    pub creator_id: Uuid,
    pub gross_amount: Decimal,
    pub payment_type: PaymentType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateSettlementsRequest {
    pub year_month: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayoutEmailRequest {
    pub payout_email: String,
}

// Database rows (status kept as TEXT, parsed at the edge)

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PayoutDb {
    pub payout_id: Uuid,
    pub creator_id: Uuid,
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub payout_email: String,
    pub status: String,
    pub external_batch_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutDb {
    pub fn status(&self) -> Result<PayoutStatus, AppError> {
        PayoutStatus::parse(&self.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown payout status: {}", self.status)))
    }

    pub fn into_response(self) -> Result<PayoutResponse, AppError> {
        let status = self.status()?;
        Ok(PayoutResponse {
            payout_id: self.payout_id,
            creator_id: self.creator_id,
            amount: self.amount,
            fee: self.fee,
            net_amount: self.net_amount,
            payout_email: self.payout_email,
            status,
            external_batch_id: self.external_batch_id,
            error_message: self.error_message,
            created_at: self.created_at,
            processed_at: self.processed_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SettlementDb {
    pub settlement_id: Uuid,
    pub creator_id: Uuid,
    pub year_month: String,
    pub subscription_earnings: Decimal,
    pub content_earnings: Decimal,
    pub tip_earnings: Decimal,
    pub platform_fee: Decimal,
    pub total_earnings: Decimal,
    pub net_amount: Decimal,
    pub status: String,
    pub payout_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementDb {
    pub fn status(&self) -> Result<SettlementStatus, AppError> {
        SettlementStatus::parse(&self.status).ok_or_else(|| {
            AppError::Internal(format!("Unknown settlement status: {}", self.status))
        })
    }

    pub fn into_response(self) -> Result<SettlementResponse, AppError> {
        let status = self.status()?;
        Ok(SettlementResponse {
            settlement_id: self.settlement_id,
            creator_id: self.creator_id,
            year_month: self.year_month,
            subscription_earnings: self.subscription_earnings,
            content_earnings: self.content_earnings,
            tip_earnings: self.tip_earnings,
            platform_fee: self.platform_fee,
            total_earnings: self.total_earnings,
            net_amount: self.net_amount,
            status,
            payout_id: self.payout_id,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_month_parses_and_displays() {
        let ym: YearMonth = "2025-07".parse().unwrap();
        assert_eq!(ym, YearMonth::new(2025, 7).unwrap());
        assert_eq!(ym.to_string(), "2025-07");

        assert!("2025-13".parse::<YearMonth>().is_err());
        assert!("2025-7".parse::<YearMonth>().is_err());
        assert!("garbage".parse::<YearMonth>().is_err());
    }

    #[test]
    fn year_month_bounds_are_half_open() {
        let ym: YearMonth = "2025-12".parse().unwrap();
        let (start, end) = ym.bounds().unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn current_month_is_not_fully_elapsed() {
        let now = Utc.with_ymd_and_hms(2025, 7, 15, 12, 0, 0).unwrap();
        let current = YearMonth::new(2025, 7).unwrap();
        let previous = YearMonth::new(2025, 6).unwrap();

        assert!(!current.is_fully_elapsed(now));
        assert!(previous.is_fully_elapsed(now));
        assert_eq!(YearMonth::previous(now), previous);
    }

    #[test]
    fn previous_month_rolls_over_year() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(YearMonth::previous(now), YearMonth::new(2025, 12).unwrap());
    }

    #[test]
    fn payout_status_transitions() {
        assert!(PayoutStatus::Pending.can_begin_processing());
        assert!(PayoutStatus::Failed.can_begin_processing());
        assert!(!PayoutStatus::Processing.can_begin_processing());
        assert!(!PayoutStatus::Completed.can_begin_processing());
        assert!(!PayoutStatus::Cancelled.can_begin_processing());

        assert!(PayoutStatus::Completed.is_terminal());
        assert!(PayoutStatus::Cancelled.is_terminal());
        assert!(!PayoutStatus::Failed.is_terminal());
    }

    #[test]
    fn status_text_round_trips() {
        for status in [
            PayoutStatus::Pending,
            PayoutStatus::Processing,
            PayoutStatus::Completed,
            PayoutStatus::Failed,
            PayoutStatus::Cancelled,
        ] {
            assert_eq!(PayoutStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PayoutStatus::parse("paid"), None);
    }
}
