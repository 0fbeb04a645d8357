use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use creatorpay_common::AppError;
use crate::{
    fees::FeeCalculator,
    models::{PaymentResponse, PaymentStatus, PaymentType},
};

/// Write path for payment facts, used by the capture collaborator. The fee
/// split is computed here, once, so every stored row satisfies
/// platform_fee + creator_amount = gross_amount.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: PgPool,
    fee_calculator: FeeCalculator,
}

impl PaymentService {
    pub fn new(db_pool: PgPool, fee_calculator: FeeCalculator) -> Self {
        Self { db_pool, fee_calculator }
    }

    pub async fn record_payment(
        &self,
        payer_id: Uuid,
        creator_id: Uuid,
        gross_amount: Decimal,
        payment_type: PaymentType,
    ) -> Result<PaymentResponse, AppError> {
        if gross_amount <= Decimal::ZERO {
            return Err(AppError::Validation("Payment amount must be positive".to_string()));
        }

        let split = self.fee_calculator.split(gross_amount);
        let payment_id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO payments
                (payment_id, payer_id, creator_id, gross_amount, payment_type,
                 platform_fee, creator_amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            "#,
        )
        .bind(payment_id)
        .bind(payer_id)
        .bind(creator_id)
        .bind(gross_amount)
        .bind(payment_type.as_str())
        .bind(split.platform_fee)
        .bind(split.creator_amount)
        .bind(PaymentStatus::Completed.as_str())
        .bind(now)
        .execute(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        tracing::info!(
            "Recorded {} payment {} for creator {}: gross {}, fee {}",
            payment_type.as_str(),
            payment_id,
            creator_id,
            gross_amount,
            split.platform_fee
        );

        Ok(PaymentResponse {
            payment_id,
            payer_id,
            creator_id,
            gross_amount,
            payment_type,
            platform_fee: split.platform_fee,
            creator_amount: split.creator_amount,
            status: PaymentStatus::Completed,
            created_at: now,
        })
    }

    /// The only mutation allowed after completion. The refunded row drops out
    /// of every completed-payment sum, which is how the ledger sees the
    /// negative adjustment.
    pub async fn mark_refunded(&self, payment_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'refunded', updated_at = NOW()
            WHERE payment_id = $1 AND status = 'completed'
            "#,
        )
        .bind(payment_id)
        .execute(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Payment {} is not in a refundable state",
                payment_id
            )));
        }

        tracing::info!("Payment {} marked refunded", payment_id);
        Ok(())
    }
}
