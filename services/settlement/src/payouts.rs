use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use creatorpay_common::AppError;
use crate::{
    fees::{round2, FeeCalculator},
    ledger,
    models::{PayoutDb, PayoutError, PayoutResponse, PayoutStatus},
};

#[derive(Clone)]
pub struct PayoutRequestService {
    db_pool: PgPool,
    fee_calculator: FeeCalculator,
    min_payout_amount: Decimal,
}

/// Ordered validation for a payout request; each failure is distinct and is
/// surfaced to the caller immediately.
pub fn validate_request(
    amount: Decimal,
    minimum: Decimal,
    available: Decimal,
    destination: Option<&str>,
) -> Result<(), PayoutError> {
    if destination.map_or(true, |email| email.is_empty()) {
        return Err(PayoutError::NoDestinationLinked);
    }
    if amount < minimum {
        return Err(PayoutError::BelowMinimum { minimum });
    }
    if amount > available {
        return Err(PayoutError::InsufficientBalance { available });
    }
    Ok(())
}

impl PayoutRequestService {
    pub fn new(db_pool: PgPool, fee_calculator: FeeCalculator, min_payout_amount: Decimal) -> Self {
        Self { db_pool, fee_calculator, min_payout_amount }
    }

    /// Validates and inserts a payout request in `pending` state.
    ///
    /// The creator's users row is locked for the duration of the transaction,
    /// so concurrent requests for the same creator serialize here and re-read
    /// the balance after the lock is granted. Open requests count as reserved
    /// balance, which is what stops two requests from spending the same
    /// earnings.
    pub async fn request_payout(
        &self,
        creator_id: Uuid,
        amount: Decimal,
    ) -> Result<PayoutResponse, AppError> {
        let mut tx = self.db_pool.begin().await.map_err(AppError::Database)?;

        let payout_email: Option<Option<String>> = sqlx::query_scalar(
            "SELECT payout_email FROM users WHERE user_id = $1 FOR UPDATE",
        )
        .bind(creator_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        let payout_email = payout_email
            .ok_or_else(|| AppError::NotFound(format!("Creator {} not found", creator_id)))?;

        let earnings = ledger::completed_earnings(&mut *tx, creator_id).await?;
        let paid_out = ledger::completed_payout_total(&mut *tx, creator_id).await?;
        let reserved = ledger::open_payout_reserved(&mut *tx, creator_id).await?;
        let balance = ledger::pending_balance(earnings.net, paid_out);
        let available = ledger::floor_at_zero(balance - reserved);

        validate_request(amount, self.min_payout_amount, available, payout_email.as_deref())?;

        let payout_email = payout_email.unwrap_or_default();
        let fee = self.fee_calculator.platform_fee(amount);
        let net_amount = round2(amount - fee);
        let payout_id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO payouts
                (payout_id, creator_id, amount, fee, net_amount, payout_email,
                 status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            "#,
        )
        .bind(payout_id)
        .bind(creator_id)
        .bind(amount)
        .bind(fee)
        .bind(net_amount)
        .bind(&payout_email)
        .bind(PayoutStatus::Pending.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;

        tracing::info!(
            "Payout {} requested by creator {}: amount {}, net {}",
            payout_id,
            creator_id,
            amount,
            net_amount
        );

        Ok(PayoutResponse {
            payout_id,
            creator_id,
            amount,
            fee,
            net_amount,
            payout_email,
            status: PayoutStatus::Pending,
            external_batch_id: None,
            error_message: None,
            created_at: now,
            processed_at: None,
        })
    }

    /// Links the payout destination. Dispatch snapshots the email onto each
    /// payout row, so changing it later never affects payouts already made.
    pub async fn set_destination(&self, creator_id: Uuid, email: &str) -> Result<(), AppError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::Validation(
                "Payout email must be a valid email address".to_string(),
            ));
        }

        let result = sqlx::query("UPDATE users SET payout_email = $2 WHERE user_id = $1")
            .bind(creator_id)
            .bind(email)
            .execute(&self.db_pool)
            .await
            .map_err(AppError::Database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Creator {} not found", creator_id)));
        }

        tracing::info!("Creator {} linked a payout destination", creator_id);
        Ok(())
    }

    pub async fn clear_destination(&self, creator_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE users SET payout_email = NULL WHERE user_id = $1")
            .bind(creator_id)
            .execute(&self.db_pool)
            .await
            .map_err(AppError::Database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Creator {} not found", creator_id)));
        }

        tracing::info!("Creator {} unlinked their payout destination", creator_id);
        Ok(())
    }

    pub async fn list_for_creator(&self, creator_id: Uuid) -> Result<Vec<PayoutResponse>, AppError> {
        let rows = sqlx::query_as::<_, PayoutDb>(
            "SELECT * FROM payouts WHERE creator_id = $1 ORDER BY created_at DESC",
        )
        .bind(creator_id)
        .fetch_all(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        rows.into_iter().map(|row| row.into_response()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::pending_balance;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    const MINIMUM: &str = "10.00";

    #[test]
    fn destination_is_checked_first() {
        // Even an otherwise-invalid amount reports the missing destination.
        let err = validate_request(dec("1.00"), dec(MINIMUM), Decimal::ZERO, None).unwrap_err();
        assert_eq!(err, PayoutError::NoDestinationLinked);

        let err =
            validate_request(dec("1.00"), dec(MINIMUM), Decimal::ZERO, Some("")).unwrap_err();
        assert_eq!(err, PayoutError::NoDestinationLinked);
    }

    #[test]
    fn minimum_is_checked_before_balance() {
        let err = validate_request(dec("9.99"), dec(MINIMUM), dec("5.00"), Some("a@b.com"))
            .unwrap_err();
        assert_eq!(err, PayoutError::BelowMinimum { minimum: dec(MINIMUM) });
    }

    #[test]
    fn full_balance_is_payable_but_one_cent_more_is_not() {
        // Earnings from $20 + $10 + $5 at a 30% fee leave $24.50 payable.
        let calc = FeeCalculator::new(dec("30"));
        let net: Decimal = [dec("20.00"), dec("10.00"), dec("5.00")]
            .iter()
            .map(|a| calc.creator_earnings(*a))
            .sum();
        let available = pending_balance(net, Decimal::ZERO);
        assert_eq!(available, dec("24.50"));

        assert!(validate_request(dec("24.50"), dec(MINIMUM), available, Some("a@b.com")).is_ok());

        let err = validate_request(dec("24.51"), dec(MINIMUM), available, Some("a@b.com"))
            .unwrap_err();
        assert_eq!(err, PayoutError::InsufficientBalance { available: dec("24.50") });
    }

    #[test]
    fn open_requests_reserve_balance() {
        // A second request sees the first one's amount subtracted, so two
        // requests that together exceed the balance cannot both pass.
        let balance = dec("24.50");
        let first = dec("20.00");
        assert!(validate_request(first, dec(MINIMUM), balance, Some("a@b.com")).is_ok());

        let available_after_first = crate::ledger::floor_at_zero(balance - first);
        let err = validate_request(dec("10.00"), dec(MINIMUM), available_after_first, Some("a@b.com"))
            .unwrap_err();
        assert_eq!(err, PayoutError::InsufficientBalance { available: dec("4.50") });
    }
}
