use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use creatorpay_common::AppError;
use crate::models::BalanceResponse;

/// Derived view over the payment and payout facts. Recomputed on every read;
/// there is no stored balance that could drift from the underlying rows.
#[derive(Clone)]
pub struct LedgerService {
    db_pool: PgPool,
}

#[derive(Debug, Clone, Copy)]
pub struct EarningsTotals {
    pub gross: Decimal,
    pub platform_fee: Decimal,
    pub net: Decimal,
}

pub async fn completed_earnings<'e, E>(
    executor: E,
    creator_id: Uuid,
) -> Result<EarningsTotals, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let (gross, platform_fee, net) = sqlx::query_as::<_, (Decimal, Decimal, Decimal)>(
        r#"
        SELECT
            COALESCE(SUM(gross_amount), 0),
            COALESCE(SUM(platform_fee), 0),
            COALESCE(SUM(creator_amount), 0)
        FROM payments
        WHERE creator_id = $1 AND status = 'completed'
        "#,
    )
    .bind(creator_id)
    .fetch_one(executor)
    .await
    .map_err(AppError::Database)?;

    Ok(EarningsTotals { gross, platform_fee, net })
}

/// Only completed payouts count as paid out; pending and failed ones never do.
pub async fn completed_payout_total<'e, E>(executor: E, creator_id: Uuid) -> Result<Decimal, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(net_amount), 0)
        FROM payouts
        WHERE creator_id = $1 AND status = 'completed'
        "#,
    )
    .bind(creator_id)
    .fetch_one(executor)
    .await
    .map_err(AppError::Database)
}

/// Requested amounts of payouts still in flight. These reserve balance at
/// request time so two requests cannot spend the same earnings.
pub async fn open_payout_reserved<'e, E>(executor: E, creator_id: Uuid) -> Result<Decimal, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(amount), 0)
        FROM payouts
        WHERE creator_id = $1 AND status IN ('pending', 'processing')
        "#,
    )
    .bind(creator_id)
    .fetch_one(executor)
    .await
    .map_err(AppError::Database)
}

pub fn floor_at_zero(amount: Decimal) -> Decimal {
    if amount < Decimal::ZERO {
        Decimal::ZERO
    } else {
        amount
    }
}

pub fn pending_balance(net_earnings: Decimal, paid_out: Decimal) -> Decimal {
    floor_at_zero(net_earnings - paid_out)
}

impl LedgerService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn balance(&self, creator_id: Uuid) -> Result<BalanceResponse, AppError> {
        let earnings = completed_earnings(&self.db_pool, creator_id).await?;
        let paid_out = completed_payout_total(&self.db_pool, creator_id).await?;

        Ok(BalanceResponse {
            creator_id,
            total_earnings: earnings.gross,
            platform_fee: earnings.platform_fee,
            net_earnings: earnings.net,
            paid_out,
            pending_balance: pending_balance(earnings.net, paid_out),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn pending_balance_is_net_minus_paid_out() {
        assert_eq!(pending_balance(dec("24.50"), dec("10.00")), dec("14.50"));
        assert_eq!(pending_balance(dec("24.50"), Decimal::ZERO), dec("24.50"));
    }

    #[test]
    fn pending_balance_never_goes_negative() {
        assert_eq!(pending_balance(dec("5.00"), dec("7.00")), Decimal::ZERO);
        assert_eq!(pending_balance(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
    }
}
