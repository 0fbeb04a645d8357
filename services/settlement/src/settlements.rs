use std::collections::BTreeMap;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use creatorpay_common::{AppError, RedisService};
use crate::{
    models::{PaymentType, SettlementDb, SettlementResponse, SettlementStatus, YearMonth},
    payouts::PayoutRequestService,
};

const GENERATE_LOCK_TTL_SECONDS: u64 = 300;

/// Monthly close over the payment facts. Settlement rows are a materialized
/// summary per (creator, month); the ledger stays authoritative and a
/// regeneration simply overwrites rows that have not been paid yet.
#[derive(Clone)]
pub struct SettlementService {
    db_pool: PgPool,
    redis: RedisService,
    payout_service: PayoutRequestService,
    min_payout_amount: Decimal,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EarningsBucket {
    pub creator_id: Uuid,
    pub payment_type: String,
    pub platform_fee: Decimal,
    pub creator_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementDraft {
    pub creator_id: Uuid,
    pub subscription_earnings: Decimal,
    pub content_earnings: Decimal,
    pub tip_earnings: Decimal,
    pub platform_fee: Decimal,
}

impl SettlementDraft {
    /// What the creator earned across every bucket; fees were already removed
    /// per payment, so this is also the payable net.
    pub fn total_earnings(&self) -> Decimal {
        self.subscription_earnings + self.content_earnings + self.tip_earnings
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatorFailure {
    pub creator_id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub year_month: String,
    pub creators_settled: usize,
    pub failures: Vec<CreatorFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingReport {
    pub year_month: String,
    pub payouts_requested: usize,
    pub failures: Vec<CreatorFailure>,
}

/// A settlement may spawn at most one payout: it must still be pending and
/// unlinked when claimed. The claim itself is a conditional update on this
/// same predicate, so concurrent runs resolve to a single winner.
pub fn can_spawn_payout(status: SettlementStatus, payout_id: Option<Uuid>) -> bool {
    status == SettlementStatus::Pending && payout_id.is_none()
}

/// Pending rows whose creator has no surviving facts in the month. A
/// regeneration zeroes these so a fully-refunded month cannot keep stale
/// totals.
pub fn zero_targets(pending: &[Uuid], drafted: &[Uuid]) -> Vec<Uuid> {
    pending
        .iter()
        .filter(|creator| !drafted.contains(creator))
        .copied()
        .collect()
}

/// Folds per-type aggregates into one draft per creator. Keyed by a BTreeMap
/// so the output order is stable.
pub fn fold_settlements(rows: Vec<EarningsBucket>) -> Vec<SettlementDraft> {
    let mut drafts: BTreeMap<Uuid, SettlementDraft> = BTreeMap::new();

    for row in rows {
        let Some(payment_type) = PaymentType::parse(&row.payment_type) else {
            tracing::warn!(
                "Skipping unknown payment type {:?} for creator {}",
                row.payment_type,
                row.creator_id
            );
            continue;
        };

        let draft = drafts.entry(row.creator_id).or_insert(SettlementDraft {
            creator_id: row.creator_id,
            subscription_earnings: Decimal::ZERO,
            content_earnings: Decimal::ZERO,
            tip_earnings: Decimal::ZERO,
            platform_fee: Decimal::ZERO,
        });

        match payment_type {
            PaymentType::Subscription => draft.subscription_earnings += row.creator_amount,
            PaymentType::Content => draft.content_earnings += row.creator_amount,
            PaymentType::Tip => draft.tip_earnings += row.creator_amount,
        }
        draft.platform_fee += row.platform_fee;
    }

    drafts.into_values().collect()
}

impl SettlementService {
    pub fn new(
        db_pool: PgPool,
        redis: RedisService,
        payout_service: PayoutRequestService,
        min_payout_amount: Decimal,
    ) -> Self {
        Self { db_pool, redis, payout_service, min_payout_amount }
    }

    /// Builds or rebuilds the settlement rows for one fully-elapsed month.
    ///
    /// Runs under a distributed lock so two schedulers cannot interleave, and
    /// isolates failures per creator: one bad row never aborts the month.
    pub async fn generate(&self, year_month: YearMonth) -> Result<GenerationReport, AppError> {
        if !year_month.is_fully_elapsed(Utc::now()) {
            return Err(AppError::Validation(format!(
                "Month {} has not fully elapsed",
                year_month
            )));
        }

        let lock_key = format!("settlement:generate:{}", year_month);
        let lock_owner = Uuid::new_v4().to_string();
        let acquired = self
            .redis
            .acquire_lock(&lock_key, &lock_owner, GENERATE_LOCK_TTL_SECONDS)
            .await?;
        if !acquired {
            return Err(AppError::Conflict(format!(
                "Settlement generation for {} is already running",
                year_month
            )));
        }

        let result = self.generate_locked(year_month).await;

        if let Err(err) = self.redis.release_lock(&lock_key, &lock_owner).await {
            tracing::warn!("Failed to release settlement lock {}: {}", lock_key, err);
        }

        result
    }

    async fn generate_locked(&self, year_month: YearMonth) -> Result<GenerationReport, AppError> {
        let (start, end) = year_month.bounds()?;

        let rows = sqlx::query_as::<_, EarningsBucket>(
            r#"
            SELECT creator_id, payment_type,
                   COALESCE(SUM(platform_fee), 0) AS platform_fee,
                   COALESCE(SUM(creator_amount), 0) AS creator_amount
            FROM payments
            WHERE status = 'completed' AND created_at >= $1 AND created_at < $2
            GROUP BY creator_id, payment_type
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        let drafts = fold_settlements(rows);

        let pending_creators: Vec<Uuid> = sqlx::query_scalar(
            "SELECT creator_id FROM monthly_settlements WHERE year_month = $1 AND status = 'pending'",
        )
        .bind(year_month.to_string())
        .fetch_all(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        let drafted: Vec<Uuid> = drafts.iter().map(|draft| draft.creator_id).collect();
        let stale = zero_targets(&pending_creators, &drafted);
        if !stale.is_empty() {
            sqlx::query(
                r#"
                UPDATE monthly_settlements
                SET subscription_earnings = 0, content_earnings = 0, tip_earnings = 0,
                    platform_fee = 0, total_earnings = 0, net_amount = 0, updated_at = NOW()
                WHERE year_month = $1 AND status = 'pending' AND creator_id = ANY($2)
                "#,
            )
            .bind(year_month.to_string())
            .bind(&stale)
            .execute(&self.db_pool)
            .await
            .map_err(AppError::Database)?;
            tracing::info!(
                "Zeroed {} settlements with no remaining facts in {}",
                stale.len(),
                year_month
            );
        }

        let mut failures = Vec::new();
        let mut settled = 0usize;

        for draft in drafts {
            match self.upsert_draft(&draft, year_month).await {
                Ok(()) => settled += 1,
                Err(err) => {
                    tracing::error!(
                        "Settlement for creator {} in {} failed: {}",
                        draft.creator_id,
                        year_month,
                        err
                    );
                    failures.push(CreatorFailure {
                        creator_id: draft.creator_id,
                        message: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Generated settlements for {}: {} creators, {} failures",
            year_month,
            settled,
            failures.len()
        );

        Ok(GenerationReport {
            year_month: year_month.to_string(),
            creators_settled: settled,
            failures,
        })
    }

    /// Upsert keyed on (creator_id, year_month). Only `pending` rows may be
    /// overwritten; a settlement already tied to a payout is immutable.
    async fn upsert_draft(
        &self,
        draft: &SettlementDraft,
        year_month: YearMonth,
    ) -> Result<(), AppError> {
        let total = draft.total_earnings();

        sqlx::query(
            r#"
            INSERT INTO monthly_settlements
                (settlement_id, creator_id, year_month, subscription_earnings,
                 content_earnings, tip_earnings, platform_fee, total_earnings,
                 net_amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8, 'pending', NOW(), NOW())
            ON CONFLICT (creator_id, year_month) DO UPDATE SET
                subscription_earnings = EXCLUDED.subscription_earnings,
                content_earnings = EXCLUDED.content_earnings,
                tip_earnings = EXCLUDED.tip_earnings,
                platform_fee = EXCLUDED.platform_fee,
                total_earnings = EXCLUDED.total_earnings,
                net_amount = EXCLUDED.net_amount,
                updated_at = NOW()
            WHERE monthly_settlements.status = 'pending'
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(draft.creator_id)
        .bind(year_month.to_string())
        .bind(draft.subscription_earnings)
        .bind(draft.content_earnings)
        .bind(draft.tip_earnings)
        .bind(draft.platform_fee)
        .bind(total)
        .execute(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Turns pending settlements into payout requests. Settlements below the
    /// payout minimum are left pending and roll into a later month's balance.
    pub async fn process_pending(&self, year_month: YearMonth) -> Result<ProcessingReport, AppError> {
        let pending = sqlx::query_as::<_, SettlementDb>(
            r#"
            SELECT * FROM monthly_settlements
            WHERE year_month = $1 AND status = 'pending'
              AND payout_id IS NULL AND net_amount >= $2
            ORDER BY creator_id
            "#,
        )
        .bind(year_month.to_string())
        .bind(self.min_payout_amount)
        .fetch_all(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        let mut failures = Vec::new();
        let mut requested = 0usize;

        for settlement in pending {
            if !can_spawn_payout(settlement.status()?, settlement.payout_id) {
                continue;
            }

            // Claim the settlement before any payout exists. A miss means a
            // concurrent run already took it, so this run never requests a
            // second payout for the same settlement.
            let claimed = sqlx::query(
                r#"
                UPDATE monthly_settlements
                SET status = 'processing', updated_at = NOW()
                WHERE settlement_id = $1 AND status = 'pending' AND payout_id IS NULL
                "#,
            )
            .bind(settlement.settlement_id)
            .execute(&self.db_pool)
            .await
            .map_err(AppError::Database)?;

            if claimed.rows_affected() == 0 {
                continue;
            }

            match self
                .payout_service
                .request_payout(settlement.creator_id, settlement.net_amount)
                .await
            {
                Ok(payout) => {
                    sqlx::query(
                        r#"
                        UPDATE monthly_settlements
                        SET payout_id = $2, updated_at = NOW()
                        WHERE settlement_id = $1 AND payout_id IS NULL
                        "#,
                    )
                    .bind(settlement.settlement_id)
                    .bind(payout.payout_id)
                    .execute(&self.db_pool)
                    .await
                    .map_err(AppError::Database)?;
                    requested += 1;
                }
                Err(err) => {
                    // Release the claim so the settlement stays eligible.
                    sqlx::query(
                        r#"
                        UPDATE monthly_settlements
                        SET status = 'pending', updated_at = NOW()
                        WHERE settlement_id = $1 AND status = 'processing' AND payout_id IS NULL
                        "#,
                    )
                    .bind(settlement.settlement_id)
                    .execute(&self.db_pool)
                    .await
                    .map_err(AppError::Database)?;

                    tracing::warn!(
                        "Payout request for settled creator {} failed: {}",
                        settlement.creator_id,
                        err
                    );
                    failures.push(CreatorFailure {
                        creator_id: settlement.creator_id,
                        message: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Processed settlements for {}: {} payouts requested, {} failures",
            year_month,
            requested,
            failures.len()
        );

        Ok(ProcessingReport {
            year_month: year_month.to_string(),
            payouts_requested: requested,
            failures,
        })
    }

    /// Marks settlements completed once their payout has completed.
    pub async fn sync_completed(&self) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE monthly_settlements
            SET status = 'completed', updated_at = NOW()
            WHERE status = 'processing'
              AND payout_id IN (SELECT payout_id FROM payouts WHERE status = 'completed')
            "#,
        )
        .execute(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        if result.rows_affected() > 0 {
            tracing::info!("Marked {} settlements completed", result.rows_affected());
        }
        Ok(result.rows_affected())
    }

    /// Scheduled entry point: settle the previous month end-to-end.
    pub async fn run_scheduled(&self) -> Result<(), AppError> {
        let year_month = YearMonth::previous(Utc::now());
        self.generate(year_month).await?;
        self.process_pending(year_month).await?;
        self.sync_completed().await?;
        Ok(())
    }

    pub async fn list_for_creator(
        &self,
        creator_id: Uuid,
    ) -> Result<Vec<SettlementResponse>, AppError> {
        let rows = sqlx::query_as::<_, SettlementDb>(
            "SELECT * FROM monthly_settlements WHERE creator_id = $1 ORDER BY year_month DESC",
        )
        .bind(creator_id)
        .fetch_all(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        rows.into_iter().map(|row| row.into_response()).collect()
    }

    pub async fn list_for_month(
        &self,
        year_month: YearMonth,
    ) -> Result<Vec<SettlementResponse>, AppError> {
        let rows = sqlx::query_as::<_, SettlementDb>(
            "SELECT * FROM monthly_settlements WHERE year_month = $1 ORDER BY creator_id",
        )
        .bind(year_month.to_string())
        .fetch_all(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        rows.into_iter().map(|row| row.into_response()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn bucket(creator: Uuid, payment_type: &str, fee: &str, amount: &str) -> EarningsBucket {
        EarningsBucket {
            creator_id: creator,
            payment_type: payment_type.to_string(),
            platform_fee: dec(fee),
            creator_amount: dec(amount),
        }
    }

    #[test]
    fn fold_buckets_earnings_by_payment_type() {
        let creator = Uuid::new_v4();
        let drafts = fold_settlements(vec![
            bucket(creator, "subscription", "6.00", "14.00"),
            bucket(creator, "content", "3.00", "7.00"),
            bucket(creator, "tip", "1.50", "3.50"),
        ]);

        assert_eq!(drafts.len(), 1);
        let draft = &drafts[0];
        assert_eq!(draft.subscription_earnings, dec("14.00"));
        assert_eq!(draft.content_earnings, dec("7.00"));
        assert_eq!(draft.tip_earnings, dec("3.50"));
        assert_eq!(draft.platform_fee, dec("10.50"));
        assert_eq!(draft.total_earnings(), dec("24.50"));
    }

    #[test]
    fn fold_keeps_creators_separate() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let drafts = fold_settlements(vec![
            bucket(a, "subscription", "3.00", "7.00"),
            bucket(b, "tip", "0.30", "0.70"),
        ]);

        assert_eq!(drafts.len(), 2);
        let total: Decimal = drafts.iter().map(|d| d.total_earnings()).sum();
        assert_eq!(total, dec("7.70"));
    }

    #[test]
    fn fold_skips_unknown_payment_types() {
        let creator = Uuid::new_v4();
        let drafts = fold_settlements(vec![
            bucket(creator, "subscription", "3.00", "7.00"),
            bucket(creator, "chargeback", "1.00", "2.00"),
        ]);

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].total_earnings(), dec("7.00"));
        assert_eq!(drafts[0].platform_fee, dec("3.00"));
    }

    #[test]
    fn only_unlinked_pending_settlements_spawn_payouts() {
        assert!(can_spawn_payout(SettlementStatus::Pending, None));

        // Already linked, or past pending: a second payout must never start.
        assert!(!can_spawn_payout(SettlementStatus::Pending, Some(Uuid::new_v4())));
        assert!(!can_spawn_payout(SettlementStatus::Processing, None));
        assert!(!can_spawn_payout(SettlementStatus::Processing, Some(Uuid::new_v4())));
        assert!(!can_spawn_payout(SettlementStatus::Completed, Some(Uuid::new_v4())));
    }

    #[test]
    fn regeneration_zeroes_rows_without_surviving_facts() {
        let kept = Uuid::new_v4();
        let refunded_away = Uuid::new_v4();

        let targets = zero_targets(&[kept, refunded_away], &[kept]);
        assert_eq!(targets, vec![refunded_away]);
    }

    #[test]
    fn a_fully_refunded_month_zeroes_every_pending_row() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let targets = zero_targets(&[a, b], &[]);
        assert_eq!(targets.len(), 2);

        assert!(zero_targets(&[], &[a]).is_empty());
    }

    #[test]
    fn a_creator_with_one_bucket_settles_only_that_bucket() {
        let creator = Uuid::new_v4();
        let drafts = fold_settlements(vec![bucket(creator, "tip", "0.60", "1.40")]);

        let draft = &drafts[0];
        assert_eq!(draft.subscription_earnings, Decimal::ZERO);
        assert_eq!(draft.content_earnings, Decimal::ZERO);
        assert_eq!(draft.tip_earnings, dec("1.40"));
    }
}
