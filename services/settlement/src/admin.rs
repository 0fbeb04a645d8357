use sqlx::PgPool;
use uuid::Uuid;

use creatorpay_common::AppError;
use crate::{
    dispatcher::{DispatchOutcome, PayoutDispatcher},
    models::{PayoutDb, PayoutResponse, PayoutStatus, SettlementDb, SettlementResponse},
};

/// Review queue for operators. Approval hands the payout to the dispatcher;
/// rejection cancels it before any money moves. The admin-only middleware
/// gates every route that reaches this service.
#[derive(Clone)]
pub struct AdminReviewService {
    db_pool: PgPool,
    dispatcher: PayoutDispatcher,
}

impl AdminReviewService {
    pub fn new(db_pool: PgPool, dispatcher: PayoutDispatcher) -> Self {
        Self { db_pool, dispatcher }
    }

    pub async fn list_payouts(
        &self,
        status: Option<PayoutStatus>,
    ) -> Result<Vec<PayoutResponse>, AppError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, PayoutDb>(
                    "SELECT * FROM payouts WHERE status = $1 ORDER BY created_at DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.db_pool)
                .await
            }
            None => {
                sqlx::query_as::<_, PayoutDb>("SELECT * FROM payouts ORDER BY created_at DESC")
                    .fetch_all(&self.db_pool)
                    .await
            }
        }
        .map_err(AppError::Database)?;

        rows.into_iter().map(|row| row.into_response()).collect()
    }

    pub async fn list_pending_settlements(&self) -> Result<Vec<SettlementResponse>, AppError> {
        let rows = sqlx::query_as::<_, SettlementDb>(
            r#"
            SELECT * FROM monthly_settlements
            WHERE status = 'pending'
            ORDER BY year_month DESC, creator_id
            "#,
        )
        .fetch_all(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        rows.into_iter().map(|row| row.into_response()).collect()
    }

    pub async fn approve(&self, payout_id: Uuid) -> Result<DispatchOutcome, AppError> {
        tracing::info!("Admin approved payout {}", payout_id);
        self.dispatcher.dispatch(payout_id).await
    }

    pub async fn reject(&self, payout_id: Uuid, reason: &str) -> Result<(), AppError> {
        if reason.trim().is_empty() {
            return Err(AppError::Validation(
                "A rejection reason is required".to_string(),
            ));
        }
        tracing::info!("Admin rejected payout {}", payout_id);
        self.dispatcher.cancel(payout_id, reason).await
    }
}
