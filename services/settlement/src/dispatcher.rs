use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use creatorpay_common::AppError;
use crate::{
    gateway::{BatchStatus, GatewayBatch, GatewayError, PayoutGateway, PayoutInstruction},
    models::{PayoutDb, PayoutStatus},
};

/// Drives a payout request through the external network.
///
/// State machine: pending -> processing -> completed | failed,
/// pending -> cancelled (rejection), failed -> processing (manual retry).
/// The claim in `dispatch` is a single conditional update, so two workers
/// racing on the same payout resolve without a second network call.
#[derive(Clone)]
pub struct PayoutDispatcher {
    db_pool: PgPool,
    gateway: Arc<dyn PayoutGateway>,
    currency: String,
    stale_minutes: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The network confirmed the transfer settled.
    Completed { batch_id: String },
    /// The network accepted the batch but has not settled it yet. The row
    /// stays in `processing` and the reconciliation sweep finishes it.
    Submitted { batch_id: String },
    /// The payout had already completed earlier; nothing was re-submitted.
    AlreadyCompleted { batch_id: Option<String> },
    /// Another worker holds the payout, or it is mid-flight; back off.
    InFlight,
    /// The network rejected the transfer; safe to retry explicitly later.
    Failed { message: String },
    /// The request timed out with no confirmation. The row stays in
    /// `processing` until reconciliation learns the real outcome.
    AwaitingReconciliation,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationEntry {
    pub payout_id: Uuid,
    pub resolution: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub checked: usize,
    pub entries: Vec<ReconciliationEntry>,
}

/// Idempotency key presented to the external network; stable per payout, so
/// a retried dispatch is recognized as the same transfer.
pub fn idempotency_key(payout_id: Uuid) -> String {
    format!("payout-{}", payout_id)
}

/// How a stale `processing` payout resolves once the network has been asked
/// about its idempotency key. Only a settled batch completes a payout; an
/// unreachable network changes nothing.
#[derive(Debug, PartialEq)]
enum StaleResolution {
    Completed { batch_id: String },
    Failed { message: String },
    StillInFlight { batch_id: String },
    Unknown { message: String },
}

fn resolve_stale(lookup: Result<Option<GatewayBatch>, GatewayError>) -> StaleResolution {
    match lookup {
        Ok(Some(batch)) if batch.status == BatchStatus::Success => StaleResolution::Completed {
            batch_id: batch.batch_id,
        },
        Ok(Some(batch)) if batch.status.is_failure() => StaleResolution::Failed {
            message: format!("Reconciled as {:?} by the payout network", batch.status),
        },
        Ok(Some(batch)) => StaleResolution::StillInFlight {
            batch_id: batch.batch_id,
        },
        // The network never received the submission, so no transfer exists;
        // the payout fails and stays retryable.
        Ok(None) => StaleResolution::Failed {
            message: "Submission never reached the payout network".to_string(),
        },
        Err(err) => StaleResolution::Unknown {
            message: err.to_string(),
        },
    }
}

/// Decides whether dispatch can proceed without touching anything.
fn short_circuit(
    status: PayoutStatus,
    external_batch_id: Option<String>,
) -> Result<Option<DispatchOutcome>, AppError> {
    match status {
        PayoutStatus::Completed => Ok(Some(DispatchOutcome::AlreadyCompleted {
            batch_id: external_batch_id,
        })),
        PayoutStatus::Processing => Ok(Some(DispatchOutcome::InFlight)),
        PayoutStatus::Cancelled => Err(AppError::Conflict(
            "Cancelled payouts cannot be dispatched".to_string(),
        )),
        PayoutStatus::Pending | PayoutStatus::Failed => Ok(None),
    }
}

impl PayoutDispatcher {
    pub fn new(
        db_pool: PgPool,
        gateway: Arc<dyn PayoutGateway>,
        currency: String,
        stale_minutes: i64,
    ) -> Self {
        Self { db_pool, gateway, currency, stale_minutes }
    }

    pub async fn dispatch(&self, payout_id: Uuid) -> Result<DispatchOutcome, AppError> {
        let row = self.load(payout_id).await?;

        if let Some(outcome) = short_circuit(row.status()?, row.external_batch_id.clone())? {
            return Ok(outcome);
        }

        // Claim the payout. A miss means another worker got there first.
        let claimed = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'processing', updated_at = NOW()
            WHERE payout_id = $1 AND status IN ('pending', 'failed')
            "#,
        )
        .bind(payout_id)
        .execute(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        if claimed.rows_affected() == 0 {
            return Ok(DispatchOutcome::InFlight);
        }

        let instruction = PayoutInstruction {
            idempotency_key: idempotency_key(payout_id),
            receiver: row.payout_email.clone(),
            amount: row.net_amount,
            currency: self.currency.clone(),
            note: "CreatorPay earnings payout".to_string(),
        };

        match self.gateway.submit_payout(&instruction).await {
            Ok(batch) if batch.status.is_failure() => {
                let message = format!("Payout network returned {:?}", batch.status);
                self.mark_failed(payout_id, &message).await?;
                Ok(DispatchOutcome::Failed { message })
            }
            Ok(batch) if batch.status == BatchStatus::Success => {
                self.mark_completed(payout_id, &batch.batch_id).await?;
                tracing::info!("Payout {} completed, batch {}", payout_id, batch.batch_id);
                Ok(DispatchOutcome::Completed { batch_id: batch.batch_id })
            }
            Ok(batch) => {
                // Accepted but not settled. Record the batch id and leave the
                // row in `processing`; a later DENIED outcome is still
                // observable through the sweep.
                self.record_submission(payout_id, &batch.batch_id).await?;
                tracing::info!("Payout {} submitted, batch {}", payout_id, batch.batch_id);
                Ok(DispatchOutcome::Submitted { batch_id: batch.batch_id })
            }
            Err(GatewayError::Timeout) => {
                // No confirmation either way; reconciliation will query the
                // network by idempotency key before deciding.
                tracing::warn!("Payout {} timed out in flight, leaving processing", payout_id);
                Ok(DispatchOutcome::AwaitingReconciliation)
            }
            Err(err) => {
                let message = err.to_string();
                self.mark_failed(payout_id, &message).await?;
                tracing::warn!("Payout {} failed: {}", payout_id, message);
                Ok(DispatchOutcome::Failed { message })
            }
        }
    }

    /// Admin rejection: pending -> cancelled, no network call.
    pub async fn cancel(&self, payout_id: Uuid, reason: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'cancelled', error_message = $2, updated_at = NOW()
            WHERE payout_id = $1 AND status = 'pending'
            "#,
        )
        .bind(payout_id)
        .bind(reason)
        .execute(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        if result.rows_affected() == 0 {
            // Distinguish a missing payout from one past the point of rejection.
            self.load(payout_id).await?;
            return Err(AppError::Conflict(
                "Only pending payouts can be rejected".to_string(),
            ));
        }

        tracing::info!("Payout {} cancelled: {}", payout_id, reason);
        Ok(())
    }

    /// Resolves payouts stuck in `processing` beyond the staleness window by
    /// asking the network what actually happened to the idempotency key.
    pub async fn reconcile_stale(&self) -> Result<ReconciliationReport, AppError> {
        let stale = sqlx::query_as::<_, PayoutDb>(
            r#"
            SELECT * FROM payouts
            WHERE status = 'processing'
              AND updated_at < NOW() - ($1::int * INTERVAL '1 minute')
            ORDER BY updated_at
            "#,
        )
        .bind(self.stale_minutes as i32)
        .fetch_all(&self.db_pool)
        .await
        .map_err(AppError::Database)?;

        let mut entries = Vec::new();
        let checked = stale.len();

        for row in stale {
            let payout_id = row.payout_id;
            let key = idempotency_key(payout_id);

            match resolve_stale(self.gateway.lookup_payout(&key).await) {
                StaleResolution::Completed { batch_id } => {
                    self.mark_completed(payout_id, &batch_id).await?;
                    entries.push(ReconciliationEntry {
                        payout_id,
                        resolution: "completed".to_string(),
                        detail: Some(batch_id),
                    });
                }
                StaleResolution::Failed { message } => {
                    self.mark_failed(payout_id, &message).await?;
                    entries.push(ReconciliationEntry {
                        payout_id,
                        resolution: "failed".to_string(),
                        detail: Some(message),
                    });
                }
                StaleResolution::StillInFlight { batch_id } => {
                    // Batch accepted but not settled; leave the row untouched
                    // so the next sweep checks it again.
                    entries.push(ReconciliationEntry {
                        payout_id,
                        resolution: "in_flight".to_string(),
                        detail: Some(batch_id),
                    });
                }
                StaleResolution::Unknown { message } => {
                    tracing::warn!("Reconciliation lookup failed for {}: {}", payout_id, message);
                    entries.push(ReconciliationEntry {
                        payout_id,
                        resolution: "unknown".to_string(),
                        detail: Some(message),
                    });
                }
            }
        }

        if checked > 0 {
            tracing::info!("Reconciled {} stale payouts", checked);
        }

        Ok(ReconciliationReport { checked, entries })
    }

    async fn load(&self, payout_id: Uuid) -> Result<PayoutDb, AppError> {
        sqlx::query_as::<_, PayoutDb>("SELECT * FROM payouts WHERE payout_id = $1")
            .bind(payout_id)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(AppError::Database)?
            .ok_or_else(|| AppError::NotFound(format!("Payout {} not found", payout_id)))
    }

    async fn mark_completed(&self, payout_id: Uuid, batch_id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'completed', external_batch_id = $2, error_message = NULL,
                processed_at = NOW(), updated_at = NOW()
            WHERE payout_id = $1 AND status = 'processing'
            "#,
        )
        .bind(payout_id)
        .bind(batch_id)
        .execute(&self.db_pool)
        .await
        .map_err(AppError::Database)?;
        Ok(())
    }

    async fn record_submission(&self, payout_id: Uuid, batch_id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE payouts
            SET external_batch_id = $2, updated_at = NOW()
            WHERE payout_id = $1 AND status = 'processing'
            "#,
        )
        .bind(payout_id)
        .bind(batch_id)
        .execute(&self.db_pool)
        .await
        .map_err(AppError::Database)?;
        Ok(())
    }

    async fn mark_failed(&self, payout_id: Uuid, message: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE payout_id = $1 AND status = 'processing'
            "#,
        )
        .bind(payout_id)
        .bind(message)
        .execute(&self.db_pool)
        .await
        .map_err(AppError::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_payouts_short_circuit_without_resubmission() {
        let outcome = short_circuit(PayoutStatus::Completed, Some("BATCH-1".to_string()))
            .unwrap()
            .expect("completed must short-circuit");
        match outcome {
            DispatchOutcome::AlreadyCompleted { batch_id } => {
                assert_eq!(batch_id.as_deref(), Some("BATCH-1"));
            }
            other => panic!("expected AlreadyCompleted, got {:?}", other),
        }
    }

    #[test]
    fn processing_payouts_report_in_flight() {
        let outcome = short_circuit(PayoutStatus::Processing, None)
            .unwrap()
            .expect("processing must short-circuit");
        assert!(matches!(outcome, DispatchOutcome::InFlight));
    }

    #[test]
    fn cancelled_payouts_cannot_be_dispatched() {
        assert!(short_circuit(PayoutStatus::Cancelled, None).is_err());
    }

    #[test]
    fn pending_and_failed_proceed_to_claim() {
        assert!(short_circuit(PayoutStatus::Pending, None).unwrap().is_none());
        assert!(short_circuit(PayoutStatus::Failed, None).unwrap().is_none());
    }

    fn batch(status: BatchStatus) -> GatewayBatch {
        GatewayBatch {
            batch_id: "BATCH-9".to_string(),
            status,
        }
    }

    #[test]
    fn only_a_settled_batch_completes_a_stale_payout() {
        assert_eq!(
            resolve_stale(Ok(Some(batch(BatchStatus::Success)))),
            StaleResolution::Completed { batch_id: "BATCH-9".to_string() }
        );

        // Accepted but not settled: no state change, checked again next sweep.
        for status in [BatchStatus::Pending, BatchStatus::Processing] {
            assert_eq!(
                resolve_stale(Ok(Some(batch(status)))),
                StaleResolution::StillInFlight { batch_id: "BATCH-9".to_string() }
            );
        }
    }

    #[test]
    fn denied_and_cancelled_batches_fail_the_payout() {
        for status in [BatchStatus::Denied, BatchStatus::Cancelled] {
            assert!(matches!(
                resolve_stale(Ok(Some(batch(status)))),
                StaleResolution::Failed { .. }
            ));
        }
    }

    #[test]
    fn a_submission_the_network_never_saw_fails_and_stays_retryable() {
        assert!(matches!(resolve_stale(Ok(None)), StaleResolution::Failed { .. }));
    }

    #[test]
    fn an_unreachable_network_resolves_nothing() {
        let resolution = resolve_stale(Err(GatewayError::Network("connection refused".to_string())));
        assert!(matches!(resolution, StaleResolution::Unknown { .. }));
    }

    #[test]
    fn idempotency_key_is_stable_per_payout() {
        let id = Uuid::new_v4();
        assert_eq!(idempotency_key(id), idempotency_key(id));
        assert_ne!(idempotency_key(id), idempotency_key(Uuid::new_v4()));
    }
}
