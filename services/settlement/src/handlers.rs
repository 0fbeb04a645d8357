use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use creatorpay_auth::Claims;
use creatorpay_common::{ApiResponse, AppError};
use crate::{
    dispatcher::{DispatchOutcome, ReconciliationReport},
    models::{
        BalanceResponse, GenerateSettlementsRequest, PaymentResponse, PayoutEmailRequest,
        PayoutRequest, PayoutResponse, PayoutStatus, RecordPaymentRequest, RejectRequest,
        SettlementResponse, YearMonth,
    },
    settlements::{GenerationReport, ProcessingReport},
    AppState,
};

// Admin-only routes are gated by `admin_only_middleware`; this check covers
// the dual-mode listings where only the cross-creator view needs the role.
fn require_admin(claims: &Claims) -> Result<(), AppError> {
    if claims.is_admin() {
        Ok(())
    } else {
        Err(AppError::Authorization("Admin role required".to_string()))
    }
}

pub async fn health_check() -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(json!({
        "service": "settlement",
        "status": "healthy"
    })))
}

// Balance

pub async fn get_balance(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<ApiResponse<BalanceResponse>>, AppError> {
    let creator_id = claims.user_id()?;
    let balance = state.ledger.balance(creator_id).await?;
    Ok(Json(ApiResponse::success(balance)))
}

// Payouts

pub async fn request_payout(
    State(state): State<AppState>,
    claims: Claims,
    Json(request): Json<PayoutRequest>,
) -> Result<Json<ApiResponse<PayoutResponse>>, AppError> {
    let creator_id = claims.user_id()?;
    let payout = state
        .payout_service
        .request_payout(creator_id, request.amount)
        .await?;
    Ok(Json(ApiResponse::success(payout)))
}

#[derive(Debug, Deserialize)]
pub struct PayoutListQuery {
    pub status: Option<String>,
}

/// Creators see their own payouts. Admins may pass `?status=` to review the
/// queue across all creators.
pub async fn list_payouts(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<PayoutListQuery>,
) -> Result<Json<ApiResponse<Vec<PayoutResponse>>>, AppError> {
    if let Some(raw) = query.status {
        require_admin(&claims)?;
        let status = PayoutStatus::parse(&raw)
            .ok_or_else(|| AppError::Validation(format!("Unknown payout status: {}", raw)))?;
        let payouts = state.admin_service.list_payouts(Some(status)).await?;
        return Ok(Json(ApiResponse::success(payouts)));
    }

    let creator_id = claims.user_id()?;
    let payouts = state.payout_service.list_for_creator(creator_id).await?;
    Ok(Json(ApiResponse::success(payouts)))
}

pub async fn approve_payout(
    State(state): State<AppState>,
    Path(payout_id): Path<Uuid>,
) -> Result<Json<ApiResponse<DispatchOutcome>>, AppError> {
    let outcome = state.admin_service.approve(payout_id).await?;
    Ok(Json(ApiResponse::success(outcome)))
}

pub async fn reject_payout(
    State(state): State<AppState>,
    Path(payout_id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    state.admin_service.reject(payout_id, &request.reason).await?;
    Ok(Json(ApiResponse::success(json!({
        "payout_id": payout_id,
        "status": "cancelled"
    }))))
}

pub async fn reconcile_payouts(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ReconciliationReport>>, AppError> {
    let report = state.dispatcher.reconcile_stale().await?;
    Ok(Json(ApiResponse::success(report)))
}

// Settlements

#[derive(Debug, Deserialize)]
pub struct SettlementListQuery {
    pub year_month: Option<String>,
}

/// Creators see their own settlement history. Admins may pass `?year_month=`
/// to review a whole month across creators.
pub async fn list_settlements(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<SettlementListQuery>,
) -> Result<Json<ApiResponse<Vec<SettlementResponse>>>, AppError> {
    if let Some(raw) = query.year_month {
        require_admin(&claims)?;
        let year_month: YearMonth = raw.parse()?;
        let settlements = state.settlement_service.list_for_month(year_month).await?;
        return Ok(Json(ApiResponse::success(settlements)));
    }

    let creator_id = claims.user_id()?;
    let settlements = state
        .settlement_service
        .list_for_creator(creator_id)
        .await?;
    Ok(Json(ApiResponse::success(settlements)))
}

pub async fn generate_settlements(
    State(state): State<AppState>,
    Json(request): Json<GenerateSettlementsRequest>,
) -> Result<Json<ApiResponse<GenerationReport>>, AppError> {
    let year_month: YearMonth = request.year_month.parse()?;
    let report = state.settlement_service.generate(year_month).await?;
    Ok(Json(ApiResponse::success(report)))
}

pub async fn process_settlements(
    State(state): State<AppState>,
    Json(request): Json<GenerateSettlementsRequest>,
) -> Result<Json<ApiResponse<ProcessingReport>>, AppError> {
    let year_month: YearMonth = request.year_month.parse()?;
    let report = state.settlement_service.process_pending(year_month).await?;
    state.settlement_service.sync_completed().await?;
    Ok(Json(ApiResponse::success(report)))
}

// Payout destination

pub async fn set_payout_email(
    State(state): State<AppState>,
    claims: Claims,
    Json(request): Json<PayoutEmailRequest>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let creator_id = claims.user_id()?;
    state
        .payout_service
        .set_destination(creator_id, &request.payout_email)
        .await?;
    Ok(Json(ApiResponse::success(json!({"linked": true}))))
}

pub async fn unlink_payout_email(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let creator_id = claims.user_id()?;
    state.payout_service.clear_destination(creator_id).await?;
    Ok(Json(ApiResponse::success(json!({"linked": false}))))
}

// Payment facts (service-to-service write path, admin capability)

pub async fn record_payment(
    State(state): State<AppState>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<Json<ApiResponse<PaymentResponse>>, AppError> {
    let payment = state
        .payment_service
        .record_payment(
            request.payer_id,
            request.creator_id,
            request.gross_amount,
            request.payment_type,
        )
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    state.payment_service.mark_refunded(payment_id).await?;
    Ok(Json(ApiResponse::success(json!({
        "payment_id": payment_id,
        "status": "refunded"
    }))))
}
