use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use creatorpay_auth::{admin_only_middleware, auth_middleware, JwtService};
use crate::{handlers, AppState};

pub fn create_routes(state: AppState, jwt_service: JwtService) -> Router {
    // Operator surface; the admin role check runs after authentication.
    let admin = Router::new()
        .route("/payouts/reconcile", post(handlers::reconcile_payouts))
        .route("/payouts/:payout_id/approve", post(handlers::approve_payout))
        .route("/payouts/:payout_id/reject", post(handlers::reject_payout))
        .route("/settlements/generate", post(handlers::generate_settlements))
        .route("/settlements/process", post(handlers::process_settlements))
        .route("/payments", post(handlers::record_payment))
        .route("/payments/:payment_id/refund", post(handlers::refund_payment))
        .layer(middleware::from_fn(admin_only_middleware));

    let protected = Router::new()
        .route("/balance", get(handlers::get_balance))
        .route(
            "/payouts",
            post(handlers::request_payout).get(handlers::list_payouts),
        )
        .route("/settlements", get(handlers::list_settlements))
        .route(
            "/me/payout-email",
            put(handlers::set_payout_email).delete(handlers::unlink_payout_email),
        )
        .merge(admin)
        .layer(middleware::from_fn_with_state(jwt_service, auth_middleware));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(protected)
        .with_state(state)
}
