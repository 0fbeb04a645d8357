use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use creatorpay_auth::JwtService;
use creatorpay_common::RedisService;
use creatorpay_database::{create_pool, run_migrations};

mod admin;
mod config;
mod dispatcher;
mod fees;
mod gateway;
mod handlers;
mod ledger;
mod models;
mod payments;
mod payouts;
mod routes;
mod settlements;

use admin::AdminReviewService;
use config::SettlementConfig;
use dispatcher::PayoutDispatcher;
use fees::FeeCalculator;
use gateway::{paypal::PayPalGateway, PayoutGateway};
use ledger::LedgerService;
use payments::PaymentService;
use payouts::PayoutRequestService;
use settlements::SettlementService;

#[derive(Clone)]
pub struct AppState {
    pub ledger: LedgerService,
    pub payment_service: PaymentService,
    pub payout_service: PayoutRequestService,
    pub dispatcher: PayoutDispatcher,
    pub settlement_service: SettlementService,
    pub admin_service: AdminReviewService,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "creatorpay_settlement=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = SettlementConfig::from_env()?;
    tracing::info!("Starting settlement service on port {}", config.server.port);

    let db_pool = create_pool(&config.database).await?;
    run_migrations(&db_pool).await?;

    let redis_service = RedisService::new(&config.redis).await?;
    let jwt_service = JwtService::new(&config.jwt.secret);

    let fee_calculator = FeeCalculator::new(config.engine.platform_fee_percent);
    let gateway: Arc<dyn PayoutGateway> = Arc::new(PayPalGateway::new(&config.paypal)?);

    let ledger = LedgerService::new(db_pool.clone());
    let payment_service = PaymentService::new(db_pool.clone(), fee_calculator.clone());
    let payout_service = PayoutRequestService::new(
        db_pool.clone(),
        fee_calculator,
        config.engine.min_payout_amount,
    );
    let dispatcher = PayoutDispatcher::new(
        db_pool.clone(),
        gateway,
        config.engine.currency.clone(),
        config.engine.processing_stale_minutes,
    );
    let settlement_service = SettlementService::new(
        db_pool.clone(),
        redis_service,
        payout_service.clone(),
        config.engine.min_payout_amount,
    );
    let admin_service = AdminReviewService::new(db_pool.clone(), dispatcher.clone());

    if config.engine.scheduler_enabled {
        start_scheduler(&config, settlement_service.clone(), dispatcher.clone()).await?;
    }

    let state = AppState {
        ledger,
        payment_service,
        payout_service,
        dispatcher,
        settlement_service,
        admin_service,
    };

    let cors_origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(cors_origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([axum::http::header::AUTHORIZATION, axum::http::header::CONTENT_TYPE]);

    let app = routes::create_routes(state, jwt_service)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Settlement service listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Monthly close and the stale-payout sweep run inside the service process.
async fn start_scheduler(
    config: &SettlementConfig,
    settlement_service: SettlementService,
    dispatcher: PayoutDispatcher,
) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| format!("Failed to create scheduler: {}", e))?;

    let settlement_job = Job::new_async(config.engine.settlement_cron.as_str(), move |_id, _s| {
        let service = settlement_service.clone();
        Box::pin(async move {
            tracing::info!("Running scheduled monthly settlement");
            if let Err(err) = service.run_scheduled().await {
                tracing::error!("Scheduled settlement run failed: {}", err);
            }
        })
    })
    .map_err(|e| format!("Invalid settlement cron: {}", e))?;

    let reconcile_job = Job::new_async(config.engine.reconcile_cron.as_str(), move |_id, _s| {
        let dispatcher = dispatcher.clone();
        Box::pin(async move {
            if let Err(err) = dispatcher.reconcile_stale().await {
                tracing::error!("Scheduled reconciliation failed: {}", err);
            }
        })
    })
    .map_err(|e| format!("Invalid reconcile cron: {}", e))?;

    scheduler
        .add(settlement_job)
        .await
        .map_err(|e| format!("Failed to add settlement job: {}", e))?;
    scheduler
        .add(reconcile_job)
        .await
        .map_err(|e| format!("Failed to add reconcile job: {}", e))?;
    scheduler
        .start()
        .await
        .map_err(|e| format!("Failed to start scheduler: {}", e))?;

    tracing::info!(
        "Scheduler started: settlements [{}], reconciliation [{}]",
        config.engine.settlement_cron,
        config.engine.reconcile_cron
    );

    Ok(())
}
