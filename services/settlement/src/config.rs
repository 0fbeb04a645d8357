use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;

use creatorpay_common::{DatabaseConfig, JwtConfig, RedisConfig, ServerConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub engine: EngineConfig,
    pub paypal: PayPalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub platform_fee_percent: Decimal,
    pub min_payout_amount: Decimal,
    pub currency: String,
    /// Payouts stuck in `processing` longer than this are reconciliation candidates.
    pub processing_stale_minutes: i64,
    pub settlement_cron: String,
    pub reconcile_cron: String,
    pub scheduler_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            server: ServerConfig {
                host: std::env::var("SETTLEMENT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("SETTLEMENT_PORT")
                    .unwrap_or_else(|_| "8006".to_string())
                    .parse()
                    .unwrap_or(8006),
                cors_origins: std::env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
            },
            database: DatabaseConfig {
                host: std::env::var("DATABASE_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: std::env::var("DATABASE_PORT")
                    .unwrap_or_else(|_| "5432".to_string())
                    .parse()
                    .unwrap_or(5432),
                username: std::env::var("DATABASE_USERNAME")
                    .unwrap_or_else(|_| "creatorpay_user".to_string()),
                password: std::env::var("DATABASE_PASSWORD")
                    .unwrap_or_else(|_| "creatorpay_password".to_string()),
                database: std::env::var("DATABASE_NAME")
                    .unwrap_or_else(|_| "creatorpay".to_string()),
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
            redis: RedisConfig {
                host: std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: std::env::var("REDIS_PORT")
                    .unwrap_or_else(|_| "6379".to_string())
                    .parse()
                    .unwrap_or(6379),
                password: std::env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty()),
                database: std::env::var("REDIS_DATABASE")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3),
            },
            jwt: JwtConfig {
                secret: std::env::var("JWT_SECRET")
                    .unwrap_or_else(|_| "dev-secret-key-change-in-production".to_string()),
                expiration_hours: std::env::var("JWT_EXPIRATION_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .unwrap_or(24),
                issuer: std::env::var("JWT_ISSUER")
                    .unwrap_or_else(|_| "creatorpay".to_string()),
            },
            engine: EngineConfig {
                platform_fee_percent: std::env::var("PLATFORM_FEE_PERCENT")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or_else(|_| Decimal::new(30, 0)), // 30%
                min_payout_amount: std::env::var("MIN_PAYOUT_AMOUNT")
                    .unwrap_or_else(|_| "10.00".to_string())
                    .parse()
                    .unwrap_or_else(|_| Decimal::new(1000, 2)), // $10.00
                currency: std::env::var("PAYOUT_CURRENCY").unwrap_or_else(|_| "USD".to_string()),
                processing_stale_minutes: std::env::var("PROCESSING_STALE_MINUTES")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                settlement_cron: std::env::var("SETTLEMENT_CRON")
                    .unwrap_or_else(|_| "0 0 2 1 * *".to_string()), // 02:00 on the 1st
                reconcile_cron: std::env::var("RECONCILE_CRON")
                    .unwrap_or_else(|_| "0 */10 * * * *".to_string()), // every 10 minutes
                scheduler_enabled: std::env::var("SCHEDULER_ENABLED")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .unwrap_or(true),
            },
            paypal: PayPalConfig {
                client_id: std::env::var("PAYPAL_CLIENT_ID")
                    .unwrap_or_else(|_| "paypal-client-id".to_string()),
                client_secret: std::env::var("PAYPAL_CLIENT_SECRET")
                    .unwrap_or_else(|_| "paypal-client-secret".to_string()),
                base_url: std::env::var("PAYPAL_BASE_URL")
                    .unwrap_or_else(|_| "https://api.sandbox.paypal.com".to_string()),
                request_timeout_seconds: std::env::var("PAYPAL_REQUEST_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "15".to_string())
                    .parse()
                    .unwrap_or(15),
            },
        })
    }
}
