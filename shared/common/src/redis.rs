use redis::{aio::ConnectionManager, Client};

use crate::{AppError, RedisConfig};

#[derive(Clone)]
pub struct RedisService {
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &RedisConfig) -> Result<Self, AppError> {
        let client = Client::open(config.connection_string()).map_err(AppError::Redis)?;

        let manager = ConnectionManager::new(client).await.map_err(AppError::Redis)?;

        // Test connection
        let mut conn = manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(AppError::Redis)?;

        tracing::info!("Redis connection established");

        Ok(Self { manager })
    }

    // Advisory locks (SET NX EX). Returns false when another holder owns the key.
    pub async fn acquire_lock(
        &self,
        key: &str,
        owner: &str,
        ttl_seconds: u64,
    ) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(AppError::Redis)?;

        Ok(reply.is_some())
    }

    pub async fn release_lock(&self, key: &str, owner: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let holder: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(AppError::Redis)?;

        // Only the owner may release; an expired lock is already gone.
        if holder.as_deref() == Some(owner) {
            let _: i64 = redis::cmd("DEL")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(AppError::Redis)?;
        }

        Ok(())
    }
}
