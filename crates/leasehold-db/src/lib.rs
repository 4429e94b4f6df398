//! Leasehold Persistence Layer
//!
//! Versioned repositories for contracts and payments plus the locks the
//! engines use to serialize writes.
//!
//! # Backends
//!
//! - **Redis**: JSON documents with compare-and-swap writes, shared across nodes
//! - **In-memory**: `DashMap` tables for tests and single-node development
//!
//! # Concurrency
//!
//! - [`KeyedLocks`] serializes read-modify-write on one entity in-process
//! - Repository `update` rejects stale versions across processes
//! - [`DistributedLock`] guards duplicate create submissions

pub mod config;
pub mod error;
pub mod keyed;
pub mod lock;
pub mod repos;

use std::sync::Arc;

use deadpool_redis::{Config as RedisConfig, Pool as RedisPool, Runtime};
use tracing::{info, warn};

pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use keyed::{KeyedGuard, KeyedLocks};
pub use lock::{with_submission_lock, DistributedLock, InMemoryLock, LockToken, RedisLock};
pub use repos::*;

/// Repository and lock handles shared by the engines
#[derive(Clone)]
pub struct Storage {
    pub contracts: Arc<dyn ContractRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub locks: Arc<dyn DistributedLock>,
    redis: Option<RedisPool>,
}

impl Storage {
    /// Process-local storage
    pub fn in_memory() -> Self {
        Self {
            contracts: Arc::new(InMemoryContractRepo::new()),
            payments: Arc::new(InMemoryPaymentRepo::new()),
            locks: Arc::new(InMemoryLock::new()),
            redis: None,
        }
    }

    /// Connect to Redis when configured, otherwise fall back to memory
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        let Some(url) = config.redis_url.as_deref() else {
            warn!("No Redis URL configured, using in-memory storage");
            return Ok(Self::in_memory());
        };

        info!("Connecting to Redis: {}", config::mask_url(url));

        let mut redis_cfg = RedisConfig::from_url(url);
        redis_cfg.pool = Some(deadpool_redis::PoolConfig::new(config.pool_size));
        let pool = redis_cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| DbError::Connection(format!("Redis: {}", e)))?;

        // Test Redis connection
        let mut conn = pool
            .get()
            .await
            .map_err(|e| DbError::Connection(format!("Redis pool: {}", e)))?;
        let _: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DbError::Connection(format!("Redis ping: {}", e)))?;
        drop(conn);

        info!("Connected to Redis");

        let prefix = config.key_prefix.clone();
        Ok(Self {
            contracts: Arc::new(RedisContractRepo::new(pool.clone(), prefix.clone())),
            payments: Arc::new(RedisPaymentRepo::new(pool.clone(), prefix.clone())),
            locks: Arc::new(RedisLock::new(pool.clone(), prefix)),
            redis: Some(pool),
        })
    }

    /// Backend name for health reporting
    pub fn backend(&self) -> &'static str {
        if self.redis.is_some() {
            "redis"
        } else {
            "memory"
        }
    }

    /// Whether the backend answers
    pub async fn health_check(&self) -> bool {
        let Some(pool) = &self.redis else {
            return true;
        };
        async {
            let mut conn = pool.get().await.ok()?;
            let result: Result<String, _> = deadpool_redis::redis::cmd("PING")
                .query_async(&mut conn)
                .await;
            result.ok()
        }
        .await
        .is_some()
    }
}
