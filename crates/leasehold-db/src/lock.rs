//! Distributed locks for duplicate-submission protection
//!
//! A lock is a key held for a short TTL by whoever presents the matching
//! token. Backends: Redis (`SET NX PX` + compare-and-delete script) and an
//! in-process map for tests and single-node development.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use deadpool_redis::Pool as RedisPool;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use leasehold_types::LeaseholdError;

use crate::error::DbResult;

/// Proof of lock ownership, required to release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Acquire-with-TTL / release capability, independent of the backend
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Returns `None` when someone else holds the key
    async fn acquire(&self, key: &str, ttl: Duration) -> DbResult<Option<LockToken>>;

    /// Releases only if `token` still owns the key
    async fn release(&self, key: &str, token: &LockToken) -> DbResult<bool>;
}

/// Run `op` while holding `key`. A held key fails fast with
/// `DuplicateSubmission`; the key is released once `op` completes.
pub async fn with_submission_lock<F, T>(
    lock: &dyn DistributedLock,
    key: &str,
    ttl: Duration,
    op: F,
) -> leasehold_types::Result<T>
where
    F: Future<Output = leasehold_types::Result<T>>,
{
    let token = lock
        .acquire(key, ttl)
        .await?
        .ok_or(LeaseholdError::DuplicateSubmission)?;

    let result = op.await;

    match lock.release(key, &token).await {
        Ok(true) => {}
        Ok(false) => debug!(key, "Submission lock expired before release"),
        Err(e) => warn!(key, error = %e, "Failed to release submission lock"),
    }

    result
}

// =============================================================================
// In-memory backend
// =============================================================================

/// Process-local lock table
#[derive(Default)]
pub struct InMemoryLock {
    entries: DashMap<String, (LockToken, Instant)>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> DbResult<Option<LockToken>> {
        let now = Instant::now();
        let token = LockToken::generate();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().1 <= now {
                    held.insert((token.clone(), now + ttl));
                    Ok(Some(token))
                } else {
                    Ok(None)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert((token.clone(), now + ttl));
                Ok(Some(token))
            }
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> DbResult<bool> {
        Ok(self
            .entries
            .remove_if(key, |_, (held, _)| held == token)
            .is_some())
    }
}

// =============================================================================
// Redis backend
// =============================================================================

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed lock shared by every node of a deployment
pub struct RedisLock {
    pool: RedisPool,
    prefix: String,
}

impl RedisLock {
    pub fn new(pool: RedisPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}:lock:{}", self.prefix, key)
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> DbResult<Option<LockToken>> {
        let mut conn = self.pool.get().await?;
        let token = LockToken::generate();

        // SET NX (set if not exists) with millisecond expiry
        let result: Option<String> = deadpool_redis::redis::cmd("SET")
            .arg(self.lock_key(key))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;

        Ok(result.map(|_| token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> DbResult<bool> {
        let mut conn = self.pool.get().await?;
        let deleted: i64 = deadpool_redis::redis::Script::new(RELEASE_SCRIPT)
            .key(self.lock_key(key))
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}
