//! Storage error types

use leasehold_types::LeaseholdError;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {entity} {id}")]
    VersionConflict { entity: &'static str, id: String },

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<deadpool_redis::PoolError> for DbError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        DbError::Redis(e.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for DbError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        DbError::Redis(e.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<DbError> for LeaseholdError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::VersionConflict { entity, id } => LeaseholdError::ConcurrentModification {
                entity: entity.to_string(),
                id,
            },
            DbError::Duplicate(reason) => LeaseholdError::invariant(format!("duplicate record: {}", reason)),
            other => LeaseholdError::Storage {
                reason: other.to_string(),
            },
        }
    }
}

/// Result type for storage operations
pub type DbResult<T> = Result<T, DbError>;
