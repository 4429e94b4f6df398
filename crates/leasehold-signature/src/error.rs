//! Signature primitive errors

use leasehold_types::LeaseholdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Contract {0} is not locked")]
    NotLocked(String),

    #[error("Invalid signature")]
    InvalidSignature(#[from] ed25519_dalek::SignatureError),
}

pub type SignatureResult<T> = Result<T, SignatureError>;

impl From<SignatureError> for LeaseholdError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::NotLocked(_) => LeaseholdError::invariant(err.to_string()),
            other => LeaseholdError::internal(other.to_string()),
        }
    }
}
