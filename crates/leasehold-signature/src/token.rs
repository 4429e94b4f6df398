//! Public signing link credentials
//!
//! The tenant can sign without an account through a link carrying a random
//! token. The contract stores only the token's SHA-256.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use leasehold_types::SigningToken;

use crate::config::SigningTokenConfig;
use crate::crypto::{constant_time_eq, hash_sha256, random_hex};
use crate::error::{SignatureError, SignatureResult};

/// A minted token. `token` is shown once, in the link sent to the tenant.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub record: SigningToken,
}

/// Digest used to store and look up a token
pub fn hash_token(token: &str) -> String {
    hash_sha256(token.as_bytes())
}

#[derive(Debug, Clone)]
pub struct SigningTokenService {
    config: SigningTokenConfig,
}

impl SigningTokenService {
    pub fn new(config: SigningTokenConfig) -> Self {
        Self { config }
    }

    pub fn mint(&self, now: DateTime<Utc>) -> SignatureResult<IssuedToken> {
        let token = random_hex(self.config.token_bytes.max(16));
        let ttl = ChronoDuration::from_std(self.config.ttl)
            .map_err(|e| SignatureError::Crypto(format!("Token lifetime out of range: {}", e)))?;

        Ok(IssuedToken {
            record: SigningToken {
                token_hash: hash_token(&token),
                expires_at: now + ttl,
            },
            token,
        })
    }

    /// Whether `presented` matches the stored record and has not expired
    pub fn is_valid(&self, record: &SigningToken, presented: &str, now: DateTime<Utc>) -> bool {
        now <= record.expires_at && constant_time_eq(&hash_token(presented), &record.token_hash)
    }
}
