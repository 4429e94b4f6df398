//! One-time signature codes
//!
//! A code is bound to one contract and one party. Only an HMAC digest of
//! `salt:contract:party:code` under the configured pepper is persisted, so a
//! leaked record does not reveal the code.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::OsRng;
use rand::Rng;

use leasehold_types::{ContractId, OtpChallenge, Party};

use crate::config::OtpConfig;
use crate::crypto::{constant_time_eq, hmac_sha256_hex, random_hex};
use crate::error::{SignatureError, SignatureResult};

/// Freshly issued code. The plaintext goes to the notifier and nowhere else.
#[derive(Debug, Clone)]
pub struct IssuedOtp {
    pub code: String,
    pub challenge: OtpChallenge,
}

/// Outcome of checking a submitted code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpCheck {
    Valid,
    /// Wrong code; counts as an attempt
    Mismatch,
    Expired,
    /// Attempt budget used up; the challenge must be discarded
    Exhausted,
}

/// OTP issuance and verification
#[derive(Debug, Clone)]
pub struct OtpService {
    config: OtpConfig,
}

impl OtpService {
    pub fn new(config: OtpConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Generate a code and the challenge to store in place of any previous one
    pub fn issue(
        &self,
        contract_id: &ContractId,
        party: Party,
        now: DateTime<Utc>,
    ) -> SignatureResult<IssuedOtp> {
        let bound = 10u32.pow(self.config.digits);
        let code = format!(
            "{:0width$}",
            OsRng.gen_range(0..bound),
            width = self.config.digits as usize
        );
        let salt = random_hex(16);
        let code_hash = self.digest(&salt, contract_id, party, &code)?;

        let ttl = ChronoDuration::from_std(self.config.ttl)
            .map_err(|e| SignatureError::Crypto(format!("OTP lifetime out of range: {}", e)))?;

        Ok(IssuedOtp {
            code,
            challenge: OtpChallenge {
                code_hash,
                salt,
                issued_at: now,
                expires_at: now + ttl,
                attempts: 0,
            },
        })
    }

    /// Check `code` against a stored challenge. Does not mutate the challenge;
    /// the caller persists the attempt count.
    pub fn verify(
        &self,
        challenge: &OtpChallenge,
        contract_id: &ContractId,
        party: Party,
        code: &str,
        now: DateTime<Utc>,
    ) -> SignatureResult<OtpCheck> {
        if now > challenge.expires_at {
            return Ok(OtpCheck::Expired);
        }
        if challenge.attempts >= self.config.max_attempts {
            return Ok(OtpCheck::Exhausted);
        }

        let code = code.trim();
        if code.len() != self.config.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(OtpCheck::Mismatch);
        }

        let expected = self.digest(&challenge.salt, contract_id, party, code)?;
        if constant_time_eq(&expected, &challenge.code_hash) {
            Ok(OtpCheck::Valid)
        } else {
            Ok(OtpCheck::Mismatch)
        }
    }

    fn digest(
        &self,
        salt: &str,
        contract_id: &ContractId,
        party: Party,
        code: &str,
    ) -> SignatureResult<String> {
        let message = format!("{}:{}:{}:{}", salt, contract_id, party, code);
        hmac_sha256_hex(self.config.pepper.as_bytes(), message.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn service() -> OtpService {
        OtpService::new(OtpConfig {
            pepper: "test-pepper-0123456789".to_string(),
            ..OtpConfig::default()
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_issued_code_shape_and_storage() {
        let svc = service();
        let issued = svc.issue(&ContractId::new(), Party::Tenant, now()).unwrap();

        assert_eq!(issued.code.len(), 6);
        assert!(issued.code.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(issued.challenge.code_hash, issued.code);
        assert_eq!(issued.challenge.expires_at, now() + ChronoDuration::minutes(10));
    }

    #[test]
    fn test_valid_code_verifies() {
        let svc = service();
        let id = ContractId::new();
        let issued = svc.issue(&id, Party::Landlord, now()).unwrap();

        let check = svc
            .verify(&issued.challenge, &id, Party::Landlord, &issued.code, now())
            .unwrap();
        assert_eq!(check, OtpCheck::Valid);
    }

    #[test]
    fn test_code_is_bound_to_contract_and_party() {
        let svc = service();
        let id = ContractId::new();
        let issued = svc.issue(&id, Party::Tenant, now()).unwrap();

        let other_party = svc
            .verify(&issued.challenge, &id, Party::Landlord, &issued.code, now())
            .unwrap();
        assert_eq!(other_party, OtpCheck::Mismatch);

        let other_contract = svc
            .verify(&issued.challenge, &ContractId::new(), Party::Tenant, &issued.code, now())
            .unwrap();
        assert_eq!(other_contract, OtpCheck::Mismatch);
    }

    #[test]
    fn test_expiry_is_checked_first() {
        let svc = service();
        let id = ContractId::new();
        let issued = svc.issue(&id, Party::Tenant, now()).unwrap();

        let late = now() + ChronoDuration::minutes(10) + ChronoDuration::seconds(1);
        let check = svc
            .verify(&issued.challenge, &id, Party::Tenant, &issued.code, late)
            .unwrap();
        assert_eq!(check, OtpCheck::Expired);

        // exactly at expiry is still valid
        let edge = now() + ChronoDuration::minutes(10);
        let check = svc
            .verify(&issued.challenge, &id, Party::Tenant, &issued.code, edge)
            .unwrap();
        assert_eq!(check, OtpCheck::Valid);
    }

    #[test]
    fn test_attempt_budget() {
        let svc = OtpService::new(OtpConfig {
            max_attempts: 2,
            ttl: Duration::from_secs(60),
            ..OtpConfig::default()
        });
        let id = ContractId::new();
        let mut issued = svc.issue(&id, Party::Tenant, now()).unwrap();
        issued.challenge.attempts = 2;

        let check = svc
            .verify(&issued.challenge, &id, Party::Tenant, &issued.code, now())
            .unwrap();
        assert_eq!(check, OtpCheck::Exhausted);
    }

    #[test]
    fn test_malformed_code_is_a_mismatch() {
        let svc = service();
        let id = ContractId::new();
        let issued = svc.issue(&id, Party::Tenant, now()).unwrap();
        for bad in ["", "12345", "1234567", "12a456"] {
            let check = svc
                .verify(&issued.challenge, &id, Party::Tenant, bad, now())
                .unwrap();
            assert_eq!(check, OtpCheck::Mismatch);
        }
    }
}
