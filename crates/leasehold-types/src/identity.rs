//! Identity types for Leasehold
//!
//! Every identifier is a strongly typed wrapper around a UUID so a payment id
//! can never be passed where a contract id is expected.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id_type!(ContractId, "contract", "Unique identifier for a rental contract");
define_id_type!(PaymentId, "pay", "Unique identifier for an escrow payment");
define_id_type!(UserId, "user", "Unique identifier for a platform user (landlord, tenant or admin)");
define_id_type!(ListingId, "listing", "Unique identifier for the listing a contract was drawn from");
define_id_type!(ReceiptId, "receipt", "Unique identifier for a signed payment receipt");

/// Alphabet for reference codes. No 0, O, 1 or I so codes survive being read aloud.
const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Human-readable reference, e.g. `BAIL-20260101-7KQ2XM`.
pub fn generate_reference(prefix: &str, at: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| REFERENCE_ALPHABET[rng.gen_range(0..REFERENCE_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}-{}", prefix, at.format("%Y%m%d"), suffix)
}

/// Reference prefix for contracts
pub const CONTRACT_REFERENCE_PREFIX: &str = "BAIL";

/// Reference prefix for payments
pub const PAYMENT_REFERENCE_PREFIX: &str = "PAY";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_contract_id_display_is_prefixed() {
        let id = ContractId::new();
        assert!(id.to_string().starts_with("contract_"));
    }

    #[test]
    fn test_parse_accepts_prefixed_and_bare() {
        let id = PaymentId::new();
        assert_eq!(PaymentId::parse(&id.to_string()).unwrap(), id);
        assert_eq!(PaymentId::parse(&id.0.to_string()).unwrap(), id);
        assert!(PaymentId::parse("pay_not-a-uuid").is_err());
    }

    #[test]
    fn test_reference_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let reference = generate_reference(CONTRACT_REFERENCE_PREFIX, at);
        assert!(reference.starts_with("BAIL-20260314-"));
        let suffix = reference.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.bytes().all(|b| REFERENCE_ALPHABET.contains(&b)));
    }
}
