//! Leasehold Signature Primitives
//!
//! Building blocks for electronic consent. Nothing here touches storage;
//! the lifecycle engine owns the records and calls into these helpers.
//!
//! - [`OtpService`]: one-time codes stored as salted HMAC digests
//! - [`SigningTokenService`]: public signing link credentials
//! - [`CertificateSigner`]: Ed25519 signature certificate over a locked contract
//! - [`crypto`]: hashing, Ed25519 and constant-time helpers shared by the
//!   escrow receipts and webhook verification

pub mod certificate;
pub mod config;
pub mod crypto;
pub mod error;
pub mod otp;
pub mod token;

pub use certificate::{content_hash, CertificateBody, CertificateSigner, SignatureCertificate};
pub use config::{OtpConfig, SignatureConfig, SigningTokenConfig};
pub use crypto::{
    constant_time_eq, hash_object, hash_sha256, hmac_sha256_hex, random_hex, verify_signature, Keypair,
};
pub use error::{SignatureError, SignatureResult};
pub use otp::{IssuedOtp, OtpCheck, OtpService};
pub use token::{hash_token, IssuedToken, SigningTokenService};
