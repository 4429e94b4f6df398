//! Cryptographic utilities
//!
//! Ed25519 for receipts and certificates, SHA-256 for content hashes,
//! HMAC-SHA256 for code digests and webhook signatures. Keys, digests and
//! signatures are hex-encoded strings.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{SignatureError, SignatureResult};

type HmacSha256 = Hmac<Sha256>;

/// A keypair for signing operations
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create from a seed (32 bytes)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Create from a hex-encoded 32 byte seed
    pub fn from_seed_hex(seed_hex: &str) -> SignatureResult<Self> {
        let seed: [u8; 32] = hex::decode(seed_hex)
            .map_err(|e| SignatureError::Crypto(format!("Invalid seed hex: {}", e)))?
            .try_into()
            .map_err(|_| SignatureError::Crypto("Seed must be 32 bytes".to_string()))?;
        Ok(Self::from_seed(&seed))
    }

    /// Get the public key as a hex string
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> String {
        let signature = self.signing_key.sign(message);
        hex::encode(signature.to_bytes())
    }

    /// Get the verifying key for verification
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Verify a signature against a public key
pub fn verify_signature(
    public_key_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> SignatureResult<()> {
    let public_key_bytes: [u8; 32] = hex::decode(public_key_hex)
        .map_err(|e| SignatureError::Crypto(format!("Invalid public key hex: {}", e)))?
        .try_into()
        .map_err(|_| SignatureError::Crypto("Public key must be 32 bytes".to_string()))?;

    let verifying_key = VerifyingKey::from_bytes(&public_key_bytes)
        .map_err(|e| SignatureError::Crypto(format!("Invalid public key: {}", e)))?;

    let signature_bytes: [u8; 64] = hex::decode(signature_hex)
        .map_err(|e| SignatureError::Crypto(format!("Invalid signature hex: {}", e)))?
        .try_into()
        .map_err(|_| SignatureError::Crypto("Signature must be 64 bytes".to_string()))?;

    let signature = Signature::from_bytes(&signature_bytes);

    verifying_key.verify(message, &signature)?;
    Ok(())
}

/// Compute SHA256 hash of data
pub fn hash_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash any serializable object
pub fn hash_object<T: Serialize>(obj: &T) -> SignatureResult<String> {
    let json = serde_json::to_vec(obj)?;
    Ok(hash_sha256(&json))
}

/// HMAC-SHA256 of `message` under `key`, hex encoded
pub fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> SignatureResult<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| SignatureError::Crypto(format!("Invalid HMAC key: {}", e)))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Random bytes, hex encoded
pub fn random_hex(len: usize) -> String {
    use rand::RngCore;
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
