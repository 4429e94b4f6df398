//! Signature certificates
//!
//! Once both parties have signed, the contract content is hashed and the
//! platform issues a certificate binding that hash to both signature records.
//! The certificate is signed with the platform's Ed25519 key so anyone holding
//! the public key can check it offline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leasehold_types::{Contract, ContractId, ContractTerms, SignatureRecord, UserId};

use crate::crypto::{hash_object, verify_signature, Keypair};
use crate::error::{SignatureError, SignatureResult};

/// Content covered by the lock hash
#[derive(Serialize)]
struct LockedContent<'a> {
    reference: &'a str,
    landlord_id: &'a UserId,
    tenant_id: Option<&'a UserId>,
    terms: &'a ContractTerms,
}

/// SHA-256 over the contract's parties and terms
pub fn content_hash(contract: &Contract) -> SignatureResult<String> {
    hash_object(&LockedContent {
        reference: &contract.reference,
        landlord_id: &contract.landlord_id,
        tenant_id: contract.tenant_id.as_ref(),
        terms: &contract.terms,
    })
}

/// Fields covered by the platform signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBody {
    pub contract_id: ContractId,
    pub reference: String,
    pub content_hash: String,
    pub landlord_id: UserId,
    pub tenant_id: UserId,
    pub landlord_signature: SignatureRecord,
    pub tenant_signature: SignatureRecord,
    pub locked_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureCertificate {
    #[serde(flatten)]
    pub body: CertificateBody,
    pub public_key: String,
    pub signature: String,
}

impl SignatureCertificate {
    /// Check the platform signature over the body
    pub fn verify(&self) -> SignatureResult<()> {
        let payload = serde_json::to_vec(&self.body)?;
        verify_signature(&self.public_key, &payload, &self.signature)
    }
}

/// Issues certificates with the platform key
#[derive(Debug, Clone)]
pub struct CertificateSigner {
    keypair: Keypair,
}

impl CertificateSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }

    pub fn issue(&self, contract: &Contract, now: DateTime<Utc>) -> SignatureResult<SignatureCertificate> {
        let not_locked = || SignatureError::NotLocked(contract.id.to_string());

        let (Some(locked_at), Some(content_hash), Some(tenant_id)) = (
            contract.locked_at,
            contract.content_hash.clone(),
            contract.tenant_id.clone(),
        ) else {
            return Err(not_locked());
        };
        let landlord_signature = contract.signatures.landlord.clone().ok_or_else(not_locked)?;
        let tenant_signature = contract.signatures.tenant.clone().ok_or_else(not_locked)?;

        let body = CertificateBody {
            contract_id: contract.id.clone(),
            reference: contract.reference.clone(),
            content_hash,
            landlord_id: contract.landlord_id.clone(),
            tenant_id,
            landlord_signature,
            tenant_signature,
            locked_at,
            issued_at: now,
        };
        let payload = serde_json::to_vec(&body)?;

        Ok(SignatureCertificate {
            signature: self.keypair.sign(&payload),
            public_key: self.keypair.public_key_hex(),
            body,
        })
    }
}
