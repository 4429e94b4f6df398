//! Payment receipts (quittances)
//!
//! Issued when funds are released to the landlord or a cash settlement is
//! recorded. The body is hashed and signed with the platform key; the payment
//! keeps only the pointer ([`ReceiptRef`]).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use leasehold_signature::{constant_time_eq, hash_object, verify_signature, Keypair};
use leasehold_types::{
    CommissionCollection, ContractId, LeaseholdError, Payment, PaymentId, PaymentMethod,
    PaymentPurpose, ReceiptId, ReceiptRef, Result, UserId,
};

/// Fields covered by the receipt signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptBody {
    pub receipt_id: ReceiptId,
    pub payment_id: PaymentId,
    pub payment_reference: String,
    pub contract_id: ContractId,
    pub payer_id: UserId,
    pub beneficiary_id: UserId,
    pub purpose: PaymentPurpose,
    pub method: PaymentMethod,
    pub amount_paid: Decimal,
    pub landlord_share: Decimal,
    pub commission: Decimal,
    pub commission_collection: CommissionCollection,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    #[serde(flatten)]
    pub body: ReceiptBody,
    pub content_hash: String,
    pub public_key: String,
    pub signature: String,
}

impl PaymentReceipt {
    /// Check the hash and the platform signature
    pub fn verify(&self) -> Result<()> {
        let content_hash = hash_object(&self.body)?;
        if !constant_time_eq(&content_hash, &self.content_hash) {
            return Err(LeaseholdError::invariant(format!(
                "receipt {} content hash mismatch",
                self.body.receipt_id
            )));
        }
        verify_signature(&self.public_key, self.content_hash.as_bytes(), &self.signature)?;
        Ok(())
    }

    /// Pointer stored on the payment
    pub fn reference(&self) -> ReceiptRef {
        ReceiptRef {
            receipt_id: self.body.receipt_id.clone(),
            content_hash: self.content_hash.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// Signs receipts with the platform key
#[derive(Debug, Clone)]
pub struct ReceiptIssuer {
    keypair: Keypair,
}

impl ReceiptIssuer {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }

    pub fn issue(&self, payment: &Payment, now: DateTime<Utc>) -> Result<PaymentReceipt> {
        let body = ReceiptBody {
            receipt_id: ReceiptId::new(),
            payment_id: payment.id.clone(),
            payment_reference: payment.reference.clone(),
            contract_id: payment.contract_id.clone(),
            payer_id: payment.payer_id.clone(),
            beneficiary_id: payment.beneficiary_id.clone(),
            purpose: payment.purpose,
            method: payment.method,
            amount_paid: payment.total_amount,
            landlord_share: payment.landlord_share(),
            commission: payment.commission_amount,
            commission_collection: payment.commission_collection,
            issued_at: now,
        };
        let content_hash = hash_object(&body)?;

        Ok(PaymentReceipt {
            signature: self.keypair.sign(content_hash.as_bytes()),
            public_key: self.keypair.public_key_hex(),
            content_hash,
            body,
        })
    }
}
