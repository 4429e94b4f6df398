//! Payment entity and its escrow status machine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LeaseholdError, Result};
use crate::identity::{ContractId, PaymentId, ReceiptId, UserId};

/// How the tenant pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    MobileMoneyA,
    MobileMoneyB,
    BankTransfer,
    Cash,
    Check,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 5] = [
        Self::MobileMoneyA,
        Self::MobileMoneyB,
        Self::BankTransfer,
        Self::Cash,
        Self::Check,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MobileMoneyA => "mobile_money_a",
            Self::MobileMoneyB => "mobile_money_b",
            Self::BankTransfer => "bank_transfer",
            Self::Cash => "cash",
            Self::Check => "check",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == s)
    }

    /// Methods settled through a provider API with webhook confirmation.
    /// The others are reconciled out of band.
    pub fn is_provider_backed(self) -> bool {
        matches!(self, Self::MobileMoneyA | Self::MobileMoneyB)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escrow status of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created; provider not invoked yet or invocation failed
    Pending,
    /// Provider accepted, awaiting asynchronous confirmation
    Processing,
    /// Funds received and held by the platform
    Escrow,
    /// Landlord validated the release
    Confirmed,
    /// Landlord rejected, funds still held
    Disputed,
    Refunded,
    /// Provider reported the collection failed
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Escrow => "escrow",
            Self::Confirmed => "confirmed",
            Self::Disputed => "disputed",
            Self::Refunded => "refunded",
            Self::Failed => "failed",
        }
    }

    /// Allowed forward moves. Everything not listed is rejected.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Escrow)
                | (Processing, Escrow)
                | (Pending, Failed)
                | (Processing, Failed)
                | (Escrow, Confirmed)
                | (Escrow, Disputed)
                | (Escrow, Refunded)
                | (Confirmed, Refunded)
                | (Disputed, Refunded)
        )
    }

    /// Awaiting the provider; counted by the anti-duplicate check
    pub fn is_unresolved(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Funds have reached the platform
    pub fn funds_received(self) -> bool {
        matches!(self, Self::Escrow | Self::Confirmed | Self::Disputed | Self::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a payment settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    /// Advance + deposit + commission from the contract's fee snapshot
    InitialSettlement,
    /// One month of rent, no deposit and no commission
    Rent,
}

/// Whether the platform actually holds the commission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionCollection {
    Captured,
    /// The landlord received the cash; commission must be collected from them
    ToCollectSeparately,
}

/// Who physically received an out-of-band payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashReceiver {
    Landlord,
    Platform,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub validated_at: DateTime<Utc>,
    pub validated_by: UserId,
    pub approved: bool,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub amount: Decimal,
    pub requested_amount: Option<Decimal>,
    pub reason: String,
    pub refunded_at: DateTime<Utc>,
    pub refunded_by: UserId,
}

/// Pointer to the signed receipt (quittance)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRef {
    pub receipt_id: ReceiptId,
    pub content_hash: String,
    pub signature: String,
}

/// Money moved from tenant to landlord through the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub reference: String,
    pub contract_id: ContractId,
    pub payer_id: UserId,
    pub beneficiary_id: UserId,
    pub purpose: PaymentPurpose,
    pub method: PaymentMethod,

    pub rent_amount: Decimal,
    pub deposit_amount: Decimal,
    pub commission_amount: Decimal,
    pub total_amount: Decimal,
    pub rate_version: u32,
    pub commission_collection: CommissionCollection,

    /// Provider-assigned transaction id
    pub external_ref: Option<String>,
    pub redirect_url: Option<String>,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub cash_received_by: Option<CashReceiver>,

    pub escrowed_at: Option<DateTime<Utc>>,
    pub validation: Option<ValidationRecord>,
    pub refund: Option<RefundRecord>,
    pub receipt: Option<ReceiptRef>,

    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Largest amount a refund may return: rent plus deposit, never commission
    pub fn refundable_cap(&self) -> Decimal {
        self.rent_amount + self.deposit_amount
    }

    /// What the landlord receives on release
    pub fn landlord_share(&self) -> Decimal {
        self.total_amount - self.commission_amount
    }

    /// Fails loudly when the stored amounts disagree with each other
    pub fn check_totals(&self) -> Result<()> {
        if self.rent_amount + self.deposit_amount + self.commission_amount != self.total_amount {
            return Err(LeaseholdError::invariant(format!(
                "payment {} total {} does not match rent {} + deposit {} + commission {}",
                self.id,
                self.total_amount,
                self.rent_amount,
                self.deposit_amount,
                self.commission_amount
            )));
        }
        if let Some(refund) = &self.refund {
            if refund.amount > self.refundable_cap() {
                return Err(LeaseholdError::invariant(format!(
                    "payment {} refund {} exceeds refundable cap {}",
                    self.id,
                    refund.amount,
                    self.refundable_cap()
                )));
            }
        }
        Ok(())
    }

    /// Move to `next` or fail with a state conflict
    pub fn transition(&mut self, next: PaymentStatus, action: &str) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(LeaseholdError::invalid_transition(
                "payment",
                self.status.as_str(),
                action,
            ));
        }
        self.status = next;
        Ok(())
    }
}
