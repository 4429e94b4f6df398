//! Contract entity
//!
//! A contract is mutated only through the lifecycle engine. This module holds
//! the record itself plus read-only helpers; it never decides transitions.

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LeaseholdError, Result};
use crate::identity::{ContractId, ListingId, UserId};
use crate::money::{FeeBreakdown, MAX_MONTHLY_RENT};
use crate::party::{Party, PerParty};

/// Length used for an open-ended lease: 99 years.
pub const INDEFINITE_TERM_MONTHS: u32 = 99 * 12;

/// Kind of transaction a contract covers; drives the commission rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Residential rental
    Rental,
    /// Commercial lease
    Commercial,
    /// Sale
    Sale,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rental => "rental",
            Self::Commercial => "commercial",
            Self::Sale => "sale",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lease duration as entered by the landlord
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "months", rename_all = "snake_case")]
pub enum LeaseDuration {
    Months(u32),
    Indefinite,
}

impl LeaseDuration {
    /// Duration in months, with indefinite normalized to a long fixed term
    pub fn term_months(self) -> u32 {
        match self {
            Self::Months(n) => n,
            Self::Indefinite => INDEFINITE_TERM_MONTHS,
        }
    }
}

/// Terms as submitted at creation or amendment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsInput {
    pub transaction_type: TransactionType,
    pub monthly_rent: Decimal,
    pub duration: LeaseDuration,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub special_conditions: Option<String>,
}

impl TermsInput {
    /// Reject malformed terms before anything is persisted
    pub fn validate(&self) -> Result<()> {
        if self.monthly_rent <= Decimal::ZERO {
            return Err(LeaseholdError::invalid_input(
                "monthly_rent",
                "must be greater than zero",
            ));
        }
        if self.monthly_rent > MAX_MONTHLY_RENT {
            return Err(LeaseholdError::invalid_input(
                "monthly_rent",
                format!("must not exceed {}", MAX_MONTHLY_RENT),
            ));
        }
        if self.duration == LeaseDuration::Months(0) {
            return Err(LeaseholdError::invalid_input(
                "duration",
                "must be at least one month",
            ));
        }
        self.end_date()?;
        Ok(())
    }

    /// Start date plus the normalized term
    pub fn end_date(&self) -> Result<NaiveDate> {
        self.start_date
            .checked_add_months(Months::new(self.duration.term_months()))
            .ok_or_else(|| LeaseholdError::invalid_input("duration", "end date out of range"))
    }
}

/// Terms snapshot stored on the contract; immutable once the contract is locked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTerms {
    pub transaction_type: TransactionType,
    pub monthly_rent: Decimal,
    pub deposit: Decimal,
    pub advance: Decimal,
    pub duration: LeaseDuration,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub special_conditions: Option<String>,
    /// Generated boilerplate clauses
    pub clauses: Vec<String>,
    /// Rate table version the deposit and advance were computed with
    pub rate_version: u32,
}

/// Lifecycle status of a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    /// No tenant yet
    Draft,
    /// Tenant assigned, tenant signature outstanding
    PendingTenantSignature,
    /// Tenant signed first, landlord signature outstanding
    PendingLandlordSignature,
    /// Both parties signed
    Active,
    /// Termination requested, still binding
    InNoticePeriod,
    Terminated,
    /// Deleted before any signature
    Cancelled,
    /// Escalated to an external dispute process
    Disputed,
}

impl ContractStatus {
    pub const ALL: [ContractStatus; 8] = [
        Self::Draft,
        Self::PendingTenantSignature,
        Self::PendingLandlordSignature,
        Self::Active,
        Self::InNoticePeriod,
        Self::Terminated,
        Self::Cancelled,
        Self::Disputed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::PendingTenantSignature => "PENDING_TENANT_SIGNATURE",
            Self::PendingLandlordSignature => "PENDING_LANDLORD_SIGNATURE",
            Self::Active => "ACTIVE",
            Self::InNoticePeriod => "IN_NOTICE_PERIOD",
            Self::Terminated => "TERMINATED",
            Self::Cancelled => "CANCELLED",
            Self::Disputed => "DISPUTED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Cancelled)
    }

    pub fn is_pending_signature(self) -> bool {
        matches!(
            self,
            Self::PendingTenantSignature | Self::PendingLandlordSignature
        )
    }

    /// Statuses in which the agreement binds both parties and accepts payments
    pub fn is_binding(self) -> bool {
        matches!(self, Self::Active | Self::InNoticePeriod)
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel a signature was collected through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningChannel {
    /// Authenticated platform session
    Session,
    /// Public signing link
    Token,
}

/// Evidence of one party's consent. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub signed_at: DateTime<Utc>,
    pub ip: String,
    pub device: String,
    pub channel: SigningChannel,
}

/// Outstanding OTP for one party. Only the salted hash is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpChallenge {
    pub code_hash: String,
    pub salt: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Public signing link credential for the tenant. Only the hash is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningToken {
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Pointer to the sealed contract document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub storage_ref: String,
    pub disk: String,
    pub content_hash: String,
    pub encrypted: bool,
    pub rendered_at: DateTime<Utc>,
}

/// Termination sub-record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationRecord {
    pub requested_at: DateTime<Utc>,
    pub requested_by: Party,
    pub requested_by_user: UserId,
    pub motive: String,
    pub notice_months: u32,
    pub effective_date: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<Party>,
}

impl TerminationRecord {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }
}

/// Dispute escalation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeRecord {
    pub raised_at: DateTime<Utc>,
    pub raised_by: UserId,
    pub reason: String,
}

/// Why a contract reached `TERMINATED`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClosureReason {
    /// Voided inside the retraction window
    Retracted { by: Party, reason: String },
    /// Notice period elapsed with counter-party confirmation
    NoticeElapsed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    pub closed_at: DateTime<Utc>,
    pub reason: ClosureReason,
}

/// A bilateral rental agreement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub reference: String,
    pub listing_id: Option<ListingId>,
    pub landlord_id: UserId,
    pub tenant_id: Option<UserId>,
    pub terms: ContractTerms,
    pub status: ContractStatus,

    pub signatures: PerParty<Option<SignatureRecord>>,
    pub otp: PerParty<Option<OtpChallenge>>,
    pub signing_token: Option<SigningToken>,

    pub locked_at: Option<DateTime<Utc>>,
    /// SHA-256 of the locked content
    pub content_hash: Option<String>,
    /// Fee breakdown frozen at lock time
    pub fee_snapshot: Option<FeeBreakdown>,
    pub activated_at: Option<DateTime<Utc>>,
    pub retraction_deadline: Option<DateTime<Utc>>,
    pub document: Option<DocumentRef>,

    pub termination: Option<TerminationRecord>,
    pub dispute: Option<DisputeRecord>,
    pub closure: Option<Closure>,

    /// Optimistic concurrency version, bumped on every committed write
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    /// Which party a user is on this contract, if any
    pub fn party_of(&self, user: &UserId) -> Option<Party> {
        if &self.landlord_id == user {
            Some(Party::Landlord)
        } else if self.tenant_id.as_ref() == Some(user) {
            Some(Party::Tenant)
        } else {
            None
        }
    }

    /// The user behind a party
    pub fn party_user(&self, party: Party) -> Option<&UserId> {
        match party {
            Party::Landlord => Some(&self.landlord_id),
            Party::Tenant => self.tenant_id.as_ref(),
        }
    }

    pub fn is_signed_by(&self, party: Party) -> bool {
        self.signatures.get(party).is_some()
    }

    pub fn signature_count(&self) -> usize {
        Party::ALL.iter().filter(|p| self.is_signed_by(**p)).count()
    }

    pub fn both_signed(&self) -> bool {
        self.signature_count() == 2
    }

    pub fn is_locked(&self) -> bool {
        self.locked_at.is_some()
    }

    /// Whether `retract` is still allowed at `now` (deadline inclusive)
    pub fn retraction_open(&self, now: DateTime<Utc>) -> bool {
        self.status == ContractStatus::Active
            && self.retraction_deadline.map_or(false, |deadline| now <= deadline)
    }

    /// Structural invariants that must hold after every committed write
    pub fn check_invariants(&self) -> Result<()> {
        if self.status == ContractStatus::Active && !self.both_signed() {
            return Err(LeaseholdError::invariant(format!(
                "contract {} is ACTIVE without both signatures",
                self.id
            )));
        }
        if self.is_locked() && !self.both_signed() {
            return Err(LeaseholdError::invariant(format!(
                "contract {} is locked without both signatures",
                self.id
            )));
        }
        if self.tenant_id.is_none() && self.status != ContractStatus::Draft {
            return Err(LeaseholdError::invariant(format!(
                "contract {} left DRAFT without a tenant",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn input(duration: LeaseDuration) -> TermsInput {
        TermsInput {
            transaction_type: TransactionType::Rental,
            monthly_rent: dec!(150000),
            duration,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            special_conditions: None,
        }
    }

    #[test]
    fn test_indefinite_duration_is_normalized() {
        let terms = input(LeaseDuration::Indefinite);
        assert_eq!(
            terms.end_date().unwrap(),
            NaiveDate::from_ymd_opt(2125, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_terms_validation() {
        assert!(input(LeaseDuration::Months(12)).validate().is_ok());
        assert!(input(LeaseDuration::Months(0)).validate().is_err());

        let mut zero_rent = input(LeaseDuration::Months(12));
        zero_rent.monthly_rent = Decimal::ZERO;
        let err = zero_rent.validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_rent_above_ceiling_is_rejected() {
        assert_eq!(MAX_MONTHLY_RENT, dec!(1_000_000_000_000));
        let mut at_ceiling = input(LeaseDuration::Months(12));
        at_ceiling.monthly_rent = MAX_MONTHLY_RENT;
        assert!(at_ceiling.validate().is_ok());

        let mut huge = input(LeaseDuration::Months(12));
        huge.monthly_rent = Decimal::MAX;
        let err = huge.validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&ContractStatus::PendingTenantSignature).unwrap();
        assert_eq!(json, "\"PENDING_TENANT_SIGNATURE\"");
        assert!(ContractStatus::Cancelled.is_terminal());
        assert!(!ContractStatus::Disputed.is_terminal());
    }

    #[test]
    fn test_duration_json_shape() {
        let json = serde_json::to_value(LeaseDuration::Months(12)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "months", "months": 12}));
        let json = serde_json::to_value(LeaseDuration::Indefinite).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "indefinite"}));
    }
}
