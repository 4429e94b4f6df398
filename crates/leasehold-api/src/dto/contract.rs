//! Contract DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use leasehold_contracts::CreatedContract;
use leasehold_types::{
    Closure, Contract, ContractId, ContractStatus, ContractTerms, DisputeRecord, FeeBreakdown,
    ListingId, PerParty, SignatureRecord, TermsInput, TerminationRecord, UserId,
};

/// Create a contract. The landlord defaults to the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateContractRequest {
    #[serde(default)]
    pub landlord_id: Option<UserId>,
    #[serde(default)]
    pub tenant_id: Option<UserId>,
    #[serde(default)]
    pub listing_id: Option<ListingId>,
    pub terms: TermsInput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignTenantRequest {
    pub tenant_id: UserId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignRequest {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminationRequest {
    pub motive: String,
    #[serde(default)]
    pub notice_months: Option<u32>,
}

/// Contract as shown to its parties. OTP challenges and the signing-link
/// hash never leave the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractView {
    pub id: ContractId,
    pub reference: String,
    pub listing_id: Option<ListingId>,
    pub landlord_id: UserId,
    pub tenant_id: Option<UserId>,
    pub terms: ContractTerms,
    pub status: ContractStatus,
    pub signatures: PerParty<Option<SignatureRecord>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    pub fee_snapshot: Option<FeeBreakdown>,
    pub activated_at: Option<DateTime<Utc>>,
    pub retraction_deadline: Option<DateTime<Utc>>,
    pub sealed: bool,
    pub termination: Option<TerminationRecord>,
    pub dispute: Option<DisputeRecord>,
    pub closure: Option<Closure>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Contract> for ContractView {
    fn from(c: Contract) -> Self {
        Self {
            sealed: c.document.is_some(),
            id: c.id,
            reference: c.reference,
            listing_id: c.listing_id,
            landlord_id: c.landlord_id,
            tenant_id: c.tenant_id,
            terms: c.terms,
            status: c.status,
            signatures: c.signatures,
            locked_at: c.locked_at,
            content_hash: c.content_hash,
            fee_snapshot: c.fee_snapshot,
            activated_at: c.activated_at,
            retraction_deadline: c.retraction_deadline,
            termination: c.termination,
            dispute: c.dispute,
            closure: c.closure,
            version: c.version,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Created or tenant-assigned contract. The signing link token is shown
/// exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedContractResponse {
    pub contract: ContractView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_token: Option<String>,
}

impl From<CreatedContract> for CreatedContractResponse {
    fn from(created: CreatedContract) -> Self {
        Self {
            contract: created.contract.into(),
            signing_token: created.signing_token,
        }
    }
}
