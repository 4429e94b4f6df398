//! Contract lifecycle state machine
//!
//! Every mutation runs through [`ContractLifecycle::mutate`]: take the
//! per-contract mutex, load the current record, apply the change, check the
//! structural invariants, then write back with a version check. Side effects
//! (notifications, seal scheduling) happen only after the write committed.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Months, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use leasehold_db::{with_submission_lock, ContractRepository, DistributedLock, KeyedLocks, Storage};
use leasehold_fees::CommissionCalculator;
use leasehold_signature::{content_hash, SigningTokenService};
use leasehold_types::{
    generate_reference, Actor, Closure, ClosureReason, Contract, ContractId, ContractStatus,
    ContractTerms, DisputeRecord, DocumentRef, LeaseholdError, ListingId, Party, PerParty, Result,
    SignatureRecord, SigningChannel, TermsInput, TerminationRecord, UserId,
    CONTRACT_REFERENCE_PREFIX,
};

use crate::clauses::generate_clauses;
use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::notifier::{NoticeKind, Notifier};
use crate::ports::DocumentStore;
use crate::seal::SealScheduler;
use crate::transitions::{after_signature, ensure_allowed};

/// Collaborators the lifecycle is built from
pub struct LifecycleParts {
    pub storage: Storage,
    pub fees: Arc<CommissionCalculator>,
    pub documents: Arc<dyn DocumentStore>,
    pub seals: Arc<dyn SealScheduler>,
    pub notifier: Notifier,
    pub clock: Arc<dyn Clock>,
    pub tokens: SigningTokenService,
}

/// Create request
#[derive(Debug, Clone)]
pub struct NewContract {
    pub landlord_id: UserId,
    pub tenant_id: Option<UserId>,
    pub listing_id: Option<ListingId>,
    pub terms: TermsInput,
}

/// A created or tenant-assigned contract. `signing_token` is the plaintext
/// link credential, returned once.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedContract {
    pub contract: Contract,
    pub signing_token: Option<String>,
}

/// Evidence captured when consent is verified
#[derive(Debug, Clone)]
pub struct SignatureEvidence {
    pub ip: String,
    pub device: String,
    pub channel: SigningChannel,
}

/// Outcome of a notice-period sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub terminated: Vec<ContractId>,
    /// Past the effective date but never confirmed by the counter-party
    pub awaiting_confirmation: Vec<ContractId>,
}

pub struct ContractLifecycle {
    contracts: Arc<dyn ContractRepository>,
    locks: Arc<dyn DistributedLock>,
    keyed: KeyedLocks<ContractId>,
    fees: Arc<CommissionCalculator>,
    documents: Arc<dyn DocumentStore>,
    seals: Arc<dyn SealScheduler>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    tokens: SigningTokenService,
    config: LifecycleConfig,
}

impl ContractLifecycle {
    pub fn new(parts: LifecycleParts, config: LifecycleConfig) -> Self {
        Self {
            contracts: parts.storage.contracts,
            locks: parts.storage.locks,
            keyed: KeyedLocks::new(),
            fees: parts.fees,
            documents: parts.documents,
            seals: parts.seals,
            notifier: parts.notifier,
            clock: parts.clock,
            tokens: parts.tokens,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn tokens(&self) -> &SigningTokenService {
        &self.tokens
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Load without authorization; for engines acting on behalf of the system
    pub async fn load(&self, id: &ContractId) -> Result<Contract> {
        self.contracts
            .get(id)
            .await?
            .ok_or_else(|| LeaseholdError::ContractNotFound {
                contract_id: id.to_string(),
            })
    }

    /// Parties and administrators only
    pub async fn get(&self, actor: &Actor, id: &ContractId) -> Result<Contract> {
        let contract = self.load(id).await?;
        authorize(&contract, actor)?;
        Ok(contract)
    }

    /// Contracts the actor is a party to
    pub async fn list_for(&self, actor: &Actor) -> Result<Vec<Contract>> {
        Ok(self.contracts.list_for_user(&actor.user_id).await?)
    }

    pub async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Contract>> {
        Ok(self.contracts.find_by_token_hash(token_hash).await?)
    }

    // =========================================================================
    // Creation and amendment
    // =========================================================================

    pub async fn create(&self, actor: &Actor, request: NewContract) -> Result<CreatedContract> {
        let creator_is_party = actor.user_id == request.landlord_id
            || request.tenant_id.as_ref() == Some(&actor.user_id);
        if !creator_is_party && !actor.is_admin() {
            return Err(LeaseholdError::Unauthorized);
        }
        if request.tenant_id.as_ref() == Some(&request.landlord_id) {
            return Err(LeaseholdError::invalid_input(
                "tenant_id",
                "the landlord cannot be the tenant",
            ));
        }
        let terms = self.build_terms(&request.terms)?;

        let key = format!("contract:create:{}", actor.user_id.as_uuid());
        with_submission_lock(
            self.locks.as_ref(),
            &key,
            self.config.submission_lock_ttl,
            async {
                let now = self.clock.now();
                let status = if request.tenant_id.is_some() {
                    ContractStatus::PendingTenantSignature
                } else {
                    ContractStatus::Draft
                };

                let mut contract = Contract {
                    id: ContractId::new(),
                    reference: generate_reference(CONTRACT_REFERENCE_PREFIX, now),
                    listing_id: request.listing_id.clone(),
                    landlord_id: request.landlord_id.clone(),
                    tenant_id: request.tenant_id.clone(),
                    terms,
                    status,
                    signatures: PerParty::default(),
                    otp: PerParty::default(),
                    signing_token: None,
                    locked_at: None,
                    content_hash: None,
                    fee_snapshot: None,
                    activated_at: None,
                    retraction_deadline: None,
                    document: None,
                    termination: None,
                    dispute: None,
                    closure: None,
                    version: 0,
                    created_at: now,
                    updated_at: now,
                };

                let signing_token = if contract.tenant_id.is_some() {
                    let issued = self.tokens.mint(now)?;
                    contract.signing_token = Some(issued.record);
                    Some(issued.token)
                } else {
                    None
                };

                contract.check_invariants()?;
                self.contracts.insert(&contract).await?;

                info!(
                    contract_id = %contract.id,
                    reference = %contract.reference,
                    status = %contract.status,
                    "Contract created"
                );

                if let (Some(tenant), Some(token)) = (&contract.tenant_id, &signing_token) {
                    self.invite_tenant(&contract, tenant, token);
                }

                Ok(CreatedContract {
                    contract,
                    signing_token,
                })
            },
        )
        .await
    }

    /// `DRAFT -> PENDING_TENANT_SIGNATURE` once a tenant is matched
    pub async fn assign_tenant(
        &self,
        actor: &Actor,
        id: &ContractId,
        tenant_id: UserId,
    ) -> Result<CreatedContract> {
        let (contract, token) = self
            .mutate(id, |c, now| {
                if authorize(c, actor)? == Some(Party::Tenant) {
                    return Err(LeaseholdError::Unauthorized);
                }
                ensure_allowed(c, "assign tenant")?;
                if tenant_id == c.landlord_id {
                    return Err(LeaseholdError::invalid_input(
                        "tenant_id",
                        "the landlord cannot be the tenant",
                    ));
                }

                let issued = self.tokens.mint(now)?;
                c.tenant_id = Some(tenant_id.clone());
                c.signing_token = Some(issued.record);
                c.status = ContractStatus::PendingTenantSignature;
                Ok(issued.token)
            })
            .await?;

        info!(contract_id = %contract.id, tenant = %tenant_id, "Tenant assigned");
        self.invite_tenant(&contract, &tenant_id, &token);

        Ok(CreatedContract {
            contract,
            signing_token: Some(token),
        })
    }

    /// Replace the terms while nobody has signed
    pub async fn update_terms(
        &self,
        actor: &Actor,
        id: &ContractId,
        input: TermsInput,
    ) -> Result<Contract> {
        let terms = self.build_terms(&input)?;

        let (contract, ()) = self
            .mutate(id, move |c, _| {
                if authorize(c, actor)? == Some(Party::Tenant) {
                    return Err(LeaseholdError::Unauthorized);
                }
                if c.signature_count() > 0 || c.is_locked() {
                    return Err(LeaseholdError::TermsLocked);
                }
                ensure_allowed(c, "amend")?;
                c.terms = terms;
                Ok(())
            })
            .await?;

        info!(contract_id = %contract.id, "Contract terms amended");
        Ok(contract)
    }

    // =========================================================================
    // Signatures
    // =========================================================================

    /// Record verified consent for `party`. Callers must have checked the
    /// party's OTP; [`crate::SignatureService`] is the public entry point.
    pub async fn record_signature(
        &self,
        id: &ContractId,
        party: Party,
        evidence: SignatureEvidence,
    ) -> Result<Contract> {
        let (contract, _) = self
            .mutate(id, |c, now| self.apply_signature(c, party, &evidence, now))
            .await?;
        self.after_signature(&contract, party);
        Ok(contract)
    }

    pub(crate) fn apply_signature(
        &self,
        contract: &mut Contract,
        party: Party,
        evidence: &SignatureEvidence,
        now: DateTime<Utc>,
    ) -> Result<ContractStatus> {
        if contract.is_signed_by(party) {
            return Err(LeaseholdError::AlreadySigned {
                party: party.to_string(),
            });
        }

        let counterparty_signed = contract.is_signed_by(party.counterparty());
        let next = after_signature(contract.status, party, counterparty_signed).ok_or_else(|| {
            LeaseholdError::invalid_transition("contract", contract.status.as_str(), "sign")
        })?;

        *contract.signatures.get_mut(party) = Some(SignatureRecord {
            signed_at: now,
            ip: evidence.ip.clone(),
            device: evidence.device.clone(),
            channel: evidence.channel,
        });
        *contract.otp.get_mut(party) = None;
        if party == Party::Tenant {
            contract.signing_token = None;
        }
        contract.status = next;

        if next == ContractStatus::Active {
            self.lock_contract(contract, now)?;
        }
        Ok(next)
    }

    /// Freeze terms, fees and content hash; open the retraction window
    fn lock_contract(&self, contract: &mut Contract, now: DateTime<Utc>) -> Result<()> {
        let fee_snapshot = self.fees.breakdown_for_version(
            contract.terms.transaction_type,
            contract.terms.monthly_rent,
            contract.terms.rate_version,
        )?;

        contract.locked_at = Some(now);
        contract.content_hash = Some(content_hash(contract)?);
        contract.fee_snapshot = Some(fee_snapshot);
        contract.activated_at = Some(now);
        contract.retraction_deadline = Some(now + self.retraction_window()?);
        Ok(())
    }

    pub(crate) fn after_signature(&self, contract: &Contract, party: Party) {
        info!(
            contract_id = %contract.id,
            party = %party,
            status = %contract.status,
            "Signature recorded"
        );

        if contract.status == ContractStatus::Active {
            self.seals
                .schedule(contract.id.clone(), self.config.seal_delay);
            let payload = json!({
                "reference": contract.reference,
                "retraction_deadline": contract.retraction_deadline,
            });
            self.notify_parties(contract, None, NoticeKind::ContractActivated, payload);
        } else {
            let payload = json!({ "reference": contract.reference, "signed_by": party });
            self.notify_parties(contract, Some(party), NoticeKind::ContractSigned, payload);
        }
    }

    // =========================================================================
    // Cancellation, retraction, dispute
    // =========================================================================

    /// Hard delete before any signature
    pub async fn cancel(&self, actor: &Actor, id: &ContractId) -> Result<Contract> {
        let _guard = self.keyed.lock(id).await;
        let mut contract = self.load(id).await?;

        let party = authorize(&contract, actor)?;
        if contract.signature_count() > 0 {
            return Err(LeaseholdError::invalid_transition(
                "contract",
                contract.status.as_str(),
                "cancel",
            ));
        }
        ensure_allowed(&contract, "cancel")?;

        if let Some(document) = &contract.document {
            self.documents.delete(&document.storage_ref).await?;
        }
        self.contracts.delete(id).await?;
        self.seals.cancel(id);

        contract.status = ContractStatus::Cancelled;
        contract.updated_at = self.clock.now();

        info!(contract_id = %id, by = %actor.user_id, "Contract cancelled and deleted");
        let payload = json!({ "reference": contract.reference });
        self.notify_parties(&contract, party, NoticeKind::ContractCancelled, payload);

        Ok(contract)
    }

    /// Void an active contract inside the retraction window
    pub async fn retract(&self, actor: &Actor, id: &ContractId, reason: String) -> Result<Contract> {
        let (contract, party) = self
            .mutate(id, |c, now| {
                let party = require_party(c, actor)?;
                ensure_allowed(c, "retract")?;
                if !c.retraction_open(now) {
                    return Err(LeaseholdError::RetractionWindowClosed);
                }

                c.status = ContractStatus::Terminated;
                c.closure = Some(Closure {
                    closed_at: now,
                    reason: ClosureReason::Retracted {
                        by: party,
                        reason: reason.clone(),
                    },
                });
                Ok(party)
            })
            .await?;

        self.seals.cancel(id);
        info!(contract_id = %id, by = %party, "Contract retracted");

        let payload = json!({ "reference": contract.reference, "reason": reason });
        self.notify_parties(&contract, Some(party), NoticeKind::ContractRetracted, payload);
        Ok(contract)
    }

    /// Hand the contract to the external dispute process
    pub async fn escalate_dispute(
        &self,
        actor: &Actor,
        id: &ContractId,
        reason: String,
    ) -> Result<Contract> {
        if reason.trim().is_empty() {
            return Err(LeaseholdError::invalid_input("reason", "must not be empty"));
        }

        let (contract, party) = self
            .mutate(id, |c, now| {
                let party = authorize(c, actor)?;
                ensure_allowed(c, "escalate")?;
                c.dispute = Some(DisputeRecord {
                    raised_at: now,
                    raised_by: actor.user_id.clone(),
                    reason: reason.clone(),
                });
                c.status = ContractStatus::Disputed;
                Ok(party)
            })
            .await?;

        warn!(contract_id = %id, by = %actor.user_id, "Contract escalated to dispute");
        let payload = json!({ "reference": contract.reference, "reason": reason });
        self.notify_parties(&contract, party, NoticeKind::ContractDisputed, payload);
        Ok(contract)
    }

    // =========================================================================
    // Termination
    // =========================================================================

    /// `ACTIVE -> IN_NOTICE_PERIOD`. Notification is left to the caller.
    pub async fn request_termination(
        &self,
        actor: &Actor,
        id: &ContractId,
        motive: String,
        notice_months: Option<u32>,
    ) -> Result<Contract> {
        let notice = notice_months.unwrap_or(self.config.default_notice_months);
        if notice == 0 || notice > self.config.max_notice_months {
            return Err(LeaseholdError::invalid_input(
                "notice_months",
                format!("must be between 1 and {}", self.config.max_notice_months),
            ));
        }
        if motive.trim().is_empty() {
            return Err(LeaseholdError::invalid_input("motive", "must not be empty"));
        }

        let (contract, party) = self
            .mutate(id, |c, now| {
                let party = require_party(c, actor)?;
                if c.status == ContractStatus::InNoticePeriod && c.termination.is_some() {
                    return Err(LeaseholdError::TerminationPending);
                }
                ensure_allowed(c, "request termination")?;

                let effective_date = now
                    .checked_add_months(Months::new(notice))
                    .ok_or_else(|| {
                        LeaseholdError::invalid_input("notice_months", "effective date out of range")
                    })?;

                c.termination = Some(TerminationRecord {
                    requested_at: now,
                    requested_by: party,
                    requested_by_user: actor.user_id.clone(),
                    motive: motive.clone(),
                    notice_months: notice,
                    effective_date,
                    confirmed_at: None,
                    confirmed_by: None,
                });
                c.status = ContractStatus::InNoticePeriod;
                Ok(party)
            })
            .await?;

        info!(
            contract_id = %id,
            by = %party,
            notice_months = notice,
            "Termination requested"
        );
        Ok(contract)
    }

    /// Counter-party acknowledgement. Status stays `IN_NOTICE_PERIOD`.
    pub async fn confirm_termination(&self, actor: &Actor, id: &ContractId) -> Result<Contract> {
        let (contract, party) = self
            .mutate(id, |c, now| {
                let party = require_party(c, actor)?;
                ensure_allowed(c, "confirm termination")?;
                let record = c.termination.as_mut().ok_or_else(|| {
                    LeaseholdError::invariant("contract in notice period without termination record")
                })?;
                if record.requested_by == party {
                    return Err(LeaseholdError::Unauthorized);
                }
                if record.is_confirmed() {
                    return Err(LeaseholdError::TerminationAlreadyConfirmed);
                }
                record.confirmed_at = Some(now);
                record.confirmed_by = Some(party);
                Ok(party)
            })
            .await?;

        info!(contract_id = %id, by = %party, "Termination confirmed");
        Ok(contract)
    }

    /// Terminate contracts whose confirmed notice period has elapsed
    pub async fn expire_notice_periods(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for contract in self
            .contracts
            .list_by_status(ContractStatus::InNoticePeriod)
            .await?
        {
            let Some(termination) = &contract.termination else {
                error!(contract_id = %contract.id, "Notice period without termination record");
                continue;
            };
            if termination.effective_date > now {
                continue;
            }
            if !termination.is_confirmed() {
                warn!(
                    contract_id = %contract.id,
                    effective_date = %termination.effective_date,
                    "Notice elapsed without counter-party confirmation"
                );
                report.awaiting_confirmation.push(contract.id.clone());
                continue;
            }

            let result = self
                .mutate(&contract.id, |c, now| {
                    let due = c.status == ContractStatus::InNoticePeriod
                        && c.termination
                            .as_ref()
                            .map_or(false, |t| t.is_confirmed() && t.effective_date <= now);
                    if due {
                        c.status = ContractStatus::Terminated;
                        c.closure = Some(Closure {
                            closed_at: now,
                            reason: ClosureReason::NoticeElapsed,
                        });
                    }
                    Ok(due)
                })
                .await;

            match result {
                Ok((terminated, true)) => {
                    info!(contract_id = %terminated.id, "Contract terminated after notice period");
                    let payload = json!({ "reference": terminated.reference });
                    self.notify_parties(&terminated, None, NoticeKind::ContractTerminated, payload);
                    report.terminated.push(terminated.id);
                }
                Ok((_, false)) => {}
                Err(e) => warn!(contract_id = %contract.id, error = %e, "Notice sweep skipped contract"),
            }
        }

        Ok(report)
    }

    // =========================================================================
    // Sealing
    // =========================================================================

    /// Render and attach the locked document. `None` when there is nothing
    /// to do (already sealed, cancelled, or retracted before the seal fired).
    pub async fn seal(&self, id: &ContractId) -> Result<Option<DocumentRef>> {
        let Some(contract) = self.contracts.get(id).await? else {
            return Ok(None);
        };
        if contract.document.is_some() || ensure_allowed(&contract, "seal").is_err() {
            return Ok(None);
        }

        let expected = contract.content_hash.clone().ok_or_else(|| {
            LeaseholdError::invariant(format!("contract {} is sealable without a content hash", id))
        })?;
        if content_hash(&contract)? != expected {
            error!(contract_id = %id, "Locked content no longer matches its hash");
            return Err(LeaseholdError::invariant(format!(
                "contract {} content changed after lock",
                id
            )));
        }

        let rendered = self.documents.render(&contract).await?;

        let attached = self
            .mutate(id, |c, now| {
                if c.document.is_some() || ensure_allowed(c, "seal").is_err() {
                    return Ok(None);
                }
                if c.content_hash.as_deref() != Some(expected.as_str()) {
                    return Err(LeaseholdError::invariant(format!(
                        "contract {} content hash changed while sealing",
                        c.id
                    )));
                }
                let document = DocumentRef {
                    storage_ref: rendered.storage_ref.clone(),
                    disk: rendered.disk.clone(),
                    content_hash: rendered.content_hash.clone(),
                    encrypted: rendered.encrypted,
                    rendered_at: now,
                };
                c.document = Some(document.clone());
                Ok(Some(document))
            })
            .await;

        match attached {
            Ok((_, Some(document))) => Ok(Some(document)),
            Ok((_, None)) => {
                self.discard_document(&rendered.storage_ref).await;
                Ok(None)
            }
            Err(e) => {
                self.discard_document(&rendered.storage_ref).await;
                Err(e)
            }
        }
    }

    /// Bytes of the sealed document
    pub async fn document_bytes(&self, actor: &Actor, id: &ContractId) -> Result<Vec<u8>> {
        let contract = self.get(actor, id).await?;
        let document = contract.document.ok_or_else(|| {
            LeaseholdError::invalid_transition("contract", contract.status.as_str(), "download")
        })?;
        self.documents.fetch(&document.storage_ref).await
    }

    async fn discard_document(&self, storage_ref: &str) {
        if let Err(e) = self.documents.delete(storage_ref).await {
            warn!(storage_ref, error = %e, "Failed to discard rendered document");
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Serialized read-modify-write of one contract
    pub(crate) async fn mutate<T, F>(&self, id: &ContractId, apply: F) -> Result<(Contract, T)>
    where
        F: FnOnce(&mut Contract, DateTime<Utc>) -> Result<T>,
    {
        let _guard = self.keyed.lock(id).await;
        let mut contract = self.load(id).await?;
        let now = self.clock.now();

        let output = apply(&mut contract, now)?;
        contract.updated_at = now;

        if let Err(e) = contract.check_invariants() {
            error!(contract_id = %id, error = %e, "Refusing to persist contract");
            return Err(e);
        }

        let stored = self.contracts.update(contract).await?;
        Ok((stored, output))
    }

    fn build_terms(&self, input: &TermsInput) -> Result<ContractTerms> {
        input.validate()?;
        let breakdown = self
            .fees
            .compute_breakdown(input.transaction_type, input.monthly_rent)?;

        Ok(ContractTerms {
            transaction_type: input.transaction_type,
            monthly_rent: input.monthly_rent,
            deposit: breakdown.deposit_amount,
            advance: breakdown.advance_amount,
            duration: input.duration,
            start_date: input.start_date,
            end_date: input.end_date()?,
            special_conditions: input.special_conditions.clone(),
            clauses: generate_clauses(input, breakdown.deposit_amount, breakdown.advance_amount),
            rate_version: breakdown.rate_version,
        })
    }

    fn retraction_window(&self) -> Result<ChronoDuration> {
        ChronoDuration::from_std(self.config.retraction_window)
            .map_err(|e| LeaseholdError::internal(format!("retraction window out of range: {}", e)))
    }

    fn invite_tenant(&self, contract: &Contract, tenant: &UserId, token: &str) {
        self.notifier.notify(
            tenant,
            NoticeKind::SigningInvitation,
            json!({
                "contract_id": contract.id,
                "reference": contract.reference,
                "signing_token": token,
                "expires_at": contract.signing_token.as_ref().map(|t| t.expires_at),
            }),
        );
    }

    /// Notify both parties, skipping `except`
    pub(crate) fn notify_parties(
        &self,
        contract: &Contract,
        except: Option<Party>,
        kind: NoticeKind,
        payload: serde_json::Value,
    ) {
        for party in Party::ALL {
            if Some(party) == except {
                continue;
            }
            if let Some(user) = contract.party_user(party) {
                self.notifier.notify(user, kind, payload.clone());
            }
        }
    }
}

/// The actor's party, `None` for an administrator, otherwise unauthorized
pub(crate) fn authorize(contract: &Contract, actor: &Actor) -> Result<Option<Party>> {
    match contract.party_of(&actor.user_id) {
        Some(party) => Ok(Some(party)),
        None if actor.is_admin() => Ok(None),
        None => Err(LeaseholdError::Unauthorized),
    }
}

/// The actor's party; administrators cannot act as a party
pub(crate) fn require_party(contract: &Contract, actor: &Actor) -> Result<Party> {
    contract
        .party_of(&actor.user_id)
        .ok_or(LeaseholdError::Unauthorized)
}
