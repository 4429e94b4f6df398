//! Escrow payment engine
//!
//! ```text
//! PENDING -> PROCESSING -> ESCROW -> CONFIRMED -> REFUNDED
//!    |           |            |  \-> DISPUTED ---^
//!    +-----------+-> FAILED   +----------------->^
//! ```
//!
//! Payment writes are serialized per payment id and committed with a version
//! check. Provider confirmations are matched by the provider transaction id
//! and applied at most once; replays are acknowledged without a write.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use leasehold_contracts::{Clock, NoticeKind, Notifier};
use leasehold_db::{
    with_submission_lock, ContractRepository, DistributedLock, KeyedLocks, PaymentRepository, Storage,
};
use leasehold_types::{
    generate_reference, Actor, CashReceiver, CommissionCollection, Contract, ContractId,
    LeaseholdError, Party, Payment, PaymentId, PaymentMethod, PaymentPurpose, PaymentStatus,
    RefundRecord, Result, UserId, ValidationRecord, PAYMENT_REFERENCE_PREFIX,
};

use crate::config::EscrowConfig;
use crate::provider::{ProviderRegistry, ProviderStatus};
use crate::receipt::{PaymentReceipt, ReceiptIssuer};

/// Collaborators the engine is built from
pub struct EscrowParts {
    pub storage: Storage,
    pub providers: ProviderRegistry,
    pub receipts: ReceiptIssuer,
    pub notifier: Notifier,
    pub clock: Arc<dyn Clock>,
}

/// Provider-backed collection request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub method: PaymentMethod,
    pub purpose: PaymentPurpose,
}

/// Out-of-band settlement declared after the fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashSettlement {
    pub method: PaymentMethod,
    pub purpose: PaymentPurpose,
    pub amount_received: Decimal,
    pub received_by: CashReceiver,
}

/// Result of applying a provider confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// State changed
    Applied,
    /// Replay of a confirmation already reflected in the payment
    AlreadyApplied,
    /// Nothing to do (provider still pending, or contradicts a final state)
    Ignored,
    /// No payment carries this provider transaction id
    Unmatched,
}

/// Amounts a payment of `purpose` must carry
struct Amounts {
    rent: Decimal,
    deposit: Decimal,
    commission: Decimal,
    total: Decimal,
    rate_version: u32,
}

pub struct EscrowPaymentEngine {
    contracts: Arc<dyn ContractRepository>,
    payments: Arc<dyn PaymentRepository>,
    locks: Arc<dyn DistributedLock>,
    keyed: KeyedLocks<PaymentId>,
    providers: ProviderRegistry,
    receipts: ReceiptIssuer,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    config: EscrowConfig,
}

impl EscrowPaymentEngine {
    pub fn new(parts: EscrowParts, config: EscrowConfig) -> Self {
        Self {
            contracts: parts.storage.contracts,
            payments: parts.storage.payments,
            locks: parts.storage.locks,
            keyed: KeyedLocks::new(),
            providers: parts.providers,
            receipts: parts.receipts,
            notifier: parts.notifier,
            clock: parts.clock,
            config,
        }
    }

    pub fn receipt_public_key(&self) -> String {
        self.receipts.public_key_hex()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Payer, beneficiary or administrator only
    pub async fn get(&self, actor: &Actor, id: &PaymentId) -> Result<Payment> {
        let payment = self.load(id).await?;
        if actor.user_id != payment.payer_id
            && actor.user_id != payment.beneficiary_id
            && !actor.is_admin()
        {
            return Err(LeaseholdError::Unauthorized);
        }
        Ok(payment)
    }

    /// Payments of a contract, oldest first. Parties and administrators only.
    pub async fn list_for_contract(&self, actor: &Actor, contract_id: &ContractId) -> Result<Vec<Payment>> {
        let contract = self.load_contract(contract_id).await?;
        if contract.party_of(&actor.user_id).is_none() && !actor.is_admin() {
            return Err(LeaseholdError::Unauthorized);
        }
        Ok(self.payments.list_by_contract(contract_id).await?)
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Create a `PENDING` payment and hand it to the method's provider
    pub async fn initiate(
        &self,
        actor: &Actor,
        contract_id: &ContractId,
        request: PaymentRequest,
    ) -> Result<Payment> {
        if !request.method.is_provider_backed() {
            return Err(LeaseholdError::invalid_input(
                "method",
                format!("{} is settled out of band; record a cash settlement", request.method),
            ));
        }

        let contract = self.load_contract(contract_id).await?;
        if contract.party_of(&actor.user_id) != Some(Party::Tenant) {
            return Err(LeaseholdError::Unauthorized);
        }
        ensure_payable(&contract, "initiate payment")?;
        let amounts = amounts_for(&contract, request.purpose)?;

        let key = format!(
            "payment:initiate:{}:{}",
            contract_id.as_uuid(),
            actor.user_id.as_uuid()
        );
        let payment = with_submission_lock(
            self.locks.as_ref(),
            &key,
            self.config.submission_lock_ttl,
            async {
                let now = self.clock.now();
                self.reject_duplicates(&contract, &actor.user_id, request.purpose, now)
                    .await?;

                let payment = new_payment(
                    &contract,
                    actor.user_id.clone(),
                    request.method,
                    request.purpose,
                    &amounts,
                    CommissionCollection::Captured,
                    PaymentStatus::Pending,
                    now,
                );
                payment.check_totals()?;
                self.payments.insert(&payment).await?;

                info!(
                    payment_id = %payment.id,
                    contract_id = %contract.id,
                    method = %payment.method,
                    total = %payment.total_amount,
                    "Payment created"
                );
                Ok(payment)
            },
        )
        .await?;

        self.dispatch(payment).await
    }

    /// Retry the provider call for a payment that never reached the provider
    pub async fn redispatch(&self, actor: &Actor, id: &PaymentId) -> Result<Payment> {
        let payment = self.load(id).await?;
        if actor.user_id != payment.payer_id && !actor.is_admin() {
            return Err(LeaseholdError::Unauthorized);
        }
        if payment.status != PaymentStatus::Pending || payment.external_ref.is_some() {
            return Err(LeaseholdError::invalid_transition(
                "payment",
                payment.status.as_str(),
                "redispatch",
            ));
        }
        let contract = self.load_contract(&payment.contract_id).await?;
        ensure_payable(&contract, "redispatch payment")?;

        self.dispatch(payment).await
    }

    /// Call the provider. A failure leaves the payment `PENDING`.
    async fn dispatch(&self, payment: Payment) -> Result<Payment> {
        let adapter = self.providers.get(payment.method)?;
        let initiation = self
            .call_provider(
                payment.method,
                adapter.initiate(payment.total_amount, &payment.reference),
            )
            .await
            .map_err(|e| {
                warn!(payment_id = %payment.id, error = %e, "Payment left pending");
                e
            })?;

        let (payment, ()) = self
            .mutate(&payment.id, |p, _| {
                if p.external_ref.is_none() {
                    p.external_ref = Some(initiation.provider_txn_id.clone());
                }
                if p.redirect_url.is_none() {
                    p.redirect_url = initiation.redirect_url.clone();
                }
                // a webhook matched by reference may have overtaken the synchronous answer
                if p.status == PaymentStatus::Pending {
                    p.transition(PaymentStatus::Processing, "dispatch")?;
                }
                Ok(())
            })
            .await?;

        info!(
            payment_id = %payment.id,
            provider_txn = %initiation.provider_txn_id,
            status = %payment.status,
            "Payment dispatched to provider"
        );
        Ok(payment)
    }

    // =========================================================================
    // Confirmation
    // =========================================================================

    /// Authenticate and apply a provider webhook
    pub async fn ingest_webhook(
        &self,
        method: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<IngestOutcome> {
        let Some(method) = PaymentMethod::parse(method).filter(|m| m.is_provider_backed()) else {
            warn!(method, "Webhook for unknown method discarded");
            return Err(LeaseholdError::InvalidWebhook);
        };
        let adapter = self
            .providers
            .get(method)
            .map_err(|_| LeaseholdError::InvalidWebhook)?;

        let authentic = signature.map_or(false, |s| adapter.verify_webhook(body, s));
        if !authentic {
            warn!(method = %method, "Webhook signature rejected");
            return Err(LeaseholdError::InvalidWebhook);
        }

        let event = adapter.parse_webhook(body)?;
        self.apply_confirmation(
            method,
            &event.transaction_id,
            event.reference.as_deref(),
            event.status,
        )
        .await
    }

    /// Apply a provider status report. Safe to replay and to race.
    pub async fn ingest_provider_confirmation(
        &self,
        method: PaymentMethod,
        provider_txn_id: &str,
        status: ProviderStatus,
    ) -> Result<IngestOutcome> {
        self.apply_confirmation(method, provider_txn_id, None, status)
            .await
    }

    /// Match by provider transaction id, falling back to the platform
    /// reference when the provider answered before `dispatch` stored its id
    async fn apply_confirmation(
        &self,
        method: PaymentMethod,
        provider_txn_id: &str,
        reference: Option<&str>,
        status: ProviderStatus,
    ) -> Result<IngestOutcome> {
        let mut found = self
            .payments
            .find_by_external_ref(method, provider_txn_id)
            .await?;
        if found.is_none() {
            if let Some(reference) = reference {
                found = self
                    .payments
                    .find_by_reference(reference)
                    .await?
                    .filter(|p| p.method == method && p.external_ref.is_none());
            }
        }
        let Some(found) = found else {
            warn!(method = %method, provider_txn = provider_txn_id, "Confirmation matches no payment");
            return Ok(IngestOutcome::Unmatched);
        };

        let (payment, outcome) = self
            .mutate(&found.id, |p, now| {
                match p.external_ref.as_deref() {
                    None => p.external_ref = Some(provider_txn_id.to_string()),
                    Some(stored) if stored != provider_txn_id => return Ok(IngestOutcome::Unmatched),
                    Some(_) => {}
                }
                apply_status(p, &status, now)
            })
            .await?;

        if outcome == IngestOutcome::Unmatched {
            warn!(payment_id = %payment.id, provider_txn = provider_txn_id, "Confirmation names another provider transaction");
        }
        if outcome == IngestOutcome::Applied {
            info!(payment_id = %payment.id, status = %payment.status, "Provider confirmation applied");
            let payload = json!({
                "payment_id": payment.id,
                "reference": payment.reference,
                "amount": payment.total_amount,
            });
            if payment.status == PaymentStatus::Escrow {
                self.notifier.notify(&payment.beneficiary_id, NoticeKind::PaymentEscrowed, payload.clone());
                self.notifier.notify(&payment.payer_id, NoticeKind::PaymentEscrowed, payload);
            } else {
                self.notifier.notify(&payment.payer_id, NoticeKind::PaymentFailed, payload);
            }
        }
        Ok(outcome)
    }

    /// Reconcile a `PROCESSING` payment by asking the provider
    pub async fn poll_provider_status(&self, actor: &Actor, id: &PaymentId) -> Result<Payment> {
        let payment = self.get(actor, id).await?;
        let Some(provider_txn_id) = payment.external_ref.clone() else {
            return Err(LeaseholdError::invalid_transition(
                "payment",
                payment.status.as_str(),
                "poll",
            ));
        };
        if !payment.status.is_unresolved() {
            return Ok(payment);
        }

        let adapter = self.providers.get(payment.method)?;
        let status = self
            .call_provider(payment.method, adapter.check_status(&provider_txn_id))
            .await?;
        self.ingest_provider_confirmation(payment.method, &provider_txn_id, status)
            .await?;
        self.load(id).await
    }

    // =========================================================================
    // Release, dispute, refund
    // =========================================================================

    /// Beneficiary decision on escrowed funds
    pub async fn validate_by_landlord(
        &self,
        actor: &Actor,
        id: &PaymentId,
        approve: bool,
        note: Option<String>,
    ) -> Result<Payment> {
        let _guard = self.keyed.lock(id).await;
        let mut payment = self.load(id).await?;

        if actor.user_id != payment.beneficiary_id {
            return Err(LeaseholdError::Unauthorized);
        }
        if payment.status != PaymentStatus::Escrow {
            return Err(LeaseholdError::invalid_transition(
                "payment",
                payment.status.as_str(),
                "validate",
            ));
        }

        let now = self.clock.now();
        let validation = ValidationRecord {
            validated_at: now,
            validated_by: actor.user_id.clone(),
            approved: approve,
            note,
        };

        if !approve {
            payment.transition(PaymentStatus::Disputed, "dispute")?;
            payment.validation = Some(validation);
            let payment = self.commit(payment, now).await?;

            warn!(payment_id = %payment.id, "Landlord rejected escrowed payment");
            self.notifier.notify(
                &payment.payer_id,
                NoticeKind::PaymentDisputed,
                json!({ "payment_id": payment.id, "reference": payment.reference }),
            );
            return Ok(payment);
        }

        // money moves before the record does; a provider failure leaves ESCROW
        // and a failed commit is retried under the same idempotency key
        let adapter = self.providers.get(payment.method)?;
        let provider_ref = provider_reference(&payment);
        let key = payout_key(&payment, "release");
        self.call_provider(
            payment.method,
            adapter.release(&provider_ref, payment.landlord_share(), &key),
        )
        .await?;

        payment.transition(PaymentStatus::Confirmed, "release")?;
        payment.validation = Some(validation);
        let receipt = self.receipts.issue(&payment, now)?;
        payment.receipt = Some(receipt.reference());
        let payment = self.commit(payment, now).await?;

        info!(
            payment_id = %payment.id,
            released = %payment.landlord_share(),
            receipt_id = %receipt.body.receipt_id,
            "Escrow released to landlord"
        );
        let payload = json!({
            "payment_id": payment.id,
            "reference": payment.reference,
            "receipt": receipt,
        });
        self.notifier.notify(&payment.beneficiary_id, NoticeKind::PaymentReleased, payload.clone());
        self.notifier.notify(&payment.payer_id, NoticeKind::PaymentReleased, payload);
        Ok(payment)
    }

    /// Return funds to the payer. Never more than rent plus deposit.
    pub async fn refund(
        &self,
        actor: &Actor,
        id: &PaymentId,
        reason: String,
        amount: Option<Decimal>,
    ) -> Result<Payment> {
        if reason.trim().is_empty() {
            return Err(LeaseholdError::invalid_input("reason", "must not be empty"));
        }
        if let Some(requested) = amount {
            if requested <= Decimal::ZERO {
                return Err(LeaseholdError::invalid_input("amount", "must be greater than zero"));
            }
        }

        let _guard = self.keyed.lock(id).await;
        let mut payment = self.load(id).await?;

        if actor.user_id != payment.beneficiary_id && !actor.is_admin() {
            return Err(LeaseholdError::Unauthorized);
        }
        if !payment.status.can_transition_to(PaymentStatus::Refunded) {
            return Err(LeaseholdError::invalid_transition(
                "payment",
                payment.status.as_str(),
                "refund",
            ));
        }

        let refund_amount = refundable_amount(&payment, amount);
        if amount.map_or(false, |requested| requested > refund_amount) {
            warn!(
                payment_id = %payment.id,
                requested = ?amount,
                cap = %refund_amount,
                "Refund clamped to rent plus deposit"
            );
        }

        let adapter = self.providers.get(payment.method)?;
        let provider_ref = provider_reference(&payment);
        let key = payout_key(&payment, "refund");
        self.call_provider(
            payment.method,
            adapter.refund(&provider_ref, refund_amount, &key),
        )
        .await?;

        let now = self.clock.now();
        payment.transition(PaymentStatus::Refunded, "refund")?;
        payment.refund = Some(RefundRecord {
            amount: refund_amount,
            requested_amount: amount,
            reason,
            refunded_at: now,
            refunded_by: actor.user_id.clone(),
        });
        let payment = self.commit(payment, now).await?;

        info!(payment_id = %payment.id, amount = %refund_amount, "Payment refunded");
        self.notifier.notify(
            &payment.payer_id,
            NoticeKind::PaymentRefunded,
            json!({
                "payment_id": payment.id,
                "reference": payment.reference,
                "amount": refund_amount,
            }),
        );
        Ok(payment)
    }

    // =========================================================================
    // Out-of-band settlement
    // =========================================================================

    /// Record money handed over in person, already validated
    pub async fn record_cash_settlement(
        &self,
        actor: &Actor,
        contract_id: &ContractId,
        settlement: CashSettlement,
    ) -> Result<(Payment, PaymentReceipt)> {
        if settlement.method.is_provider_backed() {
            return Err(LeaseholdError::invalid_input(
                "method",
                format!("{} payments are confirmed by the provider", settlement.method),
            ));
        }

        let contract = self.load_contract(contract_id).await?;
        if actor.user_id != contract.landlord_id && !actor.is_admin() {
            return Err(LeaseholdError::Unauthorized);
        }
        ensure_payable(&contract, "record cash settlement")?;
        let payer = contract
            .tenant_id
            .clone()
            .ok_or_else(|| LeaseholdError::invariant("payable contract without tenant"))?;

        let amounts = amounts_for(&contract, settlement.purpose)?;
        if settlement.amount_received < amounts.total {
            return Err(LeaseholdError::InsufficientAmount {
                expected: amounts.total.to_string(),
                received: settlement.amount_received.to_string(),
            });
        }
        if settlement.amount_received > amounts.total {
            warn!(
                contract_id = %contract.id,
                expected = %amounts.total,
                received = %settlement.amount_received,
                "Cash settlement exceeds the amount due"
            );
        }

        let collection = match settlement.received_by {
            CashReceiver::Landlord => CommissionCollection::ToCollectSeparately,
            CashReceiver::Platform => CommissionCollection::Captured,
        };

        // shares the tenant's initiation key so cash and provider settlements serialize
        let key = format!(
            "payment:initiate:{}:{}",
            contract_id.as_uuid(),
            payer.as_uuid()
        );
        with_submission_lock(
            self.locks.as_ref(),
            &key,
            self.config.submission_lock_ttl,
            async {
                self.reject_settled_initial(&contract, settlement.purpose)
                    .await?;

                let now = self.clock.now();
                let mut payment = new_payment(
                    &contract,
                    payer.clone(),
                    settlement.method,
                    settlement.purpose,
                    &amounts,
                    collection,
                    PaymentStatus::Confirmed,
                    now,
                );
                payment.cash_received_by = Some(settlement.received_by);
                payment.validation = Some(ValidationRecord {
                    validated_at: now,
                    validated_by: actor.user_id.clone(),
                    approved: true,
                    note: Some(match settlement.received_by {
                        CashReceiver::Landlord => "received by landlord".to_string(),
                        CashReceiver::Platform => "received by platform".to_string(),
                    }),
                });
                let receipt = self.receipts.issue(&payment, now)?;
                payment.receipt = Some(receipt.reference());

                payment.check_totals()?;
                self.payments.insert(&payment).await?;

                info!(
                    payment_id = %payment.id,
                    contract_id = %contract.id,
                    method = %payment.method,
                    commission = ?payment.commission_collection,
                    "Cash settlement recorded"
                );
                self.notifier.notify(
                    &payment.payer_id,
                    NoticeKind::PaymentReleased,
                    json!({
                        "payment_id": payment.id,
                        "reference": payment.reference,
                        "receipt": receipt,
                    }),
                );
                Ok((payment, receipt))
            },
        )
        .await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn load(&self, id: &PaymentId) -> Result<Payment> {
        self.payments
            .get(id)
            .await?
            .ok_or_else(|| LeaseholdError::PaymentNotFound {
                payment_id: id.to_string(),
            })
    }

    async fn load_contract(&self, id: &ContractId) -> Result<Contract> {
        self.contracts
            .get(id)
            .await?
            .ok_or_else(|| LeaseholdError::ContractNotFound {
                contract_id: id.to_string(),
            })
    }

    /// An unresolved payment inside the window blocks a new one
    async fn reject_duplicates(
        &self,
        contract: &Contract,
        payer: &UserId,
        purpose: PaymentPurpose,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let window = ChronoDuration::from_std(self.config.duplicate_window)
            .map_err(|e| LeaseholdError::internal(format!("duplicate window out of range: {}", e)))?;

        for existing in self.payments.list_by_contract(&contract.id).await? {
            if &existing.payer_id != payer {
                continue;
            }
            if existing.status.is_unresolved() && now - existing.created_at < window {
                return Err(LeaseholdError::DuplicatePayment {
                    payment_reference: existing.reference,
                });
            }
        }
        self.reject_settled_initial(contract, purpose).await
    }

    /// A contract carries at most one settled initial settlement, whatever
    /// the method it was collected with
    async fn reject_settled_initial(&self, contract: &Contract, purpose: PaymentPurpose) -> Result<()> {
        if purpose != PaymentPurpose::InitialSettlement {
            return Ok(());
        }
        let payments = self.payments.list_by_contract(&contract.id).await?;
        let settled = payments.iter().find(|existing| {
            existing.purpose == PaymentPurpose::InitialSettlement
                && existing.status.funds_received()
                && existing.status != PaymentStatus::Refunded
        });
        match settled {
            Some(existing) => Err(LeaseholdError::invalid_transition(
                "payment",
                existing.status.as_str(),
                "record a second initial settlement",
            )),
            None => Ok(()),
        }
    }

    /// Serialized read-modify-write of one payment. An unchanged payment is
    /// not written back.
    async fn mutate<T, F>(&self, id: &PaymentId, apply: F) -> Result<(Payment, T)>
    where
        F: FnOnce(&mut Payment, DateTime<Utc>) -> Result<T>,
    {
        let _guard = self.keyed.lock(id).await;
        let current = self.load(id).await?;
        let now = self.clock.now();

        let mut payment = current.clone();
        let output = apply(&mut payment, now)?;
        if payment == current {
            return Ok((current, output));
        }
        let stored = self.commit(payment, now).await?;
        Ok((stored, output))
    }

    async fn commit(&self, mut payment: Payment, now: DateTime<Utc>) -> Result<Payment> {
        payment.updated_at = now;
        if let Err(e) = payment.check_totals() {
            error!(payment_id = %payment.id, error = %e, "Refusing to persist payment");
            return Err(e);
        }
        Ok(self.payments.update(payment).await?)
    }

    async fn call_provider<T, Fut>(&self, method: PaymentMethod, call: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.provider_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(method = %method, error = %e, "Provider call failed");
                Err(e)
            }
            Err(_) => {
                warn!(method = %method, timeout = ?self.config.provider_timeout, "Provider call timed out");
                Err(LeaseholdError::ProviderTimeout {
                    method: method.to_string(),
                })
            }
        }
    }
}

/// Payments are accepted only while the contract binds both parties
fn ensure_payable(contract: &Contract, action: &str) -> Result<()> {
    if contract.status.is_binding() {
        Ok(())
    } else {
        Err(LeaseholdError::invalid_transition(
            "contract",
            contract.status.as_str(),
            action,
        ))
    }
}

/// Initial settlement comes from the fee snapshot frozen at activation; rent
/// is one month with no deposit and no commission
fn amounts_for(contract: &Contract, purpose: PaymentPurpose) -> Result<Amounts> {
    match purpose {
        PaymentPurpose::InitialSettlement => {
            let fees = contract.fee_snapshot.as_ref().ok_or_else(|| {
                LeaseholdError::invariant(format!("active contract {} has no fee snapshot", contract.id))
            })?;
            Ok(Amounts {
                rent: fees.advance_amount,
                deposit: fees.deposit_amount,
                commission: fees.commission_amount,
                total: fees.total_amount,
                rate_version: fees.rate_version,
            })
        }
        PaymentPurpose::Rent => Ok(Amounts {
            rent: contract.terms.monthly_rent,
            deposit: Decimal::ZERO,
            commission: Decimal::ZERO,
            total: contract.terms.monthly_rent,
            rate_version: contract.terms.rate_version,
        }),
    }
}

/// Fold a provider status into a payment already matched to it
fn apply_status(p: &mut Payment, status: &ProviderStatus, now: DateTime<Utc>) -> Result<IngestOutcome> {
    match status {
        ProviderStatus::Pending => Ok(IngestOutcome::Ignored),
        ProviderStatus::Succeeded => {
            if p.status.funds_received() {
                Ok(IngestOutcome::AlreadyApplied)
            } else if p.status == PaymentStatus::Failed {
                error!(payment_id = %p.id, "Provider reports success for a failed payment");
                Ok(IngestOutcome::Ignored)
            } else {
                p.transition(PaymentStatus::Escrow, "confirm")?;
                p.escrowed_at = Some(now);
                Ok(IngestOutcome::Applied)
            }
        }
        ProviderStatus::Failed { reason } => {
            if p.status == PaymentStatus::Failed {
                Ok(IngestOutcome::AlreadyApplied)
            } else if p.status.is_unresolved() {
                p.transition(PaymentStatus::Failed, "fail")?;
                p.failure_reason = Some(reason.clone());
                Ok(IngestOutcome::Applied)
            } else {
                error!(payment_id = %p.id, status = %p.status, "Provider reports failure after funds arrived");
                Ok(IngestOutcome::Ignored)
            }
        }
    }
}

/// Idempotency key for one payout of a payment; stable across retries
fn payout_key(payment: &Payment, action: &str) -> String {
    format!("{}:{}", payment.reference, action)
}

/// Refund actually paid: the request clamped to rent plus deposit
pub fn refundable_amount(payment: &Payment, requested: Option<Decimal>) -> Decimal {
    let cap = payment.refundable_cap();
    requested.map_or(cap, |amount| amount.min(cap))
}

/// Identifier the provider knows the payment by
fn provider_reference(payment: &Payment) -> String {
    payment
        .external_ref
        .clone()
        .unwrap_or_else(|| payment.reference.clone())
}

#[allow(clippy::too_many_arguments)]
fn new_payment(
    contract: &Contract,
    payer_id: UserId,
    method: PaymentMethod,
    purpose: PaymentPurpose,
    amounts: &Amounts,
    commission_collection: CommissionCollection,
    status: PaymentStatus,
    now: DateTime<Utc>,
) -> Payment {
    Payment {
        id: PaymentId::new(),
        reference: generate_reference(PAYMENT_REFERENCE_PREFIX, now),
        contract_id: contract.id.clone(),
        payer_id,
        beneficiary_id: contract.landlord_id.clone(),
        purpose,
        method,
        rent_amount: amounts.rent,
        deposit_amount: amounts.deposit,
        commission_amount: amounts.commission,
        total_amount: amounts.total,
        rate_version: amounts.rate_version,
        commission_collection,
        external_ref: None,
        redirect_url: None,
        status,
        failure_reason: None,
        cash_received_by: None,
        escrowed_at: None,
        validation: None,
        refund: None,
        receipt: None,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}
