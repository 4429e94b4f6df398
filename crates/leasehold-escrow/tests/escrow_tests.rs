//! Escrow scenarios against an activated contract, in-memory storage and a
//! simulated mobile-money provider

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;

use leasehold_contracts::{
    ContractLifecycle, InMemoryDirectory, InMemoryDocumentStore, LifecycleConfig, LifecycleParts,
    ManualClock, ManualSealScheduler, NewContract, NoticeKind, Notifier, Outbound,
    SignatureService,
};
use leasehold_db::{DbError, DbResult, PaymentRepository, Storage};
use leasehold_escrow::{
    CashSettlement, EscrowConfig, EscrowParts, EscrowPaymentEngine, InMemoryProvider,
    IngestOutcome, PaymentReceipt, PaymentRequest, ProviderAdapter, ProviderInitiation,
    ProviderRegistry, ProviderStatus, ReceiptIssuer, WebhookEvent,
};
use leasehold_fees::CommissionCalculator;
use leasehold_signature::{
    CertificateSigner, Keypair, OtpConfig, OtpService, SigningTokenConfig, SigningTokenService,
};
use leasehold_types::{
    Actor, CashReceiver, CommissionCollection, ContractId, LeaseDuration, LeaseholdError,
    Payment, PaymentMethod, PaymentPurpose, PaymentStatus, TermsInput, TransactionType, UserId,
};

const LANDLORD_PHONE: &str = "+221770000011";
const TENANT_PHONE: &str = "+221770000012";
const WEBHOOK_SECRET: &str = "mm-a-webhook-secret-0001";

struct Harness {
    escrow: Arc<EscrowPaymentEngine>,
    lifecycle: Arc<ContractLifecycle>,
    signatures: SignatureService,
    provider: Arc<InMemoryProvider>,
    clock: Arc<ManualClock>,
    outbox: UnboundedReceiver<Outbound>,
    landlord: Actor,
    tenant: Actor,
    admin: Actor,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn harness() -> Harness {
    build_harness(Storage::in_memory(), Vec::new())
}

/// Harness over `storage`, with `extra` adapters registered beside the
/// default mobile-money sandbox
fn build_harness(storage: Storage, extra: Vec<Arc<dyn ProviderAdapter>>) -> Harness {
    let clock = Arc::new(ManualClock::new(start()));
    let (notifier, outbox) = Notifier::channel();

    let lifecycle = Arc::new(ContractLifecycle::new(
        LifecycleParts {
            storage: storage.clone(),
            fees: Arc::new(CommissionCalculator::new()),
            documents: Arc::new(InMemoryDocumentStore::new()),
            seals: Arc::new(ManualSealScheduler::new()),
            notifier: notifier.clone(),
            clock: clock.clone(),
            tokens: SigningTokenService::new(SigningTokenConfig::default()),
        },
        LifecycleConfig::default(),
    ));

    let landlord = Actor::user(UserId::new());
    let tenant = Actor::user(UserId::new());
    let directory = Arc::new(InMemoryDirectory::new());
    directory.register(landlord.user_id.clone(), LANDLORD_PHONE);
    directory.register(tenant.user_id.clone(), TENANT_PHONE);

    let signatures = SignatureService::new(
        lifecycle.clone(),
        OtpService::new(OtpConfig {
            pepper: "escrow-test-pepper".to_string(),
            ..OtpConfig::default()
        }),
        CertificateSigner::new(Keypair::generate()),
        directory,
    );

    let provider = Arc::new(InMemoryProvider::new(
        PaymentMethod::MobileMoneyA,
        WEBHOOK_SECRET,
    ));
    let mut providers = ProviderRegistry::with_manual_methods();
    providers.register(provider.clone());
    for adapter in extra {
        providers.register(adapter);
    }

    let escrow = Arc::new(EscrowPaymentEngine::new(
        EscrowParts {
            storage,
            providers,
            receipts: ReceiptIssuer::new(Keypair::generate()),
            notifier,
            clock: clock.clone(),
        },
        EscrowConfig::default(),
    ));

    Harness {
        escrow,
        lifecycle,
        signatures,
        provider,
        clock,
        outbox,
        landlord,
        tenant,
        admin: Actor::admin(UserId::new()),
    }
}

fn mobile_money(purpose: PaymentPurpose) -> PaymentRequest {
    PaymentRequest {
        method: PaymentMethod::MobileMoneyA,
        purpose,
    }
}

impl Harness {
    fn take_code(&mut self, phone: &str) -> String {
        let mut latest = None;
        while let Ok(message) = self.outbox.try_recv() {
            if let Outbound::Otp { phone: to, code } = message {
                if to == phone {
                    latest = Some(code);
                }
            }
        }
        latest.expect("no code queued")
    }

    /// Drain the queue and return the payloads of `kind` addressed to `user`
    fn notices(&mut self, user: &UserId, kind: NoticeKind) -> Vec<serde_json::Value> {
        let mut found = Vec::new();
        while let Ok(message) = self.outbox.try_recv() {
            if let Outbound::Notice { user: to, kind: k, payload } = message {
                if &to == user && k == kind {
                    found.push(payload);
                }
            }
        }
        found
    }

    async fn sign(&mut self, actor: &Actor, id: &ContractId, phone: &str) {
        let actor = actor.clone();
        self.signatures.request_otp(&actor, id).await.unwrap();
        let code = self.take_code(phone);
        self.signatures
            .verify_and_sign(&actor, id, &code, "10.0.0.2".into(), "test".into())
            .await
            .unwrap();
    }

    async fn draft(&self) -> ContractId {
        self.lifecycle
            .create(
                &self.landlord,
                NewContract {
                    landlord_id: self.landlord.user_id.clone(),
                    tenant_id: Some(self.tenant.user_id.clone()),
                    listing_id: None,
                    terms: TermsInput {
                        transaction_type: TransactionType::Rental,
                        monthly_rent: dec!(1_000_000),
                        duration: LeaseDuration::Months(12),
                        start_date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
                        special_conditions: None,
                    },
                },
            )
            .await
            .unwrap()
            .contract
            .id
    }

    async fn active_contract(&mut self) -> ContractId {
        let id = self.draft().await;
        let (landlord, tenant) = (self.landlord.clone(), self.tenant.clone());
        self.sign(&tenant, &id, TENANT_PHONE).await;
        self.sign(&landlord, &id, LANDLORD_PHONE).await;
        id
    }

    /// Initial settlement collected and sitting in escrow
    async fn escrowed(&mut self) -> (ContractId, leasehold_types::Payment) {
        let contract_id = self.active_contract().await;
        let payment = self
            .escrow
            .initiate(&self.tenant, &contract_id, mobile_money(PaymentPurpose::InitialSettlement))
            .await
            .unwrap();
        let txn = payment.external_ref.clone().unwrap();
        self.provider.complete(&txn, ProviderStatus::Succeeded);
        let (body, signature) = self.provider.webhook(&txn, ProviderStatus::Succeeded).unwrap();
        let outcome = self
            .escrow
            .ingest_webhook("mobile_money_a", &body, Some(&signature))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Applied);
        let payment = self.escrow.get(&self.tenant, &payment.id).await.unwrap();
        (contract_id, payment)
    }
}

#[tokio::test]
async fn test_initiate_uses_fee_snapshot() {
    let mut h = harness();
    let contract_id = h.active_contract().await;

    let payment = h
        .escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::InitialSettlement))
        .await
        .unwrap();

    assert_eq!(payment.status, PaymentStatus::Processing);
    assert_eq!(payment.rent_amount, dec!(1_000_000));
    assert_eq!(payment.deposit_amount, dec!(2_000_000));
    assert_eq!(payment.commission_amount, dec!(500_000));
    assert_eq!(payment.total_amount, dec!(3_500_000));
    assert_eq!(payment.beneficiary_id, h.landlord.user_id);
    assert!(payment.reference.starts_with("PAY"));
    assert!(payment.external_ref.as_deref().unwrap().starts_with("mobile_money_a-"));
    assert!(payment.redirect_url.is_some());
}

#[tokio::test]
async fn test_rent_payment_carries_no_deposit_or_commission() {
    let mut h = harness();
    let contract_id = h.active_contract().await;

    let payment = h
        .escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::Rent))
        .await
        .unwrap();
    assert_eq!(payment.total_amount, dec!(1_000_000));
    assert_eq!(payment.deposit_amount, Decimal::ZERO);
    assert_eq!(payment.commission_amount, Decimal::ZERO);
}

#[tokio::test]
async fn test_initiate_guards() {
    let mut h = harness();
    let draft = h.draft().await;

    let result = h
        .escrow
        .initiate(&h.tenant, &draft, mobile_money(PaymentPurpose::InitialSettlement))
        .await;
    assert!(matches!(result, Err(LeaseholdError::InvalidTransition { .. })));

    let active = h.active_contract().await;
    let result = h
        .escrow
        .initiate(&h.landlord, &active, mobile_money(PaymentPurpose::InitialSettlement))
        .await;
    assert!(matches!(result, Err(LeaseholdError::Unauthorized)));

    let cash = PaymentRequest {
        method: PaymentMethod::Cash,
        purpose: PaymentPurpose::InitialSettlement,
    };
    let result = h.escrow.initiate(&h.tenant, &active, cash).await;
    assert!(matches!(result, Err(LeaseholdError::InvalidInput { .. })));
}

#[tokio::test]
async fn test_duplicate_window() {
    let mut h = harness();
    let contract_id = h.active_contract().await;
    let request = mobile_money(PaymentPurpose::InitialSettlement);

    let first = h.escrow.initiate(&h.tenant, &contract_id, request).await.unwrap();

    h.clock.advance(Duration::minutes(9));
    match h.escrow.initiate(&h.tenant, &contract_id, request).await {
        Err(LeaseholdError::DuplicatePayment { payment_reference }) => {
            assert_eq!(payment_reference, first.reference);
        }
        other => panic!("expected duplicate, got {:?}", other),
    }

    // outside the window a fresh attempt is allowed
    h.clock.advance(Duration::minutes(2));
    let second = h.escrow.initiate(&h.tenant, &contract_id, request).await.unwrap();
    assert_ne!(second.id, first.id);
}

#[tokio::test]
async fn test_webhook_applied_once() {
    let mut h = harness();
    let contract_id = h.active_contract().await;
    let payment = h
        .escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::InitialSettlement))
        .await
        .unwrap();
    let txn = payment.external_ref.clone().unwrap();
    h.provider.complete(&txn, ProviderStatus::Succeeded);
    let (body, signature) = h.provider.webhook(&txn, ProviderStatus::Succeeded).unwrap();

    let first = h
        .escrow
        .ingest_webhook("mobile_money_a", &body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(first, IngestOutcome::Applied);
    let escrowed = h.escrow.get(&h.tenant, &payment.id).await.unwrap();
    assert_eq!(escrowed.status, PaymentStatus::Escrow);
    assert_eq!(escrowed.escrowed_at, Some(start()));

    h.clock.advance(Duration::minutes(1));
    let replay = h
        .escrow
        .ingest_webhook("mobile_money_a", &body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(replay, IngestOutcome::AlreadyApplied);

    let after = h.escrow.get(&h.tenant, &payment.id).await.unwrap();
    assert_eq!(after.version, escrowed.version);
    assert_eq!(after.escrowed_at, Some(start()));

    // landlord hears about the escrow exactly once
    let landlord = h.landlord.user_id.clone();
    let notices = h.notices(&landlord, NoticeKind::PaymentEscrowed);
    assert_eq!(notices.len(), 1);
}

#[tokio::test]
async fn test_webhook_authentication() {
    let mut h = harness();
    let contract_id = h.active_contract().await;
    let payment = h
        .escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::InitialSettlement))
        .await
        .unwrap();
    let txn = payment.external_ref.clone().unwrap();
    let (body, signature) = h.provider.webhook(&txn, ProviderStatus::Succeeded).unwrap();

    for (method, sig) in [
        ("mobile_money_a", None),
        ("mobile_money_a", Some("00ff")),
        ("mobile_money_b", Some(signature.as_str())),
        ("cash", Some(signature.as_str())),
        ("carrier_pigeon", Some(signature.as_str())),
    ] {
        let result = h.escrow.ingest_webhook(method, &body, sig).await;
        assert!(matches!(result, Err(LeaseholdError::InvalidWebhook)), "{}", method);
    }

    // tampered body
    let mut tampered = body.clone();
    tampered.extend_from_slice(b" ");
    let result = h
        .escrow
        .ingest_webhook("mobile_money_a", &tampered, Some(&signature))
        .await;
    assert!(matches!(result, Err(LeaseholdError::InvalidWebhook)));

    let unchanged = h.escrow.get(&h.tenant, &payment.id).await.unwrap();
    assert_eq!(unchanged.status, PaymentStatus::Processing);
}

#[tokio::test]
async fn test_unmatched_confirmation() {
    let h = harness();
    let outcome = h
        .escrow
        .ingest_provider_confirmation(
            PaymentMethod::MobileMoneyA,
            "mobile_money_a-unknown",
            ProviderStatus::Succeeded,
        )
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Unmatched);
}

#[tokio::test]
async fn test_failed_webhook_is_terminal() {
    let mut h = harness();
    let contract_id = h.active_contract().await;
    let payment = h
        .escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::InitialSettlement))
        .await
        .unwrap();
    let txn = payment.external_ref.clone().unwrap();

    let failed = ProviderStatus::Failed {
        reason: "insufficient balance".to_string(),
    };
    let (body, signature) = h.provider.webhook(&txn, failed).unwrap();
    let outcome = h
        .escrow
        .ingest_webhook("mobile_money_a", &body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Applied);

    let payment = h.escrow.get(&h.tenant, &payment.id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.failure_reason.as_deref(), Some("insufficient balance"));

    // a late success does not resurrect it
    let outcome = h
        .escrow
        .ingest_provider_confirmation(PaymentMethod::MobileMoneyA, &txn, ProviderStatus::Succeeded)
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Ignored);

    // and the tenant may try again straight away
    h.escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::InitialSettlement))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_provider_failure_leaves_payment_pending() {
    let mut h = harness();
    let contract_id = h.active_contract().await;
    h.provider.fail_next_call("gateway down");

    let result = h
        .escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::InitialSettlement))
        .await;
    assert!(matches!(result, Err(LeaseholdError::ProviderUnavailable { .. })));

    let payments = h.escrow.list_for_contract(&h.tenant, &contract_id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Pending);
    assert!(payments[0].external_ref.is_none());

    let retried = h.escrow.redispatch(&h.tenant, &payments[0].id).await.unwrap();
    assert_eq!(retried.status, PaymentStatus::Processing);
    assert!(retried.external_ref.is_some());

    // once dispatched it cannot be dispatched again
    let result = h.escrow.redispatch(&h.tenant, &retried.id).await;
    assert!(matches!(result, Err(LeaseholdError::InvalidTransition { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_provider_timeout() {
    let mut h = harness();
    let contract_id = h.active_contract().await;
    h.provider.set_delay(Some(StdDuration::from_secs(30)));

    let result = h
        .escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::InitialSettlement))
        .await;
    match result {
        Err(LeaseholdError::ProviderTimeout { method }) => assert_eq!(method, "mobile_money_a"),
        other => panic!("expected timeout, got {:?}", other),
    }

    let payments = h.escrow.list_for_contract(&h.tenant, &contract_id).await.unwrap();
    assert_eq!(payments[0].status, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_poll_reconciles_processing_payment() {
    let mut h = harness();
    let contract_id = h.active_contract().await;
    let payment = h
        .escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::Rent))
        .await
        .unwrap();

    let still = h.escrow.poll_provider_status(&h.tenant, &payment.id).await.unwrap();
    assert_eq!(still.status, PaymentStatus::Processing);

    h.provider
        .complete(payment.external_ref.as_deref().unwrap(), ProviderStatus::Succeeded);
    let polled = h.escrow.poll_provider_status(&h.tenant, &payment.id).await.unwrap();
    assert_eq!(polled.status, PaymentStatus::Escrow);
}

#[tokio::test]
async fn test_release_issues_verifiable_receipt() {
    let mut h = harness();
    let (_, payment) = h.escrowed().await;
    let txn = payment.external_ref.clone().unwrap();

    // only the beneficiary validates
    let result = h
        .escrow
        .validate_by_landlord(&h.tenant, &payment.id, true, None)
        .await;
    assert!(matches!(result, Err(LeaseholdError::Unauthorized)));

    let released = h
        .escrow
        .validate_by_landlord(&h.landlord, &payment.id, true, Some("received".into()))
        .await
        .unwrap();
    assert_eq!(released.status, PaymentStatus::Confirmed);
    assert!(released.validation.as_ref().unwrap().approved);
    assert_eq!(h.provider.released(&txn), dec!(3_000_000));

    let receipt_ref = released.receipt.clone().unwrap();
    let tenant = h.tenant.user_id.clone();
    let payloads = h.notices(&tenant, NoticeKind::PaymentReleased);
    assert_eq!(payloads.len(), 1);
    let receipt: PaymentReceipt = serde_json::from_value(payloads[0]["receipt"].clone()).unwrap();
    receipt.verify().unwrap();
    assert_eq!(receipt.body.receipt_id, receipt_ref.receipt_id);
    assert_eq!(receipt.body.landlord_share, dec!(3_000_000));
    assert_eq!(receipt.public_key, h.escrow.receipt_public_key());

    // validation happens once
    let result = h
        .escrow
        .validate_by_landlord(&h.landlord, &payment.id, true, None)
        .await;
    assert!(matches!(result, Err(LeaseholdError::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_dispute_then_refund_keeps_commission() {
    let mut h = harness();
    let (_, payment) = h.escrowed().await;
    let txn = payment.external_ref.clone().unwrap();

    let disputed = h
        .escrow
        .validate_by_landlord(&h.landlord, &payment.id, false, Some("amount short".into()))
        .await
        .unwrap();
    assert_eq!(disputed.status, PaymentStatus::Disputed);
    assert_eq!(h.provider.released(&txn), Decimal::ZERO);

    // the payer cannot refund themselves
    let result = h
        .escrow
        .refund(&h.tenant, &payment.id, "dispute".into(), None)
        .await;
    assert!(matches!(result, Err(LeaseholdError::Unauthorized)));

    let refunded = h
        .escrow
        .refund(&h.admin, &payment.id, "dispute upheld".into(), Some(dec!(5_000_000)))
        .await
        .unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);

    let record = refunded.refund.unwrap();
    assert_eq!(record.amount, dec!(3_000_000));
    assert_eq!(record.requested_amount, Some(dec!(5_000_000)));
    assert_eq!(h.provider.refunded(&txn), dec!(3_000_000));
    assert!(refunded.total_amount - record.amount >= refunded.commission_amount);

    let result = h
        .escrow
        .refund(&h.admin, &payment.id, "again".into(), None)
        .await;
    assert!(matches!(result, Err(LeaseholdError::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_refund_rejects_bad_requests() {
    let mut h = harness();
    let (_, payment) = h.escrowed().await;

    let result = h
        .escrow
        .refund(&h.landlord, &payment.id, "   ".into(), None)
        .await;
    assert!(matches!(result, Err(LeaseholdError::InvalidInput { .. })));

    let result = h
        .escrow
        .refund(&h.landlord, &payment.id, "partial".into(), Some(Decimal::ZERO))
        .await;
    assert!(matches!(result, Err(LeaseholdError::InvalidInput { .. })));

    let partial = h
        .escrow
        .refund(&h.landlord, &payment.id, "partial".into(), Some(dec!(400_000)))
        .await
        .unwrap();
    assert_eq!(partial.refund.unwrap().amount, dec!(400_000));
}

#[tokio::test]
async fn test_settled_initial_payment_blocks_another() {
    let mut h = harness();
    let (contract_id, _) = h.escrowed().await;

    let result = h
        .escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::InitialSettlement))
        .await;
    assert!(matches!(result, Err(LeaseholdError::InvalidTransition { .. })));

    // rent is still payable
    h.escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::Rent))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cash_settlement() {
    let mut h = harness();
    let contract_id = h.active_contract().await;

    let short = CashSettlement {
        method: PaymentMethod::Cash,
        purpose: PaymentPurpose::InitialSettlement,
        amount_received: dec!(3_000_000),
        received_by: CashReceiver::Landlord,
    };
    match h.escrow.record_cash_settlement(&h.landlord, &contract_id, short).await {
        Err(LeaseholdError::InsufficientAmount { expected, received }) => {
            assert_eq!(expected.parse::<Decimal>().unwrap(), dec!(3_500_000));
            assert_eq!(received.parse::<Decimal>().unwrap(), dec!(3_000_000));
        }
        other => panic!("expected insufficient amount, got {:?}", other),
    }

    let settlement = CashSettlement {
        method: PaymentMethod::Cash,
        purpose: PaymentPurpose::InitialSettlement,
        amount_received: dec!(3_500_000),
        received_by: CashReceiver::Landlord,
    };
    let result = h
        .escrow
        .record_cash_settlement(&h.tenant, &contract_id, settlement.clone())
        .await;
    assert!(matches!(result, Err(LeaseholdError::Unauthorized)));

    let (payment, receipt) = h
        .escrow
        .record_cash_settlement(&h.landlord, &contract_id, settlement)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Confirmed);
    assert_eq!(payment.payer_id, h.tenant.user_id);
    assert_eq!(
        payment.commission_collection,
        CommissionCollection::ToCollectSeparately
    );
    assert_eq!(payment.cash_received_by, Some(CashReceiver::Landlord));
    receipt.verify().unwrap();
    assert_eq!(payment.receipt.unwrap().content_hash, receipt.content_hash);

    let mobile = CashSettlement {
        method: PaymentMethod::MobileMoneyA,
        purpose: PaymentPurpose::Rent,
        amount_received: dec!(1_000_000),
        received_by: CashReceiver::Platform,
    };
    let result = h
        .escrow
        .record_cash_settlement(&h.landlord, &contract_id, mobile)
        .await;
    assert!(matches!(result, Err(LeaseholdError::InvalidInput { .. })));
}

fn cash_initial_settlement() -> CashSettlement {
    CashSettlement {
        method: PaymentMethod::Cash,
        purpose: PaymentPurpose::InitialSettlement,
        amount_received: dec!(3_500_000),
        received_by: CashReceiver::Landlord,
    }
}

#[tokio::test]
async fn test_second_cash_initial_settlement_rejected() {
    let mut h = harness();
    let contract_id = h.active_contract().await;

    h.escrow
        .record_cash_settlement(&h.landlord, &contract_id, cash_initial_settlement())
        .await
        .unwrap();
    let result = h
        .escrow
        .record_cash_settlement(&h.landlord, &contract_id, cash_initial_settlement())
        .await;
    assert!(matches!(result, Err(LeaseholdError::InvalidTransition { .. })));

    // the provider path is closed as well once cash settled it
    let result = h
        .escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::InitialSettlement))
        .await;
    assert!(matches!(result, Err(LeaseholdError::InvalidTransition { .. })));

    let initial: Vec<_> = h
        .escrow
        .list_for_contract(&h.admin, &contract_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|p| p.purpose == PaymentPurpose::InitialSettlement)
        .collect();
    assert_eq!(initial.len(), 1);

    // cash rent is still accepted
    let rent = CashSettlement {
        method: PaymentMethod::Cash,
        purpose: PaymentPurpose::Rent,
        amount_received: dec!(1_000_000),
        received_by: CashReceiver::Platform,
    };
    h.escrow
        .record_cash_settlement(&h.landlord, &contract_id, rent)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cash_initial_settlement_after_escrow_rejected() {
    let mut h = harness();
    let (contract_id, _) = h.escrowed().await;

    let result = h
        .escrow
        .record_cash_settlement(&h.admin, &contract_id, cash_initial_settlement())
        .await;
    assert!(matches!(result, Err(LeaseholdError::InvalidTransition { .. })));
    assert_eq!(
        h.escrow
            .list_for_contract(&h.admin, &contract_id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_payment_visibility() {
    let mut h = harness();
    let (contract_id, payment) = h.escrowed().await;

    let stranger = Actor::user(UserId::new());
    assert!(matches!(
        h.escrow.get(&stranger, &payment.id).await,
        Err(LeaseholdError::Unauthorized)
    ));
    assert!(matches!(
        h.escrow.list_for_contract(&stranger, &contract_id).await,
        Err(LeaseholdError::Unauthorized)
    ));

    assert!(h.escrow.get(&h.landlord, &payment.id).await.is_ok());
    assert!(h.escrow.get(&h.admin, &payment.id).await.is_ok());
    assert_eq!(
        h.escrow
            .list_for_contract(&h.admin, &contract_id)
            .await
            .unwrap()
            .len(),
        1
    );
}

// =============================================================================
// Provider payouts after release
// =============================================================================

#[tokio::test]
async fn test_refund_after_release_claws_back_and_keeps_commission() {
    let mut h = harness();
    let (_, payment) = h.escrowed().await;
    let txn = payment.external_ref.clone().unwrap();

    let confirmed = h
        .escrow
        .validate_by_landlord(&h.landlord, &payment.id, true, None)
        .await
        .unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Confirmed);
    assert_eq!(h.provider.released(&txn), dec!(3_000_000));

    let refunded = h
        .escrow
        .refund(&h.admin, &payment.id, "lease voided".into(), None)
        .await
        .unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);

    let record = refunded.refund.clone().unwrap();
    assert_eq!(record.amount, dec!(3_000_000));
    assert_eq!(h.provider.refunded(&txn), dec!(3_000_000));
    assert_eq!(h.provider.clawed_back(&txn), dec!(3_000_000));
    assert_eq!(h.provider.released(&txn), Decimal::ZERO);

    // the platform still holds exactly its commission
    assert_eq!(refunded.total_amount - record.amount, refunded.commission_amount);
    assert_eq!(refunded.commission_amount, dec!(500_000));
}

/// Payment store whose next `update` can be made to fail
struct FlakyPayments {
    inner: Arc<dyn PaymentRepository>,
    fail_next_update: AtomicBool,
}

impl FlakyPayments {
    fn new(inner: Arc<dyn PaymentRepository>) -> Self {
        Self {
            inner,
            fail_next_update: AtomicBool::new(false),
        }
    }

    fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentRepository for FlakyPayments {
    async fn insert(&self, payment: &Payment) -> DbResult<()> {
        self.inner.insert(payment).await
    }

    async fn get(&self, id: &leasehold_types::PaymentId) -> DbResult<Option<Payment>> {
        self.inner.get(id).await
    }

    async fn update(&self, payment: Payment) -> DbResult<Payment> {
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(DbError::VersionConflict {
                entity: "payment",
                id: payment.id.to_string(),
            });
        }
        self.inner.update(payment).await
    }

    async fn find_by_external_ref(
        &self,
        method: PaymentMethod,
        external_ref: &str,
    ) -> DbResult<Option<Payment>> {
        self.inner.find_by_external_ref(method, external_ref).await
    }

    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<Payment>> {
        self.inner.find_by_reference(reference).await
    }

    async fn list_by_contract(&self, contract_id: &ContractId) -> DbResult<Vec<Payment>> {
        self.inner.list_by_contract(contract_id).await
    }
}

#[tokio::test]
async fn test_release_retried_after_failed_commit_pays_out_once() {
    let mut storage = Storage::in_memory();
    let flaky = Arc::new(FlakyPayments::new(storage.payments.clone()));
    storage.payments = flaky.clone();
    let mut h = build_harness(storage, Vec::new());
    let (_, payment) = h.escrowed().await;
    let txn = payment.external_ref.clone().unwrap();

    flaky.fail_next_update();
    let result = h
        .escrow
        .validate_by_landlord(&h.landlord, &payment.id, true, None)
        .await;
    assert!(matches!(
        result,
        Err(LeaseholdError::ConcurrentModification { .. })
    ));
    // the provider paid out but the record did not move
    assert_eq!(h.provider.released(&txn), dec!(3_000_000));
    let stuck = h.escrow.get(&h.landlord, &payment.id).await.unwrap();
    assert_eq!(stuck.status, PaymentStatus::Escrow);

    let confirmed = h
        .escrow
        .validate_by_landlord(&h.landlord, &payment.id, true, None)
        .await
        .unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Confirmed);
    assert_eq!(h.provider.released(&txn), dec!(3_000_000));
}

// =============================================================================
// Webhook races
// =============================================================================

const EARLY_SECRET: &str = "mm-b-webhook-secret-0002";

/// Sandbox whose payer completes before `initiate` returns; the test
/// delivers the webhook while the engine still waits for the answer
struct EarlyConfirmingProvider {
    inner: Arc<InMemoryProvider>,
    announced: UnboundedSender<String>,
    resume: Arc<Notify>,
}

#[async_trait]
impl ProviderAdapter for EarlyConfirmingProvider {
    fn method(&self) -> PaymentMethod {
        self.inner.method()
    }

    async fn initiate(&self, amount: Decimal, reference: &str) -> leasehold_types::Result<ProviderInitiation> {
        let initiation = self.inner.initiate(amount, reference).await?;
        self.inner
            .complete(&initiation.provider_txn_id, ProviderStatus::Succeeded);
        self.announced
            .send(initiation.provider_txn_id.clone())
            .unwrap();
        self.resume.notified().await;
        Ok(initiation)
    }

    async fn check_status(&self, provider_txn_id: &str) -> leasehold_types::Result<ProviderStatus> {
        self.inner.check_status(provider_txn_id).await
    }

    async fn release(
        &self,
        provider_txn_id: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> leasehold_types::Result<()> {
        self.inner.release(provider_txn_id, amount, idempotency_key).await
    }

    async fn refund(
        &self,
        provider_txn_id: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> leasehold_types::Result<()> {
        self.inner.refund(provider_txn_id, amount, idempotency_key).await
    }

    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool {
        self.inner.verify_webhook(body, signature)
    }

    fn parse_webhook(&self, body: &[u8]) -> leasehold_types::Result<WebhookEvent> {
        self.inner.parse_webhook(body)
    }
}

#[tokio::test]
async fn test_webhook_ahead_of_dispatch_matched_by_reference() {
    let inner = Arc::new(InMemoryProvider::new(
        PaymentMethod::MobileMoneyB,
        EARLY_SECRET,
    ));
    let (announced, mut announcements) = tokio::sync::mpsc::unbounded_channel();
    let resume = Arc::new(Notify::new());
    let early: Arc<dyn ProviderAdapter> = Arc::new(EarlyConfirmingProvider {
        inner: inner.clone(),
        announced,
        resume: resume.clone(),
    });
    let mut h = build_harness(Storage::in_memory(), vec![early]);
    let contract_id = h.active_contract().await;
    let request = PaymentRequest {
        method: PaymentMethod::MobileMoneyB,
        purpose: PaymentPurpose::InitialSettlement,
    };

    let (initiated, (txn, outcome)) = tokio::join!(
        h.escrow.initiate(&h.tenant, &contract_id, request),
        async {
            let txn = announcements.recv().await.unwrap();
            let (body, signature) = inner.webhook(&txn, ProviderStatus::Succeeded).unwrap();
            let outcome = h
                .escrow
                .ingest_webhook("mobile_money_b", &body, Some(&signature))
                .await;
            resume.notify_one();
            (txn, outcome)
        }
    );

    assert_eq!(outcome.unwrap(), IngestOutcome::Applied);
    let payment = initiated.unwrap();
    assert_eq!(payment.status, PaymentStatus::Escrow);
    assert_eq!(payment.external_ref.as_deref(), Some(txn.as_str()));
    assert!(payment.redirect_url.is_some());
    assert_eq!(payment.escrowed_at, Some(start()));

    let landlord = h.landlord.user_id.clone();
    assert_eq!(h.notices(&landlord, NoticeKind::PaymentEscrowed).len(), 1);
}

#[tokio::test]
async fn test_webhook_for_other_payment_reference_is_unmatched() {
    let mut h = harness();
    let contract_id = h.active_contract().await;
    let payment = h
        .escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::InitialSettlement))
        .await
        .unwrap();

    // the reference is already bound to a different provider transaction
    let body = serde_json::to_vec(&WebhookEvent {
        transaction_id: "mobile_money_a-stranger".to_string(),
        reference: Some(payment.reference.clone()),
        status: ProviderStatus::Succeeded,
    })
    .unwrap();
    let signature = leasehold_escrow::sign_webhook(WEBHOOK_SECRET, &body).unwrap();

    let outcome = h
        .escrow
        .ingest_webhook("mobile_money_a", &body, Some(&signature))
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Unmatched);
    let unchanged = h.escrow.get(&h.tenant, &payment.id).await.unwrap();
    assert_eq!(unchanged.status, PaymentStatus::Processing);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_webhook_deliveries_apply_once() {
    let mut h = harness();
    let contract_id = h.active_contract().await;
    let payment = h
        .escrow
        .initiate(&h.tenant, &contract_id, mobile_money(PaymentPurpose::InitialSettlement))
        .await
        .unwrap();
    let txn = payment.external_ref.clone().unwrap();
    h.provider.complete(&txn, ProviderStatus::Succeeded);
    let (body, signature) = h.provider.webhook(&txn, ProviderStatus::Succeeded).unwrap();

    let deliveries: Vec<_> = (0..16)
        .map(|_| {
            let escrow = Arc::clone(&h.escrow);
            let (body, signature) = (body.clone(), signature.clone());
            tokio::spawn(async move {
                escrow
                    .ingest_webhook("mobile_money_a", &body, Some(&signature))
                    .await
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for delivery in deliveries {
        outcomes.push(delivery.await.unwrap().unwrap());
    }
    let applied = outcomes
        .iter()
        .filter(|o| **o == IngestOutcome::Applied)
        .count();
    assert_eq!(applied, 1, "{:?}", outcomes);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, IngestOutcome::Applied | IngestOutcome::AlreadyApplied)));

    let escrowed = h.escrow.get(&h.tenant, &payment.id).await.unwrap();
    assert_eq!(escrowed.status, PaymentStatus::Escrow);

    let landlord = h.landlord.user_id.clone();
    assert_eq!(h.notices(&landlord, NoticeKind::PaymentEscrowed).len(), 1);
}
