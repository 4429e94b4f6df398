//! Payment provider adapters
//!
//! One adapter per payment method. Provider-backed methods (mobile money)
//! collect through an API and confirm asynchronously by webhook; the other
//! methods are settled out of band and use [`ManualSettlementAdapter`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use leasehold_signature::{constant_time_eq, hmac_sha256_hex, random_hex};
use leasehold_types::{LeaseholdError, PaymentMethod, Result};

/// Provider answer to a collection request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInitiation {
    pub provider_txn_id: String,
    /// Checkout page for the payer, when the provider uses one
    pub redirect_url: Option<String>,
}

/// Collection status as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProviderStatus {
    Pending,
    Succeeded,
    Failed {
        #[serde(default)]
        reason: String,
    },
}

/// Authenticated webhook content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub transaction_id: String,
    /// Platform reference echoed back by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(flatten)]
    pub status: ProviderStatus,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn method(&self) -> PaymentMethod;

    async fn initiate(&self, amount: Decimal, reference: &str) -> Result<ProviderInitiation>;

    async fn check_status(&self, provider_txn_id: &str) -> Result<ProviderStatus>;

    /// Pay `amount` out to the beneficiary. A repeated `idempotency_key`
    /// succeeds without moving money again.
    async fn release(&self, provider_txn_id: &str, amount: Decimal, idempotency_key: &str)
        -> Result<()>;

    /// Return `amount` to the payer, drawing first on funds already released.
    /// Same idempotency contract as [`ProviderAdapter::release`].
    async fn refund(&self, provider_txn_id: &str, amount: Decimal, idempotency_key: &str)
        -> Result<()>;

    /// Whether `signature` authenticates `body`
    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool;

    /// Decode an already verified webhook body
    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookEvent>;
}

/// Hex HMAC-SHA256 of a webhook body, as providers send it
pub fn sign_webhook(secret: &str, body: &[u8]) -> Result<String> {
    Ok(hmac_sha256_hex(secret.as_bytes(), body)?)
}

/// Constant-time check of a hex HMAC-SHA256 webhook signature
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    match sign_webhook(secret, body) {
        Ok(expected) => constant_time_eq(&expected, signature.trim()),
        Err(_) => false,
    }
}

// =============================================================================
// Simulated provider
// =============================================================================

#[derive(Debug, Clone)]
struct SimulatedTransaction {
    reference: String,
    amount: Decimal,
    status: ProviderStatus,
    released: Decimal,
    refunded: Decimal,
    /// Debited back from the beneficiary to fund refunds
    clawed_back: Decimal,
    /// Idempotency key -> amount of every payout already executed
    payouts: HashMap<String, Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payout {
    Release,
    Refund,
}

/// Mobile-money provider kept entirely in memory. Used by tests and the
/// development server; failure and latency can be injected.
pub struct InMemoryProvider {
    method: PaymentMethod,
    webhook_secret: String,
    transactions: DashMap<String, SimulatedTransaction>,
    fail_next: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
}

impl InMemoryProvider {
    pub fn new(method: PaymentMethod, webhook_secret: impl Into<String>) -> Self {
        Self {
            method,
            webhook_secret: webhook_secret.into(),
            transactions: DashMap::new(),
            fail_next: Mutex::new(None),
            delay: Mutex::new(None),
        }
    }

    /// Make the next provider call fail with `reason`
    pub fn fail_next_call(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }

    /// Delay every call, to exercise timeouts
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Settle a transaction on the provider side
    pub fn complete(&self, provider_txn_id: &str, status: ProviderStatus) -> bool {
        match self.transactions.get_mut(provider_txn_id) {
            Some(mut txn) => {
                txn.status = status;
                true
            }
            None => false,
        }
    }

    /// Signed webhook body announcing `status` for a transaction
    pub fn webhook(&self, provider_txn_id: &str, status: ProviderStatus) -> Result<(Vec<u8>, String)> {
        let reference = self
            .transactions
            .get(provider_txn_id)
            .map(|t| t.reference.clone());
        let body = serde_json::to_vec(&WebhookEvent {
            transaction_id: provider_txn_id.to_string(),
            reference,
            status,
        })
        .map_err(|e| LeaseholdError::internal(e.to_string()))?;
        let signature = sign_webhook(&self.webhook_secret, &body)?;
        Ok((body, signature))
    }

    pub fn released(&self, provider_txn_id: &str) -> Decimal {
        self.transactions
            .get(provider_txn_id)
            .map_or(Decimal::ZERO, |t| t.released)
    }

    pub fn refunded(&self, provider_txn_id: &str) -> Decimal {
        self.transactions
            .get(provider_txn_id)
            .map_or(Decimal::ZERO, |t| t.refunded)
    }

    pub fn clawed_back(&self, provider_txn_id: &str) -> Decimal {
        self.transactions
            .get(provider_txn_id)
            .map_or(Decimal::ZERO, |t| t.clawed_back)
    }

    async fn simulate_latency(&self) -> Result<()> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.fail_next.lock().take() {
            Some(reason) => Err(self.unavailable(reason)),
            None => Ok(()),
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> LeaseholdError {
        LeaseholdError::ProviderUnavailable {
            method: self.method.to_string(),
            reason: reason.into(),
        }
    }

    /// Move `amount` out of a settled transaction.
    ///
    /// Releases come out of the held balance. Refunds claw back from the
    /// beneficiary first, then from the held balance; the payer never gets
    /// back more than was collected.
    fn pay_out(&self, provider_txn_id: &str, amount: Decimal, kind: Payout, idempotency_key: &str) -> Result<()> {
        let mut txn = self
            .transactions
            .get_mut(provider_txn_id)
            .ok_or_else(|| self.unavailable(format!("unknown transaction {}", provider_txn_id)))?;

        if let Some(&executed) = txn.payouts.get(idempotency_key) {
            if executed != amount {
                return Err(self.unavailable(format!(
                    "idempotency key {} reused with a different amount",
                    idempotency_key
                )));
            }
            debug!(txn = provider_txn_id, key = idempotency_key, "Payout replay ignored");
            return Ok(());
        }
        if txn.status != ProviderStatus::Succeeded {
            return Err(self.unavailable("transaction not settled"));
        }

        match kind {
            Payout::Release => {
                if txn.released + txn.refunded + amount > txn.amount {
                    return Err(self.unavailable("amount exceeds collected funds"));
                }
                txn.released += amount;
            }
            Payout::Refund => {
                if txn.refunded + amount > txn.amount {
                    return Err(self.unavailable("amount exceeds collected funds"));
                }
                let clawback = amount.min(txn.released);
                txn.released -= clawback;
                txn.clawed_back += clawback;
                txn.refunded += amount;
            }
        }
        txn.payouts.insert(idempotency_key.to_string(), amount);
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for InMemoryProvider {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn initiate(&self, amount: Decimal, reference: &str) -> Result<ProviderInitiation> {
        self.simulate_latency().await?;

        let provider_txn_id = format!("{}-{}", self.method, random_hex(8));
        self.transactions.insert(
            provider_txn_id.clone(),
            SimulatedTransaction {
                reference: reference.to_string(),
                amount,
                status: ProviderStatus::Pending,
                released: Decimal::ZERO,
                refunded: Decimal::ZERO,
                clawed_back: Decimal::ZERO,
                payouts: HashMap::new(),
            },
        );

        debug!(method = %self.method, reference, txn = %provider_txn_id, "Simulated collection started");
        Ok(ProviderInitiation {
            redirect_url: Some(format!("/simulated-checkout/{}", provider_txn_id)),
            provider_txn_id,
        })
    }

    async fn check_status(&self, provider_txn_id: &str) -> Result<ProviderStatus> {
        self.simulate_latency().await?;
        self.transactions
            .get(provider_txn_id)
            .map(|t| t.status.clone())
            .ok_or_else(|| self.unavailable(format!("unknown transaction {}", provider_txn_id)))
    }

    async fn release(&self, provider_txn_id: &str, amount: Decimal, idempotency_key: &str) -> Result<()> {
        self.simulate_latency().await?;
        self.pay_out(provider_txn_id, amount, Payout::Release, idempotency_key)
    }

    async fn refund(&self, provider_txn_id: &str, amount: Decimal, idempotency_key: &str) -> Result<()> {
        self.simulate_latency().await?;
        self.pay_out(provider_txn_id, amount, Payout::Refund, idempotency_key)
    }

    fn verify_webhook(&self, body: &[u8], signature: &str) -> bool {
        verify_webhook_signature(&self.webhook_secret, body, signature)
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookEvent> {
        serde_json::from_slice(body).map_err(|_| LeaseholdError::InvalidWebhook)
    }
}

// =============================================================================
// Out-of-band methods
// =============================================================================

/// Bank transfer, cash and check. Nothing to call: money moves by hand and is
/// reconciled through cash settlements, so release and refund only log.
pub struct ManualSettlementAdapter {
    method: PaymentMethod,
}

impl ManualSettlementAdapter {
    pub fn new(method: PaymentMethod) -> Self {
        Self { method }
    }
}

#[async_trait]
impl ProviderAdapter for ManualSettlementAdapter {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn initiate(&self, _amount: Decimal, _reference: &str) -> Result<ProviderInitiation> {
        Err(LeaseholdError::invalid_input(
            "method",
            format!("{} is settled out of band", self.method),
        ))
    }

    async fn check_status(&self, _provider_txn_id: &str) -> Result<ProviderStatus> {
        Err(LeaseholdError::invalid_input(
            "method",
            format!("{} has no provider status", self.method),
        ))
    }

    async fn release(&self, reference: &str, amount: Decimal, idempotency_key: &str) -> Result<()> {
        info!(method = %self.method, reference, %amount, key = idempotency_key, "Manual release recorded");
        Ok(())
    }

    async fn refund(&self, reference: &str, amount: Decimal, idempotency_key: &str) -> Result<()> {
        info!(method = %self.method, reference, %amount, key = idempotency_key, "Manual refund recorded");
        Ok(())
    }

    fn verify_webhook(&self, _body: &[u8], _signature: &str) -> bool {
        false
    }

    fn parse_webhook(&self, _body: &[u8]) -> Result<WebhookEvent> {
        Err(LeaseholdError::InvalidWebhook)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Adapter lookup by payment method
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<PaymentMethod, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the manual adapter for every out-of-band method
    pub fn with_manual_methods() -> Self {
        let mut registry = Self::new();
        for method in PaymentMethod::ALL {
            if !method.is_provider_backed() {
                registry.register(Arc::new(ManualSettlementAdapter::new(method)));
            }
        }
        registry
    }

    /// Register under the adapter's own method, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.method(), adapter);
    }

    pub fn get(&self, method: PaymentMethod) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&method)
            .cloned()
            .ok_or_else(|| LeaseholdError::ProviderUnavailable {
                method: method.to_string(),
                reason: "no adapter registered".to_string(),
            })
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        let mut methods: Vec<_> = self.adapters.keys().copied().collect();
        methods.sort_by_key(|m| m.as_str());
        methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SECRET: &str = "provider-webhook-secret";

    #[test]
    fn test_webhook_signature() {
        let body = br#"{"transaction_id":"t1","status":"succeeded"}"#;
        let signature = sign_webhook(SECRET, body).unwrap();

        assert!(verify_webhook_signature(SECRET, body, &signature));
        assert!(!verify_webhook_signature(SECRET, b"tampered", &signature));
        assert!(!verify_webhook_signature("other-secret-value", body, &signature));
        assert!(!verify_webhook_signature("", body, &signature));
    }

    #[test]
    fn test_webhook_event_format() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"transaction_id":"t9","status":"failed","reason":"declined"}"#)
                .unwrap();
        assert_eq!(
            event.status,
            ProviderStatus::Failed {
                reason: "declined".to_string()
            }
        );

        let event: WebhookEvent =
            serde_json::from_str(r#"{"transaction_id":"t9","status":"succeeded"}"#).unwrap();
        assert_eq!(event.status, ProviderStatus::Succeeded);
        assert_eq!(event.reference, None);

        let event: WebhookEvent = serde_json::from_str(
            r#"{"transaction_id":"t9","reference":"PAY-9","status":"succeeded"}"#,
        )
        .unwrap();
        assert_eq!(event.reference.as_deref(), Some("PAY-9"));
    }

    #[tokio::test]
    async fn test_simulated_collection_and_payout() {
        let provider = InMemoryProvider::new(PaymentMethod::MobileMoneyA, SECRET);
        let started = provider.initiate(dec!(3_500_000), "PAY-1").await.unwrap();
        let txn = started.provider_txn_id;

        // nothing to release before the payer completes
        assert!(provider.release(&txn, dec!(1), "early").await.is_err());

        assert!(provider.complete(&txn, ProviderStatus::Succeeded));
        provider.release(&txn, dec!(3_000_000), "PAY-1:release").await.unwrap();
        assert!(provider.release(&txn, dec!(1), "PAY-1:extra").await.is_err());
        assert_eq!(provider.released(&txn), dec!(3_000_000));

        // refund after release is funded by the beneficiary
        provider.refund(&txn, dec!(3_000_000), "PAY-1:refund").await.unwrap();
        assert_eq!(provider.released(&txn), Decimal::ZERO);
        assert_eq!(provider.clawed_back(&txn), dec!(3_000_000));
        assert_eq!(provider.refunded(&txn), dec!(3_000_000));

        assert!(provider.refund(&txn, dec!(500_001), "PAY-1:again").await.is_err());
    }

    #[tokio::test]
    async fn test_payout_idempotency_key() {
        let provider = InMemoryProvider::new(PaymentMethod::MobileMoneyA, SECRET);
        let txn = provider.initiate(dec!(1_000), "PAY-4").await.unwrap().provider_txn_id;
        provider.complete(&txn, ProviderStatus::Succeeded);

        provider.release(&txn, dec!(800), "PAY-4:release").await.unwrap();
        provider.release(&txn, dec!(800), "PAY-4:release").await.unwrap();
        assert_eq!(provider.released(&txn), dec!(800));

        let err = provider.release(&txn, dec!(100), "PAY-4:release").await.unwrap_err();
        assert_eq!(err.error_code(), "PROVIDER_UNAVAILABLE");
        assert_eq!(provider.released(&txn), dec!(800));
    }

    #[tokio::test]
    async fn test_webhook_carries_reference() {
        let provider = InMemoryProvider::new(PaymentMethod::MobileMoneyA, SECRET);
        let txn = provider.initiate(dec!(10), "PAY-5").await.unwrap().provider_txn_id;
        let (body, signature) = provider.webhook(&txn, ProviderStatus::Succeeded).unwrap();
        assert!(provider.verify_webhook(&body, &signature));
        let event = provider.parse_webhook(&body).unwrap();
        assert_eq!(event.reference.as_deref(), Some("PAY-5"));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let provider = InMemoryProvider::new(PaymentMethod::MobileMoneyB, SECRET);
        provider.fail_next_call("maintenance");

        let err = provider.initiate(dec!(10), "PAY-2").await.unwrap_err();
        assert_eq!(err.error_code(), "PROVIDER_UNAVAILABLE");
        assert!(provider.initiate(dec!(10), "PAY-2").await.is_ok());
    }

    #[tokio::test]
    async fn test_registry() {
        let mut registry = ProviderRegistry::with_manual_methods();
        assert!(registry.get(PaymentMethod::MobileMoneyA).is_err());

        registry.register(Arc::new(InMemoryProvider::new(PaymentMethod::MobileMoneyA, SECRET)));
        assert!(registry.get(PaymentMethod::MobileMoneyA).is_ok());
        assert_eq!(registry.methods().len(), 4);

        let cash = registry.get(PaymentMethod::Cash).unwrap();
        assert!(cash.initiate(dec!(10), "PAY-3").await.is_err());
        assert!(cash.refund("PAY-3", dec!(10), "PAY-3:refund").await.is_ok());
        assert!(!cash.verify_webhook(b"{}", "00"));
    }
}
