//! Leasehold Escrow Payments
//!
//! Collects the money a contract makes due and holds it until the landlord
//! validates it.
//!
//! - [`EscrowPaymentEngine`]: initiation, provider confirmation (webhook or
//!   polling), landlord validation, refund, cash settlement
//! - [`ProviderAdapter`]: one implementation per payment method, looked up in
//!   a [`ProviderRegistry`]
//! - [`ReceiptIssuer`]: signed receipts for released and cash payments
//!
//! Commission is never refunded: a refund returns at most rent plus deposit.

pub mod config;
pub mod engine;
pub mod provider;
pub mod receipt;

pub use config::EscrowConfig;
pub use engine::{
    refundable_amount, CashSettlement, EscrowParts, EscrowPaymentEngine, IngestOutcome,
    PaymentRequest,
};
pub use provider::{
    sign_webhook, verify_webhook_signature, InMemoryProvider, ManualSettlementAdapter,
    ProviderAdapter, ProviderInitiation, ProviderRegistry, ProviderStatus, WebhookEvent,
};
pub use receipt::{PaymentReceipt, ReceiptBody, ReceiptIssuer};
