//! Payment DTOs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use leasehold_escrow::{IngestOutcome, PaymentReceipt};
use leasehold_types::Payment;

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatePaymentRequest {
    pub approve: bool,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
    /// Defaults to the full refundable amount (rent plus deposit)
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashSettlementResponse {
    pub payment: Payment,
    pub receipt: PaymentReceipt,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub outcome: IngestOutcome,
}
