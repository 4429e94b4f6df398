//! Application state shared across handlers

use std::sync::Arc;

use leasehold_contracts::{ContractLifecycle, SignatureService, TerminationWorkflow};
use leasehold_db::Storage;
use leasehold_escrow::EscrowPaymentEngine;
use leasehold_fees::CommissionCalculator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<ContractLifecycle>,
    pub signatures: Arc<SignatureService>,
    pub termination: Arc<TerminationWorkflow>,
    pub escrow: Arc<EscrowPaymentEngine>,
    pub fees: Arc<CommissionCalculator>,
    /// Kept for readiness checks
    pub storage: Storage,
}
