//! API Handlers
//!
//! Request handlers for all API endpoints.
//! Each module handles a specific domain.

pub mod contracts;
pub mod fees;
pub mod health;
pub mod payments;
pub mod signing;
pub mod webhooks;

pub use health::*;

use leasehold_types::{ContractId, PaymentId};

use crate::error::{ApiError, ApiResult};

/// Accepts `contract_<uuid>` or a bare UUID
pub(crate) fn contract_id(raw: &str) -> ApiResult<ContractId> {
    ContractId::parse(raw).map_err(|_| ApiError::InvalidParameter(format!("contract id {}", raw)))
}

/// Accepts `pay_<uuid>` or a bare UUID
pub(crate) fn payment_id(raw: &str) -> ApiResult<PaymentId> {
    PaymentId::parse(raw).map_err(|_| ApiError::InvalidParameter(format!("payment id {}", raw)))
}
