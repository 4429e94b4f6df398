//! Fee quote DTOs

use rust_decimal::Decimal;
use serde::Deserialize;

use leasehold_types::TransactionType;

#[derive(Debug, Clone, Deserialize)]
pub struct FeeQuery {
    pub transaction_type: TransactionType,
    pub rent: Decimal,
    /// Historical rate table; current when absent
    #[serde(default)]
    pub rate_version: Option<u32>,
}
