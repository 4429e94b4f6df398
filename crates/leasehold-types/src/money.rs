//! Money helpers
//!
//! Amounts are `rust_decimal::Decimal` in the settlement currency's whole
//! units (the currency has no minor unit). Every computed amount goes through
//! [`round_amount`], which applies bankers' rounding: a value exactly halfway
//! between two units rounds to the even neighbour.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// ISO code of the settlement currency
pub const SETTLEMENT_CURRENCY: &str = "XOF";

/// Largest monthly rent accepted anywhere in the platform (one trillion units)
pub const MAX_MONTHLY_RENT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Round an amount to whole units with bankers' rounding.
pub fn round_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
}

/// Kind of a line in a fee breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    Deposit,
    Advance,
    Commission,
}

/// One line of a fee breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub kind: LineItemKind,
    pub label: String,
    pub amount: Decimal,
}

/// Result of a commission computation, frozen onto a contract at lock time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Monthly rent the breakdown was computed from
    pub monthly_rent: Decimal,
    pub deposit_amount: Decimal,
    pub advance_amount: Decimal,
    pub commission_amount: Decimal,
    pub total_amount: Decimal,
    pub line_items: Vec<LineItem>,
    /// Version of the rate table that produced this breakdown
    pub rate_version: u32,
}

impl FeeBreakdown {
    /// Whether the total equals the sum of its parts
    pub fn is_balanced(&self) -> bool {
        self.deposit_amount + self.advance_amount + self.commission_amount == self.total_amount
            && self.line_items.iter().map(|l| l.amount).sum::<Decimal>() == self.total_amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_bankers_rounding() {
        assert_eq!(round_amount(dec!(500.5)), dec!(500));
        assert_eq!(round_amount(dec!(501.5)), dec!(502));
        assert_eq!(round_amount(dec!(500.51)), dec!(501));
        assert_eq!(round_amount(dec!(499.49)), dec!(499));
    }
}
