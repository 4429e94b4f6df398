//! Leasehold Commission Calculator
//!
//! Computes the money due when a contract starts: deposit, rent advance and
//! the platform commission, from the contract's transaction type and monthly
//! rent.
//!
//! # Default rate table (version 1)
//!
//! | Type       | Commission      | Deposit  | Advance |
//! |------------|-----------------|----------|---------|
//! | Rental     | 50% of one rent | 2 months | 1 month |
//! | Commercial | 100% of one rent| 3 months | 1 month |
//! | Sale       | 5% of one rent  | none     | 1 month |
//!
//! Rate tables are append-only. Publishing new rates creates a new version;
//! older versions stay queryable so a historical breakdown can be displayed
//! with the rates active when it was produced.
//!
//! All amounts are rounded with bankers' rounding (see
//! [`leasehold_types::round_amount`]).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use leasehold_types::{
    round_amount, FeeBreakdown, LeaseholdError, LineItem, LineItemKind, TransactionType,
    MAX_MONTHLY_RENT,
};

/// Commission calculation errors
#[derive(Debug, Error)]
pub enum FeeError {
    #[error("Rent must be greater than zero, got {0}")]
    NonPositiveRent(Decimal),

    #[error("Invalid commission rule: {0}")]
    InvalidRule(String),

    #[error("No rule for transaction type {0}")]
    MissingRule(TransactionType),

    #[error("Unknown rate table version {0}")]
    UnknownVersion(u32),

    #[error("Rent {0} is outside the supported range")]
    AmountOutOfRange(Decimal),
}

pub type FeeResult<T> = Result<T, FeeError>;

impl From<FeeError> for LeaseholdError {
    fn from(err: FeeError) -> Self {
        match err {
            FeeError::NonPositiveRent(_) | FeeError::AmountOutOfRange(_) => {
                LeaseholdError::invalid_input("monthly_rent", err.to_string())
            }
            FeeError::InvalidRule(_) => LeaseholdError::invalid_input("rules", err.to_string()),
            FeeError::MissingRule(_) | FeeError::UnknownVersion(_) => {
                LeaseholdError::invariant(err.to_string())
            }
        }
    }
}

/// Commission rule for one transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRule {
    /// Fraction of one month's rent kept by the platform (0.50 = half a month)
    pub commission_rate: Decimal,
    /// Deposit expressed in months of rent
    pub deposit_months: u32,
    /// Advance expressed in months of rent
    pub advance_months: u32,
}

impl CommissionRule {
    fn validate(&self) -> FeeResult<()> {
        if self.commission_rate < Decimal::ZERO {
            return Err(FeeError::InvalidRule(format!(
                "negative commission rate {}",
                self.commission_rate
            )));
        }
        if self.commission_rate > dec!(12) {
            return Err(FeeError::InvalidRule(format!(
                "commission rate {} exceeds a year of rent",
                self.commission_rate
            )));
        }
        Ok(())
    }
}

/// One immutable version of the rate table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateTable {
    pub version: u32,
    pub effective_from: DateTime<Utc>,
    pub rules: HashMap<TransactionType, CommissionRule>,
}

impl RateTable {
    /// The platform's launch rates
    pub fn standard(effective_from: DateTime<Utc>) -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            TransactionType::Rental,
            CommissionRule {
                commission_rate: dec!(0.50),
                deposit_months: 2,
                advance_months: 1,
            },
        );
        rules.insert(
            TransactionType::Commercial,
            CommissionRule {
                commission_rate: dec!(1.00),
                deposit_months: 3,
                advance_months: 1,
            },
        );
        rules.insert(
            TransactionType::Sale,
            CommissionRule {
                commission_rate: dec!(0.05),
                deposit_months: 0,
                advance_months: 1,
            },
        );
        Self {
            version: 1,
            effective_from,
            rules,
        }
    }

    pub fn rule(&self, transaction_type: TransactionType) -> FeeResult<&CommissionRule> {
        self.rules
            .get(&transaction_type)
            .ok_or(FeeError::MissingRule(transaction_type))
    }
}

/// Versioned commission calculator
pub struct CommissionCalculator {
    /// Every published table, oldest first; index = version - 1
    history: RwLock<Vec<RateTable>>,
}

impl CommissionCalculator {
    /// Create a calculator seeded with the standard table
    pub fn new() -> Self {
        Self::with_table(RateTable::standard(Utc::now()))
    }

    /// Create a calculator seeded with a custom first table
    pub fn with_table(mut table: RateTable) -> Self {
        table.version = 1;
        Self {
            history: RwLock::new(vec![table]),
        }
    }

    /// Version currently applied to new breakdowns
    pub fn current_version(&self) -> u32 {
        self.history.read().len() as u32
    }

    /// Get a specific table version
    pub fn rate_table(&self, version: u32) -> Option<RateTable> {
        let index = version.checked_sub(1)? as usize;
        self.history.read().get(index).cloned()
    }

    /// Publish new rules as the next version. Existing versions are untouched.
    pub fn publish(
        &self,
        rules: HashMap<TransactionType, CommissionRule>,
        effective_from: DateTime<Utc>,
    ) -> FeeResult<u32> {
        for rule in rules.values() {
            rule.validate()?;
        }

        let mut history = self.history.write();
        let version = history.len() as u32 + 1;
        history.push(RateTable {
            version,
            effective_from,
            rules,
        });

        info!(version, "Published commission rate table");
        Ok(version)
    }

    /// Breakdown with the current rate table
    pub fn compute_breakdown(
        &self,
        transaction_type: TransactionType,
        monthly_rent: Decimal,
    ) -> FeeResult<FeeBreakdown> {
        let version = self.current_version();
        self.breakdown_for_version(transaction_type, monthly_rent, version)
    }

    /// Breakdown with a historical rate table
    pub fn breakdown_for_version(
        &self,
        transaction_type: TransactionType,
        monthly_rent: Decimal,
        version: u32,
    ) -> FeeResult<FeeBreakdown> {
        if monthly_rent <= Decimal::ZERO {
            return Err(FeeError::NonPositiveRent(monthly_rent));
        }
        if monthly_rent > MAX_MONTHLY_RENT {
            return Err(FeeError::AmountOutOfRange(monthly_rent));
        }

        let table = self
            .rate_table(version)
            .ok_or(FeeError::UnknownVersion(version))?;
        let rule = table.rule(transaction_type)?;

        let out_of_range = || FeeError::AmountOutOfRange(monthly_rent);
        let deposit_amount = round_amount(
            monthly_rent
                .checked_mul(Decimal::from(rule.deposit_months))
                .ok_or_else(out_of_range)?,
        );
        let advance_amount = round_amount(
            monthly_rent
                .checked_mul(Decimal::from(rule.advance_months))
                .ok_or_else(out_of_range)?,
        );
        let commission_amount = round_amount(
            monthly_rent
                .checked_mul(rule.commission_rate)
                .ok_or_else(out_of_range)?,
        );
        let total_amount = deposit_amount
            .checked_add(advance_amount)
            .and_then(|sum| sum.checked_add(commission_amount))
            .ok_or_else(out_of_range)?;

        let mut line_items = Vec::with_capacity(3);
        if deposit_amount > Decimal::ZERO {
            line_items.push(LineItem {
                kind: LineItemKind::Deposit,
                label: format!("Security deposit ({} months)", rule.deposit_months),
                amount: deposit_amount,
            });
        }
        line_items.push(LineItem {
            kind: LineItemKind::Advance,
            label: format!("Rent advance ({} months)", rule.advance_months),
            amount: advance_amount,
        });
        line_items.push(LineItem {
            kind: LineItemKind::Commission,
            label: "Platform commission".to_string(),
            amount: commission_amount,
        });

        Ok(FeeBreakdown {
            monthly_rent,
            deposit_amount,
            advance_amount,
            commission_amount,
            total_amount,
            line_items,
            rate_version: version,
        })
    }
}

impl Default for CommissionCalculator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rental_scenario() {
        let calculator = CommissionCalculator::new();
        let breakdown = calculator
            .compute_breakdown(TransactionType::Rental, dec!(1_000_000))
            .unwrap();

        assert_eq!(breakdown.deposit_amount, dec!(2_000_000));
        assert_eq!(breakdown.advance_amount, dec!(1_000_000));
        assert_eq!(breakdown.commission_amount, dec!(500_000));
        assert_eq!(breakdown.total_amount, dec!(3_500_000));
        assert_eq!(breakdown.rate_version, 1);
        assert!(breakdown.is_balanced());
    }

    #[test]
    fn test_transaction_types_differ() {
        let calculator = CommissionCalculator::new();
        let commercial = calculator
            .compute_breakdown(TransactionType::Commercial, dec!(400_000))
            .unwrap();
        assert_eq!(commercial.deposit_amount, dec!(1_200_000));
        assert_eq!(commercial.commission_amount, dec!(400_000));

        let sale = calculator
            .compute_breakdown(TransactionType::Sale, dec!(400_000))
            .unwrap();
        assert_eq!(sale.deposit_amount, Decimal::ZERO);
        assert_eq!(sale.commission_amount, dec!(20_000));
        // no deposit line when there is no deposit
        assert_eq!(sale.line_items.len(), 2);
        assert!(sale.is_balanced());
    }

    #[test]
    fn test_rejects_zero_and_negative_rent() {
        let calculator = CommissionCalculator::new();
        assert!(matches!(
            calculator.compute_breakdown(TransactionType::Rental, Decimal::ZERO),
            Err(FeeError::NonPositiveRent(_))
        ));
        assert!(matches!(
            calculator.compute_breakdown(TransactionType::Rental, dec!(-5)),
            Err(FeeError::NonPositiveRent(_))
        ));
    }

    #[test]
    fn test_bankers_rounding_on_commission() {
        let calculator = CommissionCalculator::new();
        // 1001 * 0.5 = 500.5 -> 500 (even)
        let a = calculator
            .compute_breakdown(TransactionType::Rental, dec!(1001))
            .unwrap();
        assert_eq!(a.commission_amount, dec!(500));
        // 1003 * 0.5 = 501.5 -> 502 (even)
        let b = calculator
            .compute_breakdown(TransactionType::Rental, dec!(1003))
            .unwrap();
        assert_eq!(b.commission_amount, dec!(502));
    }

    #[test]
    fn test_historical_versions_survive_publish() {
        let calculator = CommissionCalculator::new();
        let mut rules = calculator.rate_table(1).unwrap().rules;
        rules.insert(
            TransactionType::Rental,
            CommissionRule {
                commission_rate: dec!(0.40),
                deposit_months: 2,
                advance_months: 1,
            },
        );
        let v2 = calculator.publish(rules, Utc::now()).unwrap();
        assert_eq!(v2, 2);
        assert_eq!(calculator.current_version(), 2);

        let current = calculator
            .compute_breakdown(TransactionType::Rental, dec!(1_000_000))
            .unwrap();
        assert_eq!(current.commission_amount, dec!(400_000));

        let historical = calculator
            .breakdown_for_version(TransactionType::Rental, dec!(1_000_000), 1)
            .unwrap();
        assert_eq!(historical.commission_amount, dec!(500_000));
        assert_eq!(historical.rate_version, 1);
    }

    #[test]
    fn test_unknown_version_and_invalid_rule() {
        let calculator = CommissionCalculator::new();
        assert!(matches!(
            calculator.breakdown_for_version(TransactionType::Rental, dec!(10), 7),
            Err(FeeError::UnknownVersion(7))
        ));
        assert!(calculator.rate_table(0).is_none());

        let mut rules = HashMap::new();
        rules.insert(
            TransactionType::Rental,
            CommissionRule {
                commission_rate: dec!(-0.1),
                deposit_months: 1,
                advance_months: 1,
            },
        );
        assert!(matches!(
            calculator.publish(rules, Utc::now()),
            Err(FeeError::InvalidRule(_))
        ));
        assert_eq!(calculator.current_version(), 1);
    }

    #[test]
    fn test_fee_error_maps_to_validation() {
        let err: LeaseholdError = FeeError::NonPositiveRent(Decimal::ZERO).into();
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_huge_rent_is_rejected_not_overflowed() {
        let calculator = CommissionCalculator::new();
        let err = calculator
            .compute_breakdown(TransactionType::Commercial, Decimal::MAX)
            .unwrap_err();
        assert!(matches!(err, FeeError::AmountOutOfRange(_)));
        assert_eq!(LeaseholdError::from(err).error_code(), "INVALID_INPUT");

        let ceiling = calculator
            .compute_breakdown(TransactionType::Commercial, MAX_MONTHLY_RENT)
            .unwrap();
        assert_eq!(ceiling.total_amount, MAX_MONTHLY_RENT * dec!(5));
    }
}
