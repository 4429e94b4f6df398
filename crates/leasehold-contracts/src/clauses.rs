//! Boilerplate clause generation

use rust_decimal::Decimal;

use leasehold_types::{LeaseDuration, TermsInput, TransactionType, SETTLEMENT_CURRENCY};

/// Standard clauses derived from the terms. Frozen once the contract locks.
pub fn generate_clauses(terms: &TermsInput, deposit: Decimal, advance: Decimal) -> Vec<String> {
    let mut clauses = Vec::with_capacity(6);

    let subject = match terms.transaction_type {
        TransactionType::Rental => "residential premises",
        TransactionType::Commercial => "commercial premises",
        TransactionType::Sale => "property",
    };
    clauses.push(format!(
        "The landlord makes the {} available to the tenant from {}.",
        subject,
        terms.start_date.format("%Y-%m-%d")
    ));

    clauses.push(match terms.duration {
        LeaseDuration::Months(months) => format!("The agreement runs for {} months.", months),
        LeaseDuration::Indefinite => {
            "The agreement runs for an indefinite term and ends only through notice.".to_string()
        }
    });

    clauses.push(format!(
        "Monthly rent is {} {}, payable in advance.",
        terms.monthly_rent, SETTLEMENT_CURRENCY
    ));

    if deposit > Decimal::ZERO {
        clauses.push(format!(
            "A security deposit of {} {} is held in escrow and returned at the end of the agreement, less any amount owed.",
            deposit, SETTLEMENT_CURRENCY
        ));
    }
    clauses.push(format!(
        "A rent advance of {} {} is due on signature.",
        advance, SETTLEMENT_CURRENCY
    ));

    clauses.push(
        "Either party may end the agreement by giving written notice; the notice period runs from the request date."
            .to_string(),
    );

    if let Some(conditions) = terms
        .special_conditions
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        clauses.push(format!("Special conditions: {}", conditions));
    }

    clauses
}
