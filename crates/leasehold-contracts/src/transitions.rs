//! Transition tables
//!
//! Signature progress is a lookup keyed by (current status, signing party,
//! whether the counter-party already signed). Anything not in the table is
//! rejected.

use leasehold_types::{Contract, ContractStatus, LeaseholdError, Party, Result};

use ContractStatus::*;

/// (current, signer, counter-party signed) -> next
pub const SIGNATURE_TRANSITIONS: &[(ContractStatus, Party, bool, ContractStatus)] = &[
    (PendingTenantSignature, Party::Tenant, false, PendingLandlordSignature),
    (PendingTenantSignature, Party::Tenant, true, Active),
    (PendingTenantSignature, Party::Landlord, false, PendingTenantSignature),
    (PendingLandlordSignature, Party::Landlord, true, Active),
];

/// Status after `party` signs, if signing is allowed at all
pub fn after_signature(
    current: ContractStatus,
    party: Party,
    counterparty_signed: bool,
) -> Option<ContractStatus> {
    SIGNATURE_TRANSITIONS
        .iter()
        .find(|(from, signer, other, _)| {
            *from == current && *signer == party && *other == counterparty_signed
        })
        .map(|(_, _, _, next)| *next)
}

/// Whether `party` may still sign from `current`
pub fn can_sign(current: ContractStatus, party: Party) -> bool {
    SIGNATURE_TRANSITIONS
        .iter()
        .any(|(from, signer, _, _)| *from == current && *signer == party)
}

/// Statuses from which each non-signature action is allowed
pub fn allowed_from(action: &str) -> &'static [ContractStatus] {
    match action {
        "assign tenant" => &[Draft],
        "amend" => &[Draft, PendingTenantSignature],
        "cancel" => &[Draft, PendingTenantSignature, PendingLandlordSignature],
        "request termination" => &[Active],
        "confirm termination" => &[InNoticePeriod],
        "retract" => &[Active],
        "escalate" => &[Active, InNoticePeriod],
        "seal" => &[Active, InNoticePeriod, Disputed],
        _ => &[],
    }
}

/// Fail with a state conflict unless `contract` is in a status allowing `action`
pub fn ensure_allowed(contract: &Contract, action: &str) -> Result<()> {
    if allowed_from(action).contains(&contract.status) {
        Ok(())
    } else {
        Err(LeaseholdError::invalid_transition(
            "contract",
            contract.status.as_str(),
            action,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_first_then_landlord() {
        let after_tenant = after_signature(PendingTenantSignature, Party::Tenant, false);
        assert_eq!(after_tenant, Some(PendingLandlordSignature));
        let after_landlord = after_signature(PendingLandlordSignature, Party::Landlord, true);
        assert_eq!(after_landlord, Some(Active));
    }

    #[test]
    fn test_landlord_first_then_tenant() {
        let after_landlord = after_signature(PendingTenantSignature, Party::Landlord, false);
        assert_eq!(after_landlord, Some(PendingTenantSignature));
        let after_tenant = after_signature(PendingTenantSignature, Party::Tenant, true);
        assert_eq!(after_tenant, Some(Active));
    }

    #[test]
    fn test_active_only_reached_with_counterparty_signed() {
        for (_, _, other_signed, next) in SIGNATURE_TRANSITIONS {
            if *next == Active {
                assert!(*other_signed);
            }
        }
    }

    #[test]
    fn test_no_signing_outside_pending_states() {
        for status in ContractStatus::ALL {
            if status.is_pending_signature() {
                continue;
            }
            for party in Party::ALL {
                assert!(!can_sign(status, party), "{} / {}", status, party);
                assert_eq!(after_signature(status, party, true), None);
                assert_eq!(after_signature(status, party, false), None);
            }
        }
        // the tenant already signed in PENDING_LANDLORD_SIGNATURE
        assert!(!can_sign(PendingLandlordSignature, Party::Tenant));
    }

    #[test]
    fn test_terminal_states_allow_nothing() {
        for action in [
            "assign tenant",
            "amend",
            "cancel",
            "request termination",
            "confirm termination",
            "retract",
            "escalate",
            "seal",
        ] {
            assert!(!allowed_from(action).contains(&Terminated));
            assert!(!allowed_from(action).contains(&Cancelled));
        }
    }
}
