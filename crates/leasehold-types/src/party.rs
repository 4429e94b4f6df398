//! Parties and actors
//!
//! A contract has exactly two signing parties. Per-party fields live in a
//! [`PerParty`] so code indexes them by [`Party`] instead of branching on
//! "is this the landlord or the tenant".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::UserId;

/// One of the two signing parties of a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Landlord,
    Tenant,
}

impl Party {
    /// Both parties, landlord first
    pub const ALL: [Party; 2] = [Party::Landlord, Party::Tenant];

    /// The other party
    pub fn counterparty(self) -> Party {
        match self {
            Party::Landlord => Party::Tenant,
            Party::Tenant => Party::Landlord,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Party::Landlord => "landlord",
            Party::Tenant => "tenant",
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value held once per party
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerParty<T> {
    pub landlord: T,
    pub tenant: T,
}

impl<T> PerParty<T> {
    pub fn get(&self, party: Party) -> &T {
        match party {
            Party::Landlord => &self.landlord,
            Party::Tenant => &self.tenant,
        }
    }

    pub fn get_mut(&mut self, party: Party) -> &mut T {
        match party {
            Party::Landlord => &mut self.landlord,
            Party::Tenant => &mut self.tenant,
        }
    }
}

/// Role of the calling user, as asserted by the identity collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

/// The caller of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterparty_is_an_involution() {
        for party in Party::ALL {
            assert_ne!(party.counterparty(), party);
            assert_eq!(party.counterparty().counterparty(), party);
        }
    }

    #[test]
    fn test_per_party_indexing() {
        let mut values = PerParty {
            landlord: 1,
            tenant: 2,
        };
        *values.get_mut(Party::Tenant) += 10;
        assert_eq!(*values.get(Party::Landlord), 1);
        assert_eq!(*values.get(Party::Tenant), 12);
    }
}
