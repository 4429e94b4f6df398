//! Leasehold Types - Canonical domain types for the rental contract engine
//!
//! This crate contains the foundational types shared by every leasehold crate
//! and has no dependency on any of them:
//!
//! - Identity types (ContractId, PaymentId, UserId, ...)
//! - Money helpers with a single documented rounding rule
//! - Parties, actors and per-party storage
//! - The `Contract` and `Payment` entities with their status machines
//! - The canonical error taxonomy
//!
//! # Invariants carried by these types
//!
//! 1. `ContractStatus::Active` implies both signature records are present
//! 2. A locked contract never changes its terms
//! 3. `Payment::total_amount == rent + deposit + commission`
//! 4. Commission is never part of a refund

pub mod identity;
pub mod money;
pub mod party;
pub mod contract;
pub mod payment;
pub mod error;

pub use identity::*;
pub use money::*;
pub use party::*;
pub use contract::*;
pub use payment::*;
pub use error::*;

/// Version of the leasehold types schema
pub const TYPES_VERSION: &str = "0.1.0";
