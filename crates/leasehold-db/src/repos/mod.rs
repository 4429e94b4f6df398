//! Repository traits
//!
//! Every write goes through `update`, which compares the stored version with
//! the version the caller loaded. A mismatch means someone else committed in
//! between and surfaces as [`DbError::VersionConflict`](crate::DbError).

mod memory;
mod redis_store;

pub use self::memory::{InMemoryContractRepo, InMemoryPaymentRepo};
pub use self::redis_store::{RedisContractRepo, RedisPaymentRepo};

use async_trait::async_trait;

use leasehold_types::{Contract, ContractId, ContractStatus, Payment, PaymentId, PaymentMethod, UserId};

use crate::error::DbResult;

#[async_trait]
pub trait ContractRepository: Send + Sync {
    /// Store a new contract. Fails with `Duplicate` if the id exists.
    async fn insert(&self, contract: &Contract) -> DbResult<()>;

    async fn get(&self, id: &ContractId) -> DbResult<Option<Contract>>;

    /// Compare-and-swap on `contract.version`; returns the stored record with
    /// its version bumped.
    async fn update(&self, contract: Contract) -> DbResult<Contract>;

    /// Remove a contract and its indexes. Returns whether it existed.
    async fn delete(&self, id: &ContractId) -> DbResult<bool>;

    /// Contract whose current signing token hashes to `token_hash`
    async fn find_by_token_hash(&self, token_hash: &str) -> DbResult<Option<Contract>>;

    async fn list_by_status(&self, status: ContractStatus) -> DbResult<Vec<Contract>>;

    /// Contracts where the user is landlord or tenant
    async fn list_for_user(&self, user: &UserId) -> DbResult<Vec<Contract>>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, payment: &Payment) -> DbResult<()>;

    async fn get(&self, id: &PaymentId) -> DbResult<Option<Payment>>;

    /// Compare-and-swap on `payment.version`
    async fn update(&self, payment: Payment) -> DbResult<Payment>;

    /// Lookup by the provider-assigned transaction id
    async fn find_by_external_ref(
        &self,
        method: PaymentMethod,
        external_ref: &str,
    ) -> DbResult<Option<Payment>>;

    /// Lookup by the platform reference handed to the provider
    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<Payment>>;

    /// All payments of a contract, oldest first
    async fn list_by_contract(&self, contract_id: &ContractId) -> DbResult<Vec<Payment>>;
}
