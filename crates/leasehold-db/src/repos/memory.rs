//! In-memory repositories for tests and single-node development

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use leasehold_types::{Contract, ContractId, ContractStatus, Payment, PaymentId, PaymentMethod, UserId};

use super::{ContractRepository, PaymentRepository};
use crate::error::{DbError, DbResult};

#[derive(Default)]
pub struct InMemoryContractRepo {
    contracts: DashMap<ContractId, Contract>,
}

impl InMemoryContractRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContractRepository for InMemoryContractRepo {
    async fn insert(&self, contract: &Contract) -> DbResult<()> {
        match self.contracts.entry(contract.id.clone()) {
            Entry::Occupied(_) => Err(DbError::Duplicate(format!("contract {}", contract.id))),
            Entry::Vacant(slot) => {
                slot.insert(contract.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: &ContractId) -> DbResult<Option<Contract>> {
        Ok(self.contracts.get(id).map(|c| c.clone()))
    }

    async fn update(&self, mut contract: Contract) -> DbResult<Contract> {
        let mut stored = self
            .contracts
            .get_mut(&contract.id)
            .ok_or_else(|| DbError::NotFound(format!("contract {}", contract.id)))?;

        if stored.version != contract.version {
            return Err(DbError::VersionConflict {
                entity: "contract",
                id: contract.id.to_string(),
            });
        }

        contract.version += 1;
        *stored = contract.clone();
        Ok(contract)
    }

    async fn delete(&self, id: &ContractId) -> DbResult<bool> {
        Ok(self.contracts.remove(id).is_some())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> DbResult<Option<Contract>> {
        Ok(self
            .contracts
            .iter()
            .find(|c| {
                c.signing_token
                    .as_ref()
                    .map_or(false, |t| t.token_hash == token_hash)
            })
            .map(|c| c.clone()))
    }

    async fn list_by_status(&self, status: ContractStatus) -> DbResult<Vec<Contract>> {
        let mut found: Vec<Contract> = self
            .contracts
            .iter()
            .filter(|c| c.status == status)
            .map(|c| c.clone())
            .collect();
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }

    async fn list_for_user(&self, user: &UserId) -> DbResult<Vec<Contract>> {
        let mut found: Vec<Contract> = self
            .contracts
            .iter()
            .filter(|c| c.party_of(user).is_some())
            .map(|c| c.clone())
            .collect();
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }
}

#[derive(Default)]
pub struct InMemoryPaymentRepo {
    payments: DashMap<PaymentId, Payment>,
}

impl InMemoryPaymentRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepo {
    async fn insert(&self, payment: &Payment) -> DbResult<()> {
        match self.payments.entry(payment.id.clone()) {
            Entry::Occupied(_) => Err(DbError::Duplicate(format!("payment {}", payment.id))),
            Entry::Vacant(slot) => {
                slot.insert(payment.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: &PaymentId) -> DbResult<Option<Payment>> {
        Ok(self.payments.get(id).map(|p| p.clone()))
    }

    async fn update(&self, mut payment: Payment) -> DbResult<Payment> {
        let mut stored = self
            .payments
            .get_mut(&payment.id)
            .ok_or_else(|| DbError::NotFound(format!("payment {}", payment.id)))?;

        if stored.version != payment.version {
            return Err(DbError::VersionConflict {
                entity: "payment",
                id: payment.id.to_string(),
            });
        }

        payment.version += 1;
        *stored = payment.clone();
        Ok(payment)
    }

    async fn find_by_external_ref(
        &self,
        method: PaymentMethod,
        external_ref: &str,
    ) -> DbResult<Option<Payment>> {
        Ok(self
            .payments
            .iter()
            .find(|p| p.method == method && p.external_ref.as_deref() == Some(external_ref))
            .map(|p| p.clone()))
    }

    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<Payment>> {
        Ok(self
            .payments
            .iter()
            .find(|p| p.reference == reference)
            .map(|p| p.clone()))
    }

    async fn list_by_contract(&self, contract_id: &ContractId) -> DbResult<Vec<Payment>> {
        let mut found: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| &p.contract_id == contract_id)
            .map(|p| p.clone())
            .collect();
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }
}
