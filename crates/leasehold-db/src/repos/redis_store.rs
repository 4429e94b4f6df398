//! Redis-backed repositories
//!
//! Records are stored as JSON documents. Writes use a Lua compare-and-swap
//! on the document's `version` field; secondary indexes (status, user,
//! signing token, provider reference) are plain sets and keys maintained
//! after the write and re-checked on read.

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands, Script};
use deadpool_redis::Pool as RedisPool;
use serde::de::DeserializeOwned;
use serde::Serialize;

use leasehold_types::{Contract, ContractId, ContractStatus, Payment, PaymentId, PaymentMethod, UserId};

use super::{ContractRepository, PaymentRepository};
use crate::error::{DbError, DbResult};

/// Key layout under the deployment prefix
pub(crate) mod keys {
    use leasehold_types::{ContractId, ContractStatus, PaymentId, PaymentMethod, UserId};

    pub fn contract(prefix: &str, id: &ContractId) -> String {
        format!("{}:contract:{}", prefix, id.as_uuid())
    }

    pub fn contracts_by_status(prefix: &str, status: ContractStatus) -> String {
        format!("{}:contracts:status:{}", prefix, status.as_str())
    }

    pub fn contracts_by_user(prefix: &str, user: &UserId) -> String {
        format!("{}:contracts:user:{}", prefix, user.as_uuid())
    }

    pub fn signing_token(prefix: &str, token_hash: &str) -> String {
        format!("{}:contract:token:{}", prefix, token_hash)
    }

    pub fn payment(prefix: &str, id: &PaymentId) -> String {
        format!("{}:payment:{}", prefix, id.as_uuid())
    }

    pub fn payments_by_contract(prefix: &str, contract: &ContractId) -> String {
        format!("{}:payments:contract:{}", prefix, contract.as_uuid())
    }

    pub fn external_ref(prefix: &str, method: PaymentMethod, external_ref: &str) -> String {
        format!("{}:payment:ext:{}:{}", prefix, method.as_str(), external_ref)
    }

    pub fn payment_reference(prefix: &str, reference: &str) -> String {
        format!("{}:payment:ref:{}", prefix, reference)
    }
}

/// Returns 1 on success, 0 on version mismatch, -1 when the key is missing
const CAS_SCRIPT: &str = r#"
local current = redis.call("GET", KEYS[1])
if not current then
    return -1
end
local doc = cjson.decode(current)
if tonumber(doc["version"]) ~= tonumber(ARGV[1]) then
    return 0
end
redis.call("SET", KEYS[1], ARGV[2])
return 1
"#;

/// JSON document access shared by both repositories
#[derive(Clone)]
struct DocumentStore {
    pool: RedisPool,
}

impl DocumentStore {
    async fn insert<T: Serialize>(&self, key: &str, value: &T) -> DbResult<bool> {
        let mut conn = self.pool.get().await?;
        let json = serde_json::to_string(value)?;
        let created: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(created.is_some())
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(DbError::from)
    }

    async fn get_many<T: DeserializeOwned>(&self, keys: Vec<String>) -> DbResult<Vec<T>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
        raw.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(DbError::from))
            .collect()
    }

    async fn compare_and_swap<T: Serialize>(
        &self,
        key: &str,
        expected_version: u64,
        value: &T,
        entity: &'static str,
        id: String,
    ) -> DbResult<()> {
        let mut conn = self.pool.get().await?;
        let json = serde_json::to_string(value)?;
        let outcome: i64 = Script::new(CAS_SCRIPT)
            .key(key)
            .arg(expected_version)
            .arg(json)
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            1 => Ok(()),
            0 => Err(DbError::VersionConflict { entity, id }),
            _ => Err(DbError::NotFound(format!("{} {}", entity, id))),
        }
    }

    async fn members(&self, set_key: &str) -> DbResult<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let members: Vec<String> = conn.smembers(set_key).await?;
        Ok(members)
    }
}

// =============================================================================
// Contracts
// =============================================================================

pub struct RedisContractRepo {
    docs: DocumentStore,
    prefix: String,
}

impl RedisContractRepo {
    pub fn new(pool: RedisPool, prefix: impl Into<String>) -> Self {
        Self {
            docs: DocumentStore { pool },
            prefix: prefix.into(),
        }
    }

    async fn write_indexes(&self, contract: &Contract) -> DbResult<()> {
        let mut conn = self.docs.pool.get().await?;
        let id = contract.id.as_uuid().to_string();
        let mut pipe = redis::pipe();
        pipe.atomic();

        for status in ContractStatus::ALL {
            let key = keys::contracts_by_status(&self.prefix, status);
            if status == contract.status {
                pipe.sadd(key, &id).ignore();
            } else {
                pipe.srem(key, &id).ignore();
            }
        }
        pipe.sadd(keys::contracts_by_user(&self.prefix, &contract.landlord_id), &id)
            .ignore();
        if let Some(tenant) = &contract.tenant_id {
            pipe.sadd(keys::contracts_by_user(&self.prefix, tenant), &id)
                .ignore();
        }
        if let Some(token) = &contract.signing_token {
            pipe.set(keys::signing_token(&self.prefix, &token.token_hash), &id)
                .ignore();
        }

        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn load_set(&self, set_key: &str) -> DbResult<Vec<Contract>> {
        let members = self.docs.members(set_key).await?;
        let doc_keys: Vec<String> = members
            .iter()
            .map(|uuid| format!("{}:contract:{}", self.prefix, uuid))
            .collect();
        let mut contracts: Vec<Contract> = self.docs.get_many(doc_keys).await?;
        contracts.sort_by_key(|c| c.created_at);
        Ok(contracts)
    }
}

#[async_trait]
impl ContractRepository for RedisContractRepo {
    async fn insert(&self, contract: &Contract) -> DbResult<()> {
        let key = keys::contract(&self.prefix, &contract.id);
        if !self.docs.insert(&key, contract).await? {
            return Err(DbError::Duplicate(format!("contract {}", contract.id)));
        }
        self.write_indexes(contract).await
    }

    async fn get(&self, id: &ContractId) -> DbResult<Option<Contract>> {
        self.docs.get(&keys::contract(&self.prefix, id)).await
    }

    async fn update(&self, mut contract: Contract) -> DbResult<Contract> {
        let expected = contract.version;
        contract.version += 1;
        self.docs
            .compare_and_swap(
                &keys::contract(&self.prefix, &contract.id),
                expected,
                &contract,
                "contract",
                contract.id.to_string(),
            )
            .await?;
        self.write_indexes(&contract).await?;
        Ok(contract)
    }

    async fn delete(&self, id: &ContractId) -> DbResult<bool> {
        let Some(contract) = self.get(id).await? else {
            return Ok(false);
        };

        let mut conn = self.docs.pool.get().await?;
        let uuid = id.as_uuid().to_string();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(keys::contract(&self.prefix, id)).ignore();
        for status in ContractStatus::ALL {
            pipe.srem(keys::contracts_by_status(&self.prefix, status), &uuid)
                .ignore();
        }
        pipe.srem(keys::contracts_by_user(&self.prefix, &contract.landlord_id), &uuid)
            .ignore();
        if let Some(tenant) = &contract.tenant_id {
            pipe.srem(keys::contracts_by_user(&self.prefix, tenant), &uuid)
                .ignore();
        }
        if let Some(token) = &contract.signing_token {
            pipe.del(keys::signing_token(&self.prefix, &token.token_hash))
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(true)
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> DbResult<Option<Contract>> {
        let index_key = keys::signing_token(&self.prefix, token_hash);
        let uuid: Option<String> = {
            let mut conn = self.docs.pool.get().await?;
            conn.get(&index_key).await?
        };
        let Some(uuid) = uuid else {
            return Ok(None);
        };

        let contract: Option<Contract> = self
            .docs
            .get(&format!("{}:contract:{}", self.prefix, uuid))
            .await?;

        // The index is not cleared when a token is rotated or consumed
        let current = contract.filter(|c| {
            c.signing_token
                .as_ref()
                .map_or(false, |t| t.token_hash == token_hash)
        });
        if current.is_none() {
            let mut conn = self.docs.pool.get().await?;
            conn.del::<_, ()>(&index_key).await?;
        }
        Ok(current)
    }

    async fn list_by_status(&self, status: ContractStatus) -> DbResult<Vec<Contract>> {
        let contracts = self
            .load_set(&keys::contracts_by_status(&self.prefix, status))
            .await?;
        Ok(contracts.into_iter().filter(|c| c.status == status).collect())
    }

    async fn list_for_user(&self, user: &UserId) -> DbResult<Vec<Contract>> {
        let contracts = self
            .load_set(&keys::contracts_by_user(&self.prefix, user))
            .await?;
        Ok(contracts
            .into_iter()
            .filter(|c| c.party_of(user).is_some())
            .collect())
    }
}

// =============================================================================
// Payments
// =============================================================================

pub struct RedisPaymentRepo {
    docs: DocumentStore,
    prefix: String,
}

impl RedisPaymentRepo {
    pub fn new(pool: RedisPool, prefix: impl Into<String>) -> Self {
        Self {
            docs: DocumentStore { pool },
            prefix: prefix.into(),
        }
    }

    async fn write_indexes(&self, payment: &Payment) -> DbResult<()> {
        let mut conn = self.docs.pool.get().await?;
        let id = payment.id.as_uuid().to_string();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.sadd(
            keys::payments_by_contract(&self.prefix, &payment.contract_id),
            &id,
        )
        .ignore();
        pipe.set(keys::payment_reference(&self.prefix, &payment.reference), &id)
            .ignore();
        if let Some(external_ref) = &payment.external_ref {
            pipe.set(
                keys::external_ref(&self.prefix, payment.method, external_ref),
                &id,
            )
            .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for RedisPaymentRepo {
    async fn insert(&self, payment: &Payment) -> DbResult<()> {
        let key = keys::payment(&self.prefix, &payment.id);
        if !self.docs.insert(&key, payment).await? {
            return Err(DbError::Duplicate(format!("payment {}", payment.id)));
        }
        self.write_indexes(payment).await
    }

    async fn get(&self, id: &PaymentId) -> DbResult<Option<Payment>> {
        self.docs.get(&keys::payment(&self.prefix, id)).await
    }

    async fn update(&self, mut payment: Payment) -> DbResult<Payment> {
        let expected = payment.version;
        payment.version += 1;
        self.docs
            .compare_and_swap(
                &keys::payment(&self.prefix, &payment.id),
                expected,
                &payment,
                "payment",
                payment.id.to_string(),
            )
            .await?;
        self.write_indexes(&payment).await?;
        Ok(payment)
    }

    async fn find_by_external_ref(
        &self,
        method: PaymentMethod,
        external_ref: &str,
    ) -> DbResult<Option<Payment>> {
        let uuid: Option<String> = {
            let mut conn = self.docs.pool.get().await?;
            conn.get(keys::external_ref(&self.prefix, method, external_ref))
                .await?
        };
        let Some(uuid) = uuid else {
            return Ok(None);
        };
        let payment: Option<Payment> = self
            .docs
            .get(&format!("{}:payment:{}", self.prefix, uuid))
            .await?;
        Ok(payment.filter(|p| p.method == method && p.external_ref.as_deref() == Some(external_ref)))
    }

    async fn find_by_reference(&self, reference: &str) -> DbResult<Option<Payment>> {
        let uuid: Option<String> = {
            let mut conn = self.docs.pool.get().await?;
            conn.get(keys::payment_reference(&self.prefix, reference)).await?
        };
        let Some(uuid) = uuid else {
            return Ok(None);
        };
        let payment: Option<Payment> = self
            .docs
            .get(&format!("{}:payment:{}", self.prefix, uuid))
            .await?;
        Ok(payment.filter(|p| p.reference == reference))
    }

    async fn list_by_contract(&self, contract_id: &ContractId) -> DbResult<Vec<Payment>> {
        let members = self
            .docs
            .members(&keys::payments_by_contract(&self.prefix, contract_id))
            .await?;
        let doc_keys: Vec<String> = members
            .iter()
            .map(|uuid| format!("{}:payment:{}", self.prefix, uuid))
            .collect();
        let mut payments: Vec<Payment> = self.docs.get_many(doc_keys).await?;
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }
}
