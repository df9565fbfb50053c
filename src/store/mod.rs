//! Record-store seams for contracts, versions, and content records.
//!
//! The review pipeline and the version ledger only talk to these traits.
//! [`sqlite::SqliteStore`] is the production backend; [`memory::InMemoryStore`]
//! backs tests and embedders that do not want a database file.
//!
//! Lookups that may legitimately miss return `Option`; callers decide whether
//! a miss is a [`ContractError::NotFound`](crate::error::ContractError).

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::{ContractError, Result};
use crate::models::{
    Contract, ContentKey, ContentRecord, ContractStatus, ExtractionArtifacts, NewContract,
    NewVersion, Version,
};

/// Contract and version rows.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_contract`](ContractStore::insert_contract) | Create a contract (`Conflict` on duplicate number) |
/// | [`insert_version`](ContractStore::insert_version) | Append a version, assigning the next number atomically |
/// | [`find_version_by_hash`](ContractStore::find_version_by_hash) | Global duplicate-content lookup |
/// | [`touch_contract`](ContractStore::touch_contract) | Record which stage last mutated a contract |
#[async_trait]
pub trait ContractStore: Send + Sync {
    async fn insert_contract(&self, new: &NewContract) -> Result<Contract>;

    async fn get_contract(&self, id: i64) -> Result<Option<Contract>>;

    async fn find_contract_by_number(&self, number: &str) -> Result<Option<Contract>>;

    /// Contracts ordered by id, newest first.
    async fn list_contracts(&self, limit: i64, offset: i64) -> Result<Vec<Contract>>;

    async fn update_status(&self, id: i64, status: ContractStatus) -> Result<()>;

    async fn touch_contract(&self, id: i64, touched_by: &str) -> Result<()>;

    async fn delete_contract(&self, id: i64) -> Result<()>;

    async fn find_version_by_hash(&self, hash: &str) -> Result<Option<Version>>;

    /// Inserts a version with number `previous maximum ever assigned + 1`.
    ///
    /// The counter is persisted per contract and bumped in the same
    /// transaction as the insert, so numbers are never reused.
    async fn insert_version(&self, contract_id: i64, new: &NewVersion) -> Result<Version>;

    /// Versions of a contract in ascending number order.
    async fn list_versions(&self, contract_id: i64) -> Result<Vec<Version>>;

    async fn latest_version(&self, contract_id: i64) -> Result<Option<Version>>;

    async fn version_by_number(&self, contract_id: i64, number: i64) -> Result<Option<Version>>;

    async fn set_version_remark(&self, version_id: i64, remark: &str) -> Result<()>;

    async fn delete_version(&self, version_id: i64) -> Result<()>;
}

/// Keyed store of [`ContentRecord`]s with get/put semantics.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn get(&self, key: ContentKey) -> Result<Option<ContentRecord>>;

    /// Inserts or replaces the record under its key.
    async fn put(&self, record: &ContentRecord) -> Result<()>;

    async fn delete(&self, key: ContentKey) -> Result<()>;

    /// Overwrites the stage-1 artifact fields of an existing record.
    async fn put_extraction(&self, key: ContentKey, artifacts: &ExtractionArtifacts) -> Result<()> {
        let mut record = self.get(key).await?.ok_or_else(|| missing_record(key))?;
        record.apply_extraction(artifacts);
        self.put(&record).await
    }

    /// Stores the knowledge-graph document of an existing record.
    async fn put_knowledge_graph(&self, key: ContentKey, graph_json: &str) -> Result<()> {
        let mut record = self.get(key).await?.ok_or_else(|| missing_record(key))?;
        record.knowledge_graph = Some(graph_json.to_string());
        record.updated_at = chrono::Utc::now().timestamp();
        self.put(&record).await
    }
}

fn missing_record(key: ContentKey) -> ContractError {
    ContractError::not_found(format!(
        "content record for contract {} version {}",
        key.contract_id, key.version_id
    ))
}
