//! In-memory [`ContractStore`] and [`ContentStore`].
//!
//! Same semantics as the SQLite backend, including the per-contract version
//! counter and the global content-hash uniqueness rule. Useful for tests and
//! for embedding without a database file.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{ContentStore, ContractStore};
use crate::error::{ContractError, Result};
use crate::models::{
    Contract, ContentKey, ContentRecord, ContractStatus, NewContract, NewVersion, Version,
};

#[derive(Default)]
struct Tables {
    contracts: HashMap<i64, Contract>,
    version_seq: HashMap<i64, i64>,
    versions: HashMap<i64, Version>,
    contents: HashMap<ContentKey, ContentRecord>,
    next_contract_id: i64,
    next_version_id: i64,
}

/// Lock-protected maps standing in for the three tables.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl ContractStore for InMemoryStore {
    async fn insert_contract(&self, new: &NewContract) -> Result<Contract> {
        let mut t = self.write();
        if t.contracts
            .values()
            .any(|c| c.contract_number == new.contract_number)
        {
            return Err(ContractError::conflict(format!(
                "contract number already exists: {}",
                new.contract_number
            )));
        }
        t.next_contract_id += 1;
        let ts = now();
        let contract = Contract {
            id: t.next_contract_id,
            contract_number: new.contract_number.clone(),
            contract_name: new.contract_name.clone(),
            status: new.status,
            category: new.category.clone(),
            department: new.department.clone(),
            creator_id: new.creator_id.clone(),
            last_touched_by: None,
            remark: new.remark.clone(),
            created_at: ts,
            updated_at: ts,
        };
        t.contracts.insert(contract.id, contract.clone());
        t.version_seq.insert(contract.id, 0);
        Ok(contract)
    }

    async fn get_contract(&self, id: i64) -> Result<Option<Contract>> {
        Ok(self.read().contracts.get(&id).cloned())
    }

    async fn find_contract_by_number(&self, number: &str) -> Result<Option<Contract>> {
        Ok(self
            .read()
            .contracts
            .values()
            .find(|c| c.contract_number == number)
            .cloned())
    }

    async fn list_contracts(&self, limit: i64, offset: i64) -> Result<Vec<Contract>> {
        let t = self.read();
        let mut all: Vec<Contract> = t.contracts.values().cloned().collect();
        all.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_status(&self, id: i64, status: ContractStatus) -> Result<()> {
        let mut t = self.write();
        let contract = t
            .contracts
            .get_mut(&id)
            .ok_or_else(|| ContractError::not_found(format!("contract {}", id)))?;
        contract.status = status;
        contract.updated_at = now();
        Ok(())
    }

    async fn touch_contract(&self, id: i64, touched_by: &str) -> Result<()> {
        let mut t = self.write();
        let contract = t
            .contracts
            .get_mut(&id)
            .ok_or_else(|| ContractError::not_found(format!("contract {}", id)))?;
        contract.last_touched_by = Some(touched_by.to_string());
        contract.updated_at = now();
        Ok(())
    }

    async fn delete_contract(&self, id: i64) -> Result<()> {
        let mut t = self.write();
        t.contracts.remove(&id);
        t.version_seq.remove(&id);
        Ok(())
    }

    async fn find_version_by_hash(&self, hash: &str) -> Result<Option<Version>> {
        Ok(self
            .read()
            .versions
            .values()
            .find(|v| v.content_hash == hash)
            .cloned())
    }

    async fn insert_version(&self, contract_id: i64, new: &NewVersion) -> Result<Version> {
        let mut t = self.write();
        if !t.contracts.contains_key(&contract_id) {
            return Err(ContractError::not_found(format!("contract {}", contract_id)));
        }
        if t.versions
            .values()
            .any(|v| v.content_hash == new.content_hash)
        {
            return Err(ContractError::conflict(format!(
                "file content duplicates an existing version ({})",
                new.content_hash
            )));
        }

        let seq = t.version_seq.entry(contract_id).or_insert(0);
        *seq += 1;
        let version_number = *seq;
        t.next_version_id += 1;

        let version = Version {
            id: t.next_version_id,
            contract_id,
            version_number,
            content_hash: new.content_hash.clone(),
            storage_path: new.storage_path.clone(),
            file_name: new.file_name.clone(),
            media_type: new.media_type.clone(),
            file_size: new.file_size,
            creator_id: new.creator_id.clone(),
            remark: new.remark.clone(),
            created_at: now(),
        };
        t.versions.insert(version.id, version.clone());
        Ok(version)
    }

    async fn list_versions(&self, contract_id: i64) -> Result<Vec<Version>> {
        let t = self.read();
        let mut versions: Vec<Version> = t
            .versions
            .values()
            .filter(|v| v.contract_id == contract_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    async fn latest_version(&self, contract_id: i64) -> Result<Option<Version>> {
        Ok(self
            .read()
            .versions
            .values()
            .filter(|v| v.contract_id == contract_id)
            .max_by_key(|v| v.version_number)
            .cloned())
    }

    async fn version_by_number(&self, contract_id: i64, number: i64) -> Result<Option<Version>> {
        Ok(self
            .read()
            .versions
            .values()
            .find(|v| v.contract_id == contract_id && v.version_number == number)
            .cloned())
    }

    async fn set_version_remark(&self, version_id: i64, remark: &str) -> Result<()> {
        let mut t = self.write();
        let version = t
            .versions
            .get_mut(&version_id)
            .ok_or_else(|| ContractError::not_found(format!("version {}", version_id)))?;
        version.remark = Some(remark.to_string());
        Ok(())
    }

    async fn delete_version(&self, version_id: i64) -> Result<()> {
        self.write().versions.remove(&version_id);
        Ok(())
    }
}

#[async_trait]
impl ContentStore for InMemoryStore {
    async fn get(&self, key: ContentKey) -> Result<Option<ContentRecord>> {
        Ok(self.read().contents.get(&key).cloned())
    }

    async fn put(&self, record: &ContentRecord) -> Result<()> {
        self.write().contents.insert(record.key(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: ContentKey) -> Result<()> {
        self.write().contents.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(number: &str) -> NewContract {
        NewContract {
            contract_number: number.into(),
            contract_name: "Lease".into(),
            status: ContractStatus::Draft,
            category: None,
            department: None,
            creator_id: "bob".into(),
            remark: None,
        }
    }

    fn version(hash: &str) -> NewVersion {
        NewVersion {
            content_hash: hash.into(),
            storage_path: format!("/u/{}", hash),
            file_name: "lease.docx".into(),
            media_type: None,
            file_size: 1,
            creator_id: "bob".into(),
            remark: None,
        }
    }

    #[tokio::test]
    async fn counter_survives_deleted_versions() {
        let store = InMemoryStore::new();
        let c = store.insert_contract(&contract("L-1")).await.unwrap();
        let v1 = store.insert_version(c.id, &version("a")).await.unwrap();
        store.delete_version(v1.id).await.unwrap();
        let v2 = store.insert_version(c.id, &version("b")).await.unwrap();
        assert_eq!(v2.version_number, 2);
    }

    #[tokio::test]
    async fn hash_is_unique_across_contracts() {
        let store = InMemoryStore::new();
        let a = store.insert_contract(&contract("L-2")).await.unwrap();
        let b = store.insert_contract(&contract("L-3")).await.unwrap();
        store.insert_version(a.id, &version("x")).await.unwrap();
        let err = store.insert_version(b.id, &version("x")).await.unwrap_err();
        assert_eq!(err.code(), 409);
        assert!(store.list_versions(b.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_contracts_pages_newest_first() {
        let store = InMemoryStore::new();
        for n in 0..5 {
            store.insert_contract(&contract(&format!("P-{}", n))).await.unwrap();
        }
        let page = store.list_contracts(2, 1).await.unwrap();
        let numbers: Vec<_> = page.iter().map(|c| c.contract_number.as_str()).collect();
        assert_eq!(numbers, vec!["P-3", "P-2"]);
    }
}
