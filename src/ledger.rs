//! Version ledger: immutable, content-addressed uploads per contract.
//!
//! # Creating a version
//!
//! ```text
//! bytes ──▶ type check ──▶ sha-256 ──▶ duplicate? ──▶ local text ──▶ upload ──▶ version row ──▶ content record
//!                                          │                          │            │                │
//!                                       Conflict                   Transport   delete remote   delete row + remote
//! ```
//!
//! The remote upload happens before the version row is written, so metadata
//! never points at a missing file. When a later write fails, the earlier
//! steps are compensated best-effort.
//!
//! # Deleting a contract
//!
//! For every version, in order: content record, remote file (best-effort),
//! version row. The contract row goes last. The whole cascade holds the
//! contract's run lock, so it waits for an in-flight review to finish.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempPath;
use tokio::sync::OwnedMutexGuard;

use crate::error::{ContractError, Result};
use crate::extract;
use crate::models::{ContentKey, ContentRecord, NewVersion, Version};
use crate::remote::RemoteStore;
use crate::store::{ContentStore, ContractStore};

/// Hex SHA-256 of the raw file bytes; the dedup key across the whole ledger.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Last path component of a client-supplied file name.
fn sanitize_file_name(file_name: &str) -> Result<String> {
    let name = file_name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(ContractError::invalid_input("file name is empty"));
    }
    Ok(name.to_string())
}

/// A file handed to the ledger.
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub bytes: &'a [u8],
    pub file_name: &'a str,
    pub remark: Option<&'a str>,
    pub creator_id: &'a str,
}

/// Per-contract run locks. Entries nobody holds are pruned on each acquire.
#[derive(Default)]
pub struct RunLocks {
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl RunLocks {
    pub async fn acquire(&self, contract_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(contract_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of contracts with a run in progress or waiting.
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|l| Arc::strong_count(l) > 1)
            .count()
    }
}

#[derive(Clone)]
pub struct VersionLedger {
    contracts: Arc<dyn ContractStore>,
    contents: Arc<dyn ContentStore>,
    remote: Arc<dyn RemoteStore>,
    upload_dir: String,
    scratch_dir: Option<PathBuf>,
    locks: Arc<RunLocks>,
}

impl VersionLedger {
    pub fn new(
        contracts: Arc<dyn ContractStore>,
        contents: Arc<dyn ContentStore>,
        remote: Arc<dyn RemoteStore>,
        upload_dir: impl Into<String>,
    ) -> Self {
        Self {
            contracts,
            contents,
            remote,
            upload_dir: upload_dir.into(),
            scratch_dir: None,
            locks: Arc::new(RunLocks::default()),
        }
    }

    /// Directory for scratch downloads; the system temp dir when unset.
    pub fn with_scratch_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_dir = dir;
        self
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// Per-contract locks shared by every clone of this ledger.
    pub fn locks(&self) -> &RunLocks {
        &self.locks
    }

    /// Appends a version to `contract_id`.
    ///
    /// Fails with `InvalidInput` for anything but `.pdf`/`.docx`, `NotFound`
    /// for an unknown contract, `Conflict` when identical bytes already exist
    /// under any contract, and `Transport` when the upload fails. None of
    /// these leave rows or remote files behind.
    pub async fn create_version(&self, contract_id: i64, upload: Upload<'_>) -> Result<Version> {
        let file_name = sanitize_file_name(upload.file_name)?;
        let media_type = extract::media_type_for(&file_name).ok_or_else(|| {
            ContractError::invalid_input(format!(
                "unsupported file type: {} (only .pdf and .docx are accepted)",
                file_name
            ))
        })?;

        if self.contracts.get_contract(contract_id).await?.is_none() {
            return Err(ContractError::not_found(format!("contract {}", contract_id)));
        }

        let hash = content_hash(upload.bytes);
        if let Some(existing) = self.contracts.find_version_by_hash(&hash).await? {
            return Err(ContractError::conflict_with(
                "file content already uploaded",
                serde_json::json!({
                    "contract_id": existing.contract_id,
                    "version_id": existing.id,
                    "version_number": existing.version_number,
                }),
            ));
        }

        let plain_text = local_text(upload.bytes, media_type, &file_name).await;
        let html = extract::to_html(&plain_text);

        let stored_name = format!("{}_{}", uuid::Uuid::new_v4(), file_name);
        let storage_path = self
            .remote
            .upload(upload.bytes, &self.upload_dir, &stored_name)
            .await?;

        let new = NewVersion {
            content_hash: hash,
            storage_path: storage_path.clone(),
            file_name: file_name.clone(),
            media_type: Some(media_type.to_string()),
            file_size: upload.bytes.len() as i64,
            creator_id: upload.creator_id.to_string(),
            remark: upload.remark.map(str::to_string),
        };
        let version = match self.contracts.insert_version(contract_id, &new).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(contract_id, path = %storage_path, error = %e, "version insert failed; removing upload");
                self.remote.delete(&storage_path).await;
                return Err(e);
            }
        };

        let record = ContentRecord::new(
            ContentKey::new(contract_id, version.id),
            plain_text,
            html,
            upload.creator_id,
        );
        if let Err(e) = self.contents.put(&record).await {
            tracing::warn!(contract_id, version = version.version_number, error = %e, "content insert failed; rolling back version");
            if let Err(rollback) = self.contracts.delete_version(version.id).await {
                tracing::error!(version_id = version.id, error = %rollback, "failed to remove version row");
            }
            self.remote.delete(&storage_path).await;
            return Err(e);
        }

        tracing::info!(
            contract_id,
            version = version.version_number,
            file = %file_name,
            bytes = version.file_size,
            "version created"
        );
        Ok(version)
    }

    /// Highest-numbered version.
    pub async fn latest(&self, contract_id: i64) -> Result<Version> {
        self.contracts
            .latest_version(contract_id)
            .await?
            .ok_or_else(|| ContractError::not_found(format!("contract {} has no versions", contract_id)))
    }

    pub async fn by_number(&self, contract_id: i64, number: i64) -> Result<Version> {
        self.contracts
            .version_by_number(contract_id, number)
            .await?
            .ok_or_else(|| {
                ContractError::not_found(format!("version {} of contract {}", number, contract_id))
            })
    }

    /// `by_number` when a number is given, else `latest`.
    pub async fn resolve(&self, contract_id: i64, number: Option<i64>) -> Result<Version> {
        match number {
            Some(n) => self.by_number(contract_id, n).await,
            None => self.latest(contract_id).await,
        }
    }

    /// All versions of an existing contract, ascending.
    pub async fn list(&self, contract_id: i64) -> Result<Vec<Version>> {
        if self.contracts.get_contract(contract_id).await?.is_none() {
            return Err(ContractError::not_found(format!("contract {}", contract_id)));
        }
        self.contracts.list_versions(contract_id).await
    }

    /// Cascade delete. Returns the number of versions removed.
    pub async fn delete_contract(&self, contract_id: i64) -> Result<usize> {
        let _guard = self.locks.acquire(contract_id).await;
        if self.contracts.get_contract(contract_id).await?.is_none() {
            return Err(ContractError::not_found(format!("contract {}", contract_id)));
        }
        let versions = self.contracts.list_versions(contract_id).await?;
        for version in &versions {
            self.contents
                .delete(ContentKey::new(contract_id, version.id))
                .await?;
            self.remote.delete(&version.storage_path).await;
            self.contracts.delete_version(version.id).await?;
            tracing::debug!(contract_id, version = version.version_number, "version deleted");
        }
        self.contracts.delete_contract(contract_id).await?;
        tracing::info!(contract_id, versions = versions.len(), "contract deleted");
        Ok(versions.len())
    }

    /// Downloads a version's file into a scratch file removed on drop.
    pub async fn download_scratch(&self, version: &Version) -> Result<TempPath> {
        let suffix = Path::new(&version.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let mut builder = tempfile::Builder::new();
        builder.prefix("crv-").suffix(&suffix);
        let file = match &self.scratch_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };
        let path = file.into_temp_path();
        self.remote.download(&version.storage_path, &path).await?;
        Ok(path)
    }

    /// Original bytes of a version, fetched through the remote store.
    pub async fn read_file(&self, version: &Version) -> Result<Vec<u8>> {
        let scratch = self.download_scratch(version).await?;
        Ok(tokio::fs::read(&scratch).await?)
    }
}

/// Plain text for the eager text fields. Extraction failure yields `""`.
async fn local_text(bytes: &[u8], media_type: &'static str, file_name: &str) -> String {
    let owned = bytes.to_vec();
    let result =
        tokio::task::spawn_blocking(move || extract::extract_text(&owned, media_type)).await;
    match result {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            tracing::warn!(file = %file_name, error = %e, "local text extraction failed");
            String::new()
        }
        Err(e) => {
            tracing::warn!(file = %file_name, error = %e, "local text extraction panicked");
            String::new()
        }
    }
}
