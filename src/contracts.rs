//! Contract-level operations layered over the stores and the version ledger.
//!
//! Authentication is out of scope: callers pass the already-resolved user id
//! (or `None`), and operations that need a creator decide what a missing
//! user means.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ContractError, Result};
use crate::extract;
use crate::ledger::{Upload, VersionLedger};
use crate::models::{ContentKey, ContentRecord, Contract, ContractStatus, NewContract, Version};
use crate::store::{ContentStore, ContractStore};

/// Creator recorded for uploads without an authenticated user.
pub const SYSTEM_USER: &str = "system_auto";
pub const INITIAL_VERSION_REMARK: &str = "initial version";

const MAX_PAGE_SIZE: i64 = 100;

/// A file as received from a client.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateContract {
    pub contract_number: String,
    pub contract_name: String,
    pub category: Option<String>,
    pub department: Option<String>,
    pub remark: Option<String>,
    pub file: Option<FileUpload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractWithVersion {
    pub contract: Contract,
    pub version: Option<Version>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub file_name: String,
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub created: Vec<ContractWithVersion>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub size: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Txt,
    Html,
    Raw,
}

impl std::str::FromStr for ExportFormat {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(ExportFormat::Txt),
            "html" => Ok(ExportFormat::Html),
            "raw" | "md" | "markdown" => Ok(ExportFormat::Raw),
            other => Err(ContractError::invalid_input(format!(
                "unknown export format: {} (expected txt, html or raw)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Export {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub base: Version,
    pub target: Version,
    pub base_text: String,
    pub target_text: String,
    /// Always `"unavailable"`; no diff engine is wired in yet.
    pub diff: &'static str,
}

#[derive(Clone)]
pub struct ContractService {
    contracts: Arc<dyn ContractStore>,
    contents: Arc<dyn ContentStore>,
    ledger: VersionLedger,
}

fn require_user(user: Option<&str>) -> Result<&str> {
    match user.map(str::trim) {
        Some(u) if !u.is_empty() => Ok(u),
        _ => Err(ContractError::unauthenticated("a user id is required")),
    }
}

fn draft_number() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "DRAFT-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..6]
    )
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
        .to_string()
}

impl ContractService {
    pub fn new(
        contracts: Arc<dyn ContractStore>,
        contents: Arc<dyn ContentStore>,
        ledger: VersionLedger,
    ) -> Self {
        Self {
            contracts,
            contents,
            ledger,
        }
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    pub async fn create_contract(
        &self,
        request: CreateContract,
        user: Option<&str>,
    ) -> Result<ContractWithVersion> {
        let user = require_user(user)?;
        let number = request.contract_number.trim();
        if number.is_empty() {
            return Err(ContractError::invalid_input("contract_number is required"));
        }
        if request.contract_name.trim().is_empty() {
            return Err(ContractError::invalid_input("contract_name is required"));
        }
        if let Some(file) = &request.file {
            if extract::media_type_for(&file.file_name).is_none() {
                return Err(ContractError::invalid_input(format!(
                    "unsupported file type: {}",
                    file.file_name
                )));
            }
        }
        if self
            .contracts
            .find_contract_by_number(number)
            .await?
            .is_some()
        {
            return Err(ContractError::conflict(format!(
                "contract number already exists: {}",
                number
            )));
        }

        let contract = self
            .contracts
            .insert_contract(&NewContract {
                contract_number: number.to_string(),
                contract_name: request.contract_name.trim().to_string(),
                status: ContractStatus::Draft,
                category: request.category,
                department: request.department,
                creator_id: user.to_string(),
                remark: request.remark,
            })
            .await?;
        tracing::info!(contract_id = contract.id, number = %contract.contract_number, "contract created");

        let Some(file) = &request.file else {
            return Ok(ContractWithVersion {
                contract,
                version: None,
            });
        };
        let upload = Upload {
            bytes: &file.bytes,
            file_name: &file.file_name,
            remark: Some(INITIAL_VERSION_REMARK),
            creator_id: user,
        };
        match self.ledger.create_version(contract.id, upload).await {
            Ok(version) => Ok(ContractWithVersion {
                contract,
                version: Some(version),
            }),
            Err(e) => {
                self.discard(contract.id).await;
                Err(e)
            }
        }
    }

    /// Creates a draft contract around a single file.
    pub async fn upload_contract(
        &self,
        file: &FileUpload,
        category: Option<&str>,
        department: Option<&str>,
        user: Option<&str>,
    ) -> Result<ContractWithVersion> {
        if extract::media_type_for(&file.file_name).is_none() {
            return Err(ContractError::invalid_input(format!(
                "unsupported file type: {} (only .pdf and .docx are accepted)",
                file.file_name
            )));
        }
        let creator = user
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(SYSTEM_USER);

        let contract = self
            .contracts
            .insert_contract(&NewContract {
                contract_number: draft_number(),
                contract_name: file_stem(&file.file_name),
                status: ContractStatus::Draft,
                category: category.map(str::to_string),
                department: department.map(str::to_string),
                creator_id: creator.to_string(),
                remark: None,
            })
            .await?;

        let upload = Upload {
            bytes: &file.bytes,
            file_name: &file.file_name,
            remark: Some(INITIAL_VERSION_REMARK),
            creator_id: creator,
        };
        match self.ledger.create_version(contract.id, upload).await {
            Ok(version) => {
                tracing::info!(contract_id = contract.id, number = %contract.contract_number, "draft contract uploaded");
                Ok(ContractWithVersion {
                    contract,
                    version: Some(version),
                })
            }
            Err(e) => {
                self.discard(contract.id).await;
                Err(e)
            }
        }
    }

    /// Removes a contract row whose first version could not be created.
    async fn discard(&self, contract_id: i64) {
        if let Err(e) = self.contracts.delete_contract(contract_id).await {
            tracing::error!(contract_id, error = %e, "failed to remove contract without versions");
        }
    }

    /// Uploads each file independently. Fails only when every file fails.
    pub async fn batch_upload(
        &self,
        files: &[FileUpload],
        category: Option<&str>,
        department: Option<&str>,
        user: Option<&str>,
    ) -> Result<BatchOutcome> {
        if files.is_empty() {
            return Err(ContractError::invalid_input("no files uploaded"));
        }
        let mut created = Vec::new();
        let mut failed = Vec::new();
        for file in files {
            match self.upload_contract(file, category, department, user).await {
                Ok(c) => created.push(c),
                Err(e) => {
                    tracing::warn!(file = %file.file_name, error = %e, "batch upload item failed");
                    failed.push(BatchFailure {
                        file_name: file.file_name.clone(),
                        code: e.code(),
                        message: e.to_string(),
                    });
                }
            }
        }
        if created.is_empty() {
            let summary: Vec<String> = failed
                .iter()
                .map(|f| format!("{}: {}", f.file_name, f.message))
                .collect();
            return Err(ContractError::invalid_input(format!(
                "all uploads failed: {}",
                summary.join("; ")
            )));
        }
        Ok(BatchOutcome { created, failed })
    }

    /// Adds a version to an existing contract.
    pub async fn add_version(
        &self,
        contract_id: i64,
        file: &FileUpload,
        remark: Option<&str>,
        user: Option<&str>,
    ) -> Result<Version> {
        let user = require_user(user)?;
        self.ledger
            .create_version(
                contract_id,
                Upload {
                    bytes: &file.bytes,
                    file_name: &file.file_name,
                    remark,
                    creator_id: user,
                },
            )
            .await
    }

    pub async fn get_contract(&self, id: i64) -> Result<Contract> {
        self.contracts
            .get_contract(id)
            .await?
            .ok_or_else(|| ContractError::not_found(format!("contract {}", id)))
    }

    pub async fn get_by_number(&self, number: &str) -> Result<Contract> {
        self.contracts
            .find_contract_by_number(number)
            .await?
            .ok_or_else(|| ContractError::not_found(format!("contract number {}", number)))
    }

    /// One-based pages, newest first.
    pub async fn list_contracts(&self, page: i64, size: i64) -> Result<Page<Contract>> {
        let page = page.max(1);
        let size = size.clamp(1, MAX_PAGE_SIZE);
        let items = self.contracts.list_contracts(size, (page - 1) * size).await?;
        Ok(Page { items, page, size })
    }

    pub async fn update_status(&self, id: i64, status: ContractStatus) -> Result<Contract> {
        let contract = self.get_contract(id).await?;
        if !contract.status.can_transition_to(status) {
            return Err(ContractError::invalid_input(format!(
                "illegal status transition {:?} -> {:?}",
                contract.status, status
            )));
        }
        self.contracts.update_status(id, status).await?;
        self.get_contract(id).await
    }

    pub async fn delete_contract(&self, id: i64) -> Result<usize> {
        self.ledger.delete_contract(id).await
    }

    pub async fn list_versions(&self, contract_id: i64) -> Result<Vec<Version>> {
        self.ledger.list(contract_id).await
    }

    pub async fn version(&self, contract_id: i64, number: Option<i64>) -> Result<Version> {
        self.ledger.resolve(contract_id, number).await
    }

    /// Content record of a version (latest when `number` is `None`).
    pub async fn content(&self, contract_id: i64, number: Option<i64>) -> Result<ContentRecord> {
        let version = self.ledger.resolve(contract_id, number).await?;
        self.contents
            .get(ContentKey::new(contract_id, version.id))
            .await?
            .ok_or_else(|| {
                ContractError::not_found(format!(
                    "content of contract {} version {}",
                    contract_id, version.version_number
                ))
            })
    }

    pub async fn export(
        &self,
        contract_id: i64,
        number: Option<i64>,
        format: ExportFormat,
    ) -> Result<Export> {
        let contract = self.get_contract(contract_id).await?;
        let record = self.content(contract_id, number).await?;
        let version = self.ledger.resolve(contract_id, number).await?;
        let base = format!("{}_v{}", contract.contract_number, version.version_number);

        let export = match format {
            ExportFormat::Txt => Export {
                bytes: record.plain_text.into_bytes(),
                media_type: "text/plain; charset=utf-8",
                file_name: format!("{}.txt", base),
            },
            ExportFormat::Html => Export {
                bytes: format!(
                    "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title></head><body>{}</body></html>",
                    extract::to_html(&contract.contract_name),
                    record.html
                )
                .into_bytes(),
                media_type: "text/html; charset=utf-8",
                file_name: format!("{}.html", base),
            },
            ExportFormat::Raw => {
                let markdown = record.content.ok_or_else(|| {
                    ContractError::not_found(format!(
                        "no extracted markdown for contract {}; run a review first",
                        contract_id
                    ))
                })?;
                Export {
                    bytes: markdown.into_bytes(),
                    media_type: "text/markdown; charset=utf-8",
                    file_name: format!("{}.md", base),
                }
            }
        };
        Ok(export)
    }

    pub async fn compare(&self, contract_id: i64, base: i64, target: i64) -> Result<Comparison> {
        let base_version = self.ledger.by_number(contract_id, base).await?;
        let target_version = self.ledger.by_number(contract_id, target).await?;
        let base_text = self.text_of(contract_id, &base_version).await?;
        let target_text = self.text_of(contract_id, &target_version).await?;
        Ok(Comparison {
            base: base_version,
            target: target_version,
            base_text,
            target_text,
            diff: "unavailable",
        })
    }

    async fn text_of(&self, contract_id: i64, version: &Version) -> Result<String> {
        Ok(self
            .contents
            .get(ContentKey::new(contract_id, version.id))
            .await?
            .map(|r| r.plain_text)
            .unwrap_or_default())
    }

    /// Original upload of a version, fetched through the remote store.
    pub async fn fetch_file(
        &self,
        contract_id: i64,
        number: Option<i64>,
    ) -> Result<(Version, Vec<u8>)> {
        let version = self.ledger.resolve(contract_id, number).await?;
        let bytes = self.ledger.read_file(&version).await?;
        Ok((version, bytes))
    }
}
