//! SQLite-backed [`ContractStore`] and [`ContentStore`].

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{ContentStore, ContractStore};
use crate::error::{ContractError, Result};
use crate::models::{
    Contract, ContentKey, ContentRecord, ContractStatus, NewContract, NewVersion, Version,
};

const CONTRACT_COLUMNS: &str = "id, contract_number, contract_name, status, category, department, \
     creator_id, last_touched_by, remark, created_at, updated_at";

const VERSION_COLUMNS: &str = "id, contract_id, version_number, content_hash, storage_path, \
     file_name, media_type, file_size, creator_id, remark, created_at";

const CONTENT_COLUMNS: &str = "contract_id, version_id, content, plain_text, html, middle_json, \
     model_output, content_list, knowledge_graph, creator_id, created_at, updated_at";

/// Store over a `sqlx` SQLite pool. Cloning shares the pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn contract_from_row(row: &SqliteRow) -> Result<Contract> {
    let code: i64 = row.get("status");
    let status = ContractStatus::from_code(code).ok_or_else(|| {
        ContractError::invalid_input(format!("unknown contract status in database: {}", code))
    })?;
    Ok(Contract {
        id: row.get("id"),
        contract_number: row.get("contract_number"),
        contract_name: row.get("contract_name"),
        status,
        category: row.get("category"),
        department: row.get("department"),
        creator_id: row.get("creator_id"),
        last_touched_by: row.get("last_touched_by"),
        remark: row.get("remark"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn version_from_row(row: &SqliteRow) -> Version {
    Version {
        id: row.get("id"),
        contract_id: row.get("contract_id"),
        version_number: row.get("version_number"),
        content_hash: row.get("content_hash"),
        storage_path: row.get("storage_path"),
        file_name: row.get("file_name"),
        media_type: row.get("media_type"),
        file_size: row.get("file_size"),
        creator_id: row.get("creator_id"),
        remark: row.get("remark"),
        created_at: row.get("created_at"),
    }
}

fn content_from_row(row: &SqliteRow) -> ContentRecord {
    ContentRecord {
        contract_id: row.get("contract_id"),
        version_id: row.get("version_id"),
        content: row.get("content"),
        plain_text: row.get("plain_text"),
        html: row.get("html"),
        middle_json: row.get("middle_json"),
        model_output: row.get("model_output"),
        content_list: row.get("content_list"),
        knowledge_graph: row.get("knowledge_graph"),
        creator_id: row.get("creator_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl ContractStore for SqliteStore {
    async fn insert_contract(&self, new: &NewContract) -> Result<Contract> {
        let ts = now();
        let result = sqlx::query(
            r#"
            INSERT INTO contracts (contract_number, contract_name, status, category, department,
                                   creator_id, remark, version_seq, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&new.contract_number)
        .bind(&new.contract_name)
        .bind(new.status.code())
        .bind(&new.category)
        .bind(&new.department)
        .bind(&new.creator_id)
        .bind(&new.remark)
        .bind(ts)
        .bind(ts)
        .fetch_one(&self.pool)
        .await;

        let row = match result {
            Ok(row) => row,
            Err(e) if ContractError::is_unique_violation(&e) => {
                return Err(ContractError::conflict(format!(
                    "contract number already exists: {}",
                    new.contract_number
                )))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Contract {
            id: row.get("id"),
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
        })
    }

    async fn get_contract(&self, id: i64) -> Result<Option<Contract>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM contracts WHERE id = ?",
            CONTRACT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(contract_from_row).transpose()
    }

    async fn find_contract_by_number(&self, number: &str) -> Result<Option<Contract>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM contracts WHERE contract_number = ?",
            CONTRACT_COLUMNS
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(contract_from_row).transpose()
    }

    async fn list_contracts(&self, limit: i64, offset: i64) -> Result<Vec<Contract>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM contracts ORDER BY id DESC LIMIT ? OFFSET ?",
            CONTRACT_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(contract_from_row).collect()
    }

    async fn update_status(&self, id: i64, status: ContractStatus) -> Result<()> {
        let done = sqlx::query("UPDATE contracts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.code())
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(ContractError::not_found(format!("contract {}", id)));
        }
        Ok(())
    }

    async fn touch_contract(&self, id: i64, touched_by: &str) -> Result<()> {
        let done =
            sqlx::query("UPDATE contracts SET last_touched_by = ?, updated_at = ? WHERE id = ?")
                .bind(touched_by)
                .bind(now())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if done.rows_affected() == 0 {
            return Err(ContractError::not_found(format!("contract {}", id)));
        }
        Ok(())
    }

    async fn delete_contract(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM contracts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_version_by_hash(&self, hash: &str) -> Result<Option<Version>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM contract_versions WHERE content_hash = ?",
            VERSION_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(version_from_row))
    }

    async fn insert_version(&self, contract_id: i64, new: &NewVersion) -> Result<Version> {
        let ts = now();
        let mut tx = self.pool.begin().await?;

        let next: Option<i64> = sqlx::query_scalar(
            "UPDATE contracts SET version_seq = version_seq + 1, updated_at = ? WHERE id = ? RETURNING version_seq",
        )
        .bind(ts)
        .bind(contract_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(version_number) = next else {
            return Err(ContractError::not_found(format!("contract {}", contract_id)));
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO contract_versions (contract_id, version_number, content_hash, storage_path,
                                           file_name, media_type, file_size, creator_id, remark, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(contract_id)
        .bind(version_number)
        .bind(&new.content_hash)
        .bind(&new.storage_path)
        .bind(&new.file_name)
        .bind(&new.media_type)
        .bind(new.file_size)
        .bind(&new.creator_id)
        .bind(&new.remark)
        .bind(ts)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            // Dropping `tx` rolls back the counter bump as well.
            Err(e) if ContractError::is_unique_violation(&e) => {
                return Err(ContractError::conflict(format!(
                    "file content duplicates an existing version ({})",
                    new.content_hash
                )))
            }
            Err(e) => return Err(e.into()),
        };
        tx.commit().await?;

        Ok(Version {
            id: row.get("id"),
            contract_id,
            version_number,
            content_hash: new.content_hash.clone(),
            storage_path: new.storage_path.clone(),
            file_name: new.file_name.clone(),
            media_type: new.media_type.clone(),
            file_size: new.file_size,
            creator_id: new.creator_id.clone(),
            remark: new.remark.clone(),
            created_at: ts,
        })
    }

    async fn list_versions(&self, contract_id: i64) -> Result<Vec<Version>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM contract_versions WHERE contract_id = ? ORDER BY version_number ASC",
            VERSION_COLUMNS
        ))
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(version_from_row).collect())
    }

    async fn latest_version(&self, contract_id: i64) -> Result<Option<Version>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM contract_versions WHERE contract_id = ? ORDER BY version_number DESC LIMIT 1",
            VERSION_COLUMNS
        ))
        .bind(contract_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(version_from_row))
    }

    async fn version_by_number(&self, contract_id: i64, number: i64) -> Result<Option<Version>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM contract_versions WHERE contract_id = ? AND version_number = ?",
            VERSION_COLUMNS
        ))
        .bind(contract_id)
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(version_from_row))
    }

    async fn set_version_remark(&self, version_id: i64, remark: &str) -> Result<()> {
        let done = sqlx::query("UPDATE contract_versions SET remark = ? WHERE id = ?")
            .bind(remark)
            .bind(version_id)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(ContractError::not_found(format!("version {}", version_id)));
        }
        Ok(())
    }

    async fn delete_version(&self, version_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM contract_versions WHERE id = ?")
            .bind(version_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn get(&self, key: ContentKey) -> Result<Option<ContentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM contract_contents WHERE contract_id = ? AND version_id = ?",
            CONTENT_COLUMNS
        ))
        .bind(key.contract_id)
        .bind(key.version_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(content_from_row))
    }

    async fn put(&self, record: &ContentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contract_contents (contract_id, version_id, content, plain_text, html,
                                           middle_json, model_output, content_list, knowledge_graph,
                                           creator_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(contract_id, version_id) DO UPDATE SET
                content = excluded.content,
                plain_text = excluded.plain_text,
                html = excluded.html,
                middle_json = excluded.middle_json,
                model_output = excluded.model_output,
                content_list = excluded.content_list,
                knowledge_graph = excluded.knowledge_graph,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.contract_id)
        .bind(record.version_id)
        .bind(&record.content)
        .bind(&record.plain_text)
        .bind(&record.html)
        .bind(&record.middle_json)
        .bind(&record.model_output)
        .bind(&record.content_list)
        .bind(&record.knowledge_graph)
        .bind(&record.creator_id)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: ContentKey) -> Result<()> {
        sqlx::query("DELETE FROM contract_contents WHERE contract_id = ? AND version_id = ?")
            .bind(key.contract_id)
            .bind(key.version_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
