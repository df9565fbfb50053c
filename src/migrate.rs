use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates all tables and indexes. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // `version_seq` is the per-contract counter handed out to new versions;
    // it only grows, so numbers are never reused after a deletion.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contracts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contract_number TEXT NOT NULL UNIQUE,
            contract_name TEXT NOT NULL,
            status INTEGER NOT NULL DEFAULT 0,
            category TEXT,
            department TEXT,
            creator_id TEXT NOT NULL,
            last_touched_by TEXT,
            remark TEXT,
            version_seq INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contract_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contract_id INTEGER NOT NULL,
            version_number INTEGER NOT NULL,
            content_hash TEXT NOT NULL UNIQUE,
            storage_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            media_type TEXT,
            file_size INTEGER NOT NULL,
            creator_id TEXT NOT NULL,
            remark TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(contract_id, version_number),
            FOREIGN KEY (contract_id) REFERENCES contracts(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contract_contents (
            contract_id INTEGER NOT NULL,
            version_id INTEGER NOT NULL,
            content TEXT,
            plain_text TEXT NOT NULL DEFAULT '',
            html TEXT NOT NULL DEFAULT '',
            middle_json TEXT,
            model_output TEXT,
            content_list TEXT,
            knowledge_graph TEXT,
            creator_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (contract_id, version_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_versions_contract ON contract_versions(contract_id, version_number DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_contracts_status ON contracts(status)")
        .execute(pool)
        .await?;

    Ok(())
}
