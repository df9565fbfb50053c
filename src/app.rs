//! Wiring: builds the stores, remote backend, service clients, and pipeline
//! from a [`Config`].

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::contracts::ContractService;
use crate::db;
use crate::ledger::VersionLedger;
use crate::migrate;
use crate::pipeline::ReviewPipeline;
use crate::progress::ProgressRegistry;
use crate::remote::{self, RemoteStore};
use crate::services::{DocumentExtractor, GraphBuilder, HttpExtractor, HttpGraphBuilder};
use crate::store::sqlite::SqliteStore;
use crate::store::{ContentStore, ContractStore};

/// Everything the HTTP server and the CLI commands operate on.
#[derive(Clone)]
pub struct App {
    pub contracts: ContractService,
    pub pipeline: Arc<ReviewPipeline>,
    pub progress: Arc<ProgressRegistry>,
    pub max_upload_bytes: usize,
}

/// Pluggable parts of an [`App`].
pub struct Components {
    pub contracts: Arc<dyn ContractStore>,
    pub contents: Arc<dyn ContentStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub graph: Arc<dyn GraphBuilder>,
}

impl App {
    /// Production wiring: SQLite (migrated on open), configured remote
    /// backend, HTTP service clients.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool)
            .await
            .context("Failed to apply database schema")?;
        let store = Arc::new(SqliteStore::new(pool));

        let remote = remote::from_config(&config.remote).context("Failed to set up remote store")?;
        let extractor = Arc::new(
            HttpExtractor::new(&config.extraction).context("Failed to build extraction client")?,
        );
        let graph =
            Arc::new(HttpGraphBuilder::new(&config.graph).context("Failed to build graph client")?);

        tracing::debug!(
            db = %config.db.path.display(),
            remote = remote.backend(),
            "application wired"
        );

        Ok(Self::assemble(
            config,
            Components {
                contracts: store.clone(),
                contents: store,
                remote,
                extractor,
                graph,
            },
        ))
    }

    pub fn assemble(config: &Config, parts: Components) -> Self {
        let ledger = VersionLedger::new(
            parts.contracts.clone(),
            parts.contents.clone(),
            parts.remote,
            config.remote.upload_dir.clone(),
        )
        .with_scratch_dir(config.pipeline.scratch_dir.clone());

        let pipeline = ReviewPipeline::new(
            parts.contracts.clone(),
            parts.contents.clone(),
            ledger.clone(),
            parts.extractor,
            parts.graph,
            config.extraction.output_root.clone(),
        );

        Self {
            contracts: ContractService::new(parts.contracts, parts.contents, ledger),
            pipeline: Arc::new(pipeline),
            progress: Arc::new(ProgressRegistry::new()),
            max_upload_bytes: config.server.max_upload_bytes,
        }
    }
}
