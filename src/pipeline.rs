//! Two-stage review pipeline.
//!
//! ```text
//! START ──▶ EXTRACTING ──▶ EXTRACTED ──▶ GRAPH_BUILDING ──┬──▶ GRAPH_BUILT   ──┐
//!   │            │                                        ├──▶ GRAPH_SKIPPED ──┼──▶ DONE (REVIEW_ALL/COMPLETED)
//!   └────────────┴──▶ REVIEW_ALL/FAILED, error returned   └──▶ GRAPH_FAILED  ──┘
//! ```
//!
//! Stage 1 (extraction) failures abort the run. Stage 2 (knowledge graph)
//! failures are logged, reported as `KG_BUILD/FAILED`, and the run still
//! completes; stage-1 artifacts are never rolled back.
//!
//! Runs for the same contract are serialized by the ledger's per-contract
//! lock, which a cascade delete also takes. There is no cancellation: dropping the future between awaits abandons the run,
//! but an external call already in flight runs to its own timeout.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{ContractError, Result};
use crate::ledger::{RunLocks, VersionLedger};
use crate::models::{Contract, ContentKey, ContentRecord, ContractStatus, Version};
use crate::progress::{ProgressEvent, ProgressReporter, Stage, StageStatus};
use crate::services::{DocumentExtractor, ExtractionRequest, GraphBuilder};
use crate::store::{ContentStore, ContractStore};

pub const OCR_AGENT: &str = "ocr-agent";
pub const KG_AGENT: &str = "kg-agent";
pub const OCR_REMARK: &str = "ocr completed";
pub const KG_REMARK: &str = "knowledge graph completed";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RunState {
    Start,
    Extracting,
    Extracted,
    GraphBuilding,
    GraphBuilt,
    GraphSkipped,
    GraphFailed,
    Done,
}

/// How stage 2 ended.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum GraphOutcome {
    Built,
    Skipped,
    Failed(String),
}

/// Result of a review run that got through stage 1.
#[derive(Clone, Debug, Serialize)]
pub struct ReviewOutcome {
    pub contract_id: i64,
    pub version_id: i64,
    pub version_number: i64,
    pub markdown_chars: usize,
    pub graph: GraphOutcome,
}

pub struct ReviewPipeline {
    contracts: Arc<dyn ContractStore>,
    contents: Arc<dyn ContentStore>,
    ledger: VersionLedger,
    extractor: Arc<dyn DocumentExtractor>,
    graph: Arc<dyn GraphBuilder>,
    output_root: String,
}

/// Borrowed per-run context so helpers don't repeat the arguments.
struct Run<'a> {
    contract_id: i64,
    progress: &'a dyn ProgressReporter,
}

impl Run<'_> {
    fn emit(&self, step: Stage, status: StageStatus, data: Value) {
        tracing::debug!(
            contract_id = self.contract_id,
            stage = step.as_str(),
            status = status.as_str(),
            "progress"
        );
        self.progress
            .report(ProgressEvent::new(self.contract_id, step, status, data));
    }

    fn enter(&self, state: RunState) {
        tracing::debug!(contract_id = self.contract_id, state = ?state, "review state");
    }
}

impl ReviewPipeline {
    pub fn new(
        contracts: Arc<dyn ContractStore>,
        contents: Arc<dyn ContentStore>,
        ledger: VersionLedger,
        extractor: Arc<dyn DocumentExtractor>,
        graph: Arc<dyn GraphBuilder>,
        output_root: impl Into<String>,
    ) -> Self {
        Self {
            contracts,
            contents,
            ledger,
            extractor,
            graph,
            output_root: output_root.into(),
        }
    }

    pub fn locks(&self) -> &RunLocks {
        self.ledger.locks()
    }

    /// Reviews the latest version of `contract_id`, reporting through
    /// `progress`. Returns once both stages have finished.
    pub async fn review(
        &self,
        contract_id: i64,
        progress: &dyn ProgressReporter,
    ) -> Result<ReviewOutcome> {
        let _guard = self.ledger.locks().acquire(contract_id).await;
        let run = Run {
            contract_id,
            progress,
        };

        match self.run(&run).await {
            Ok(outcome) => {
                run.enter(RunState::Done);
                run.emit(
                    Stage::ReviewAll,
                    StageStatus::Completed,
                    serde_json::to_value(&outcome).unwrap_or(Value::Null),
                );
                tracing::info!(
                    contract_id,
                    version = outcome.version_number,
                    graph = ?outcome.graph,
                    "review completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(contract_id, error = %e, "review failed");
                run.emit(
                    Stage::ReviewAll,
                    StageStatus::Failed,
                    Value::String(e.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Runs [`review`](Self::review) on a background task.
    pub fn spawn(
        self: Arc<Self>,
        contract_id: i64,
        progress: Arc<dyn ProgressReporter>,
    ) -> tokio::task::JoinHandle<Result<ReviewOutcome>> {
        tokio::spawn(async move { self.review(contract_id, progress.as_ref()).await })
    }

    async fn run(&self, run: &Run<'_>) -> Result<ReviewOutcome> {
        let contract_id = run.contract_id;

        run.enter(RunState::Start);
        let contract = self
            .contracts
            .get_contract(contract_id)
            .await?
            .ok_or_else(|| ContractError::not_found(format!("contract {}", contract_id)))?;
        let version = self.ledger.latest(contract_id).await?;
        run.emit(
            Stage::ReviewStart,
            StageStatus::Processing,
            serde_json::json!({
                "contract_number": contract.contract_number,
                "version_number": version.version_number,
            }),
        );

        let markdown = self.extract(run, &contract, &version).await?;
        let graph = self.build_graph(run, &version, &markdown).await;

        Ok(ReviewOutcome {
            contract_id,
            version_id: version.id,
            version_number: version.version_number,
            markdown_chars: markdown.chars().count(),
            graph,
        })
    }

    /// Stage 1. Any error here fails the run.
    async fn extract(&self, run: &Run<'_>, contract: &Contract, version: &Version) -> Result<String> {
        run.enter(RunState::Extracting);
        run.emit(Stage::Ocr, StageStatus::Processing, Value::Null);

        let scratch = self.ledger.download_scratch(version).await?;
        let output_dir = format!(
            "{}/{}/{}",
            self.output_root.trim_end_matches('/'),
            contract.id,
            version.version_number
        );
        let artifacts = self
            .extractor
            .extract(ExtractionRequest {
                file: &scratch,
                file_name: &version.file_name,
                output_dir: &output_dir,
            })
            .await?;
        drop(scratch);

        // The version may have been removed while the extractor was busy.
        let current = self
            .contracts
            .version_by_number(contract.id, version.version_number)
            .await?;
        if current.map(|v| v.id) != Some(version.id) {
            return Err(ContractError::not_found(format!(
                "contract {} version {}",
                contract.id, version.version_number
            )));
        }

        let key = ContentKey::new(contract.id, version.id);
        if self.contents.get(key).await?.is_none() {
            let record = ContentRecord::new(key, String::new(), String::new(), &version.creator_id);
            self.contents.put(&record).await?;
        }
        self.contents.put_extraction(key, &artifacts).await?;

        run.enter(RunState::Extracted);
        run.emit(
            Stage::Ocr,
            StageStatus::Completed,
            Value::String(artifacts.markdown.clone()),
        );
        tracing::info!(
            contract_id = contract.id,
            version = version.version_number,
            chars = artifacts.markdown.len(),
            "extraction stored"
        );

        self.mark(contract.id, version, OCR_AGENT, OCR_REMARK).await;
        if contract.status == ContractStatus::Draft {
            if let Err(e) = self
                .contracts
                .update_status(contract.id, ContractStatus::UnderReview)
                .await
            {
                tracing::warn!(contract_id = contract.id, error = %e, "failed to advance contract status");
            }
        }

        Ok(artifacts.markdown)
    }

    /// Stage 2. Never fails the run.
    async fn build_graph(&self, run: &Run<'_>, version: &Version, text: &str) -> GraphOutcome {
        let contract_id = run.contract_id;
        run.enter(RunState::GraphBuilding);
        run.emit(Stage::KgBuild, StageStatus::Processing, Value::Null);

        if text.trim().is_empty() {
            run.enter(RunState::GraphSkipped);
            tracing::info!(contract_id, "extracted text is empty; skipping knowledge graph");
            run.emit(
                Stage::KgBuild,
                StageStatus::Skipped,
                Value::String("no extracted text".to_string()),
            );
            return GraphOutcome::Skipped;
        }

        match self.graph_stage(contract_id, version, text).await {
            Ok(graph) => {
                run.enter(RunState::GraphBuilt);
                run.emit(Stage::KgBuild, StageStatus::Completed, graph);
                self.mark(contract_id, version, KG_AGENT, KG_REMARK).await;
                GraphOutcome::Built
            }
            Err(e) => {
                run.enter(RunState::GraphFailed);
                tracing::error!(contract_id, version = version.version_number, error = %e, "knowledge graph stage failed");
                let message = e.to_string();
                run.emit(Stage::KgBuild, StageStatus::Failed, Value::String(message.clone()));
                GraphOutcome::Failed(message)
            }
        }
    }

    async fn graph_stage(&self, contract_id: i64, version: &Version, text: &str) -> Result<Value> {
        let raw = self.graph.build(text, contract_id).await?;
        let parsed: Value = serde_json::from_str(&raw).map_err(|e| {
            ContractError::transport(format!("graph document is not valid JSON: {}", e))
        })?;
        self.contents
            .put_knowledge_graph(ContentKey::new(contract_id, version.id), &raw)
            .await?;
        Ok(parsed)
    }

    /// Milestone markers. Failures are logged only.
    async fn mark(&self, contract_id: i64, version: &Version, agent: &str, remark: &str) {
        if let Err(e) = self.contracts.touch_contract(contract_id, agent).await {
            tracing::warn!(contract_id, agent, error = %e, "failed to update last-touched marker");
        }
        if let Err(e) = self.contracts.set_version_remark(version.id, remark).await {
            tracing::warn!(contract_id, version = version.version_number, error = %e, "failed to update version remark");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_outcome_serializes_with_status_tag() {
        let failed = serde_json::to_value(GraphOutcome::Failed("boom".into())).unwrap();
        assert_eq!(failed, serde_json::json!({ "status": "failed", "error": "boom" }));
        let built = serde_json::to_value(GraphOutcome::Built).unwrap();
        assert_eq!(built, serde_json::json!({ "status": "built" }));
    }
}
