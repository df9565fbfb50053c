//! Clients for the two external services the review pipeline drives.
//!
//! Both sit behind traits so the pipeline can be exercised without a
//! network: [`DocumentExtractor`] (stage 1, structured extraction) and
//! [`GraphBuilder`] (stage 2, knowledge-graph construction).

pub mod extraction;
pub mod graph;

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::models::ExtractionArtifacts;

pub use extraction::HttpExtractor;
pub use graph::HttpGraphBuilder;

/// One file handed to the extraction service.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    /// Local copy of the version's file.
    pub file: &'a Path,
    /// Original file name; its stem keys the service response.
    pub file_name: &'a str,
    /// Output-directory hint forwarded to the service.
    pub output_dir: &'a str,
}

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, request: ExtractionRequest<'_>) -> Result<ExtractionArtifacts>;
}

#[async_trait]
pub trait GraphBuilder: Send + Sync {
    /// Returns the graph document as JSON text, stored verbatim.
    async fn build(&self, contract_text: &str, contract_id: i64) -> Result<String>;
}
