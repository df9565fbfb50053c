//! HTTP client for the document extraction service.
//!
//! The service takes a multipart upload and answers with
//!
//! ```json
//! { "results": { "<file stem>": { "md_content": "...", "middle_json": ..., "model_output": ..., "content_list": ... } } }
//! ```

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use super::{DocumentExtractor, ExtractionRequest};
use crate::config::ExtractionConfig;
use crate::error::{ContractError, Result};
use crate::models::ExtractionArtifacts;

pub struct HttpExtractor {
    client: reqwest::Client,
    config: ExtractionConfig,
}

impl HttpExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn form(&self, bytes: Vec<u8>, file_name: &str, output_dir: &str) -> Form {
        let flag = |b: bool| if b { "true" } else { "false" };
        Form::new()
            .part("files", Part::bytes(bytes).file_name(file_name.to_string()))
            .text("output_dir", output_dir.to_string())
            .text("backend", self.config.backend.clone())
            .text("return_middle_json", "true")
            .text("return_model_output", "true")
            .text("return_content_list", "true")
            .text("formula_enable", flag(self.config.formula_enable))
            .text("table_enable", flag(self.config.table_enable))
            .text("return_images", flag(self.config.return_images))
    }
}

#[async_trait]
impl DocumentExtractor for HttpExtractor {
    async fn extract(&self, request: ExtractionRequest<'_>) -> Result<ExtractionArtifacts> {
        let bytes = tokio::fs::read(request.file).await?;
        let size = bytes.len();
        let form = self.form(bytes, request.file_name, request.output_dir);

        tracing::info!(
            endpoint = %self.config.endpoint,
            file = %request.file_name,
            bytes = size,
            "calling extraction service"
        );
        let response = self
            .client
            .post(&self.config.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ContractError::transport(format!(
                "extraction service returned {}: {}",
                status,
                truncate(&body, 512)
            )));
        }
        let body: Value = response.json().await?;
        parse_extraction_response(&body, &file_stem(request.file_name))
    }
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
        .to_string()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Picks the result entry for `stem` (falling back to the first entry) and
/// lifts its fields into [`ExtractionArtifacts`].
///
/// A missing `md_content` yields empty markdown rather than an error.
/// Structured fields are kept as JSON text; string values are taken as-is.
pub fn parse_extraction_response(body: &Value, stem: &str) -> Result<ExtractionArtifacts> {
    let results = body
        .get("results")
        .and_then(Value::as_object)
        .ok_or_else(|| ContractError::transport("extraction response has no results map"))?;

    let entry = results
        .get(stem)
        .or_else(|| results.values().next())
        .ok_or_else(|| ContractError::transport("extraction response results map is empty"))?;

    if !results.contains_key(stem) {
        tracing::warn!(stem = %stem, "extraction result not keyed by file stem; using first entry");
    }

    Ok(ExtractionArtifacts {
        markdown: entry
            .get("md_content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        middle_json: json_text(entry.get("middle_json")),
        model_output: json_text(entry.get("model_output")),
        content_list: json_text(entry.get("content_list")),
    })
}

fn json_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
