//! HTTP client for the knowledge-graph service.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::GraphBuilder;
use crate::config::GraphConfig;
use crate::error::{ContractError, Result};

pub struct HttpGraphBuilder {
    client: reqwest::Client,
    url: String,
}

impl HttpGraphBuilder {
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: build_url(&config.base_url, &config.build_path),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn build_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[async_trait]
impl GraphBuilder for HttpGraphBuilder {
    async fn build(&self, contract_text: &str, contract_id: i64) -> Result<String> {
        let body = serde_json::json!({
            "contract_text": contract_text,
            "contract_id": contract_id,
        });

        tracing::info!(url = %self.url, contract_id, chars = contract_text.len(), "calling graph service");
        let response = self.client.post(&self.url).json(&body).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ContractError::transport(format!(
                "graph service returned {}: {}",
                status,
                text.chars().take(512).collect::<String>()
            )));
        }

        // Must be JSON before anything is persisted.
        let graph: Value = serde_json::from_str(&text).map_err(|e| {
            ContractError::transport(format!("graph service returned invalid JSON: {}", e))
        })?;
        if let Some(status) = graph.get("status").and_then(Value::as_str) {
            if status.eq_ignore_ascii_case("error") || status.eq_ignore_ascii_case("failed") {
                return Err(ContractError::transport(format!(
                    "graph service reported {}",
                    status
                )));
            }
        }
        Ok(text)
    }
}
