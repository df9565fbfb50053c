//! Core data models for contracts, their versions, and extracted content.
//!
//! Timestamps are Unix epoch seconds, matching the SQLite columns they are
//! stored in.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a contract.
///
/// Serialized as its integer code (`0..=3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ContractStatus {
    Draft,
    UnderReview,
    Approved,
    Rejected,
}

impl ContractStatus {
    pub fn code(self) -> i64 {
        match self {
            ContractStatus::Draft => 0,
            ContractStatus::UnderReview => 1,
            ContractStatus::Approved => 2,
            ContractStatus::Rejected => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ContractStatus::Draft),
            1 => Some(ContractStatus::UnderReview),
            2 => Some(ContractStatus::Approved),
            3 => Some(ContractStatus::Rejected),
            _ => None,
        }
    }

    /// Status only moves forward, except that approval and rejection are
    /// manual decisions and may be applied from any state.
    pub fn can_transition_to(self, next: ContractStatus) -> bool {
        match next {
            ContractStatus::Approved | ContractStatus::Rejected => true,
            _ => next.code() >= self.code(),
        }
    }
}

impl From<ContractStatus> for i64 {
    fn from(status: ContractStatus) -> i64 {
        status.code()
    }
}

impl TryFrom<i64> for ContractStatus {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        ContractStatus::from_code(code).ok_or_else(|| format!("unknown contract status: {}", code))
    }
}

/// A contract row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: i64,
    pub contract_number: String,
    pub contract_name: String,
    pub status: ContractStatus,
    pub category: Option<String>,
    pub department: Option<String>,
    pub creator_id: String,
    /// Which pipeline stage or agent last mutated the contract.
    pub last_touched_by: Option<String>,
    pub remark: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields needed to insert a contract.
#[derive(Debug, Clone)]
pub struct NewContract {
    pub contract_number: String,
    pub contract_name: String,
    pub status: ContractStatus,
    pub category: Option<String>,
    pub department: Option<String>,
    pub creator_id: String,
    pub remark: Option<String>,
}

/// An immutable, content-addressed upload of a contract's source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: i64,
    pub contract_id: i64,
    pub version_number: i64,
    pub content_hash: String,
    pub storage_path: String,
    pub file_name: String,
    pub media_type: Option<String>,
    pub file_size: i64,
    pub creator_id: String,
    pub remark: Option<String>,
    pub created_at: i64,
}

/// Fields needed to insert a version. The version number is assigned by the
/// store.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub content_hash: String,
    pub storage_path: String,
    pub file_name: String,
    pub media_type: Option<String>,
    pub file_size: i64,
    pub creator_id: String,
    pub remark: Option<String>,
}

/// Key of a [`ContentRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentKey {
    pub contract_id: i64,
    pub version_id: i64,
}

impl ContentKey {
    pub fn new(contract_id: i64, version_id: i64) -> Self {
        Self {
            contract_id,
            version_id,
        }
    }
}

/// Extracted text and pipeline artifacts for one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub contract_id: i64,
    pub version_id: i64,
    /// Markdown produced by the extraction service.
    pub content: Option<String>,
    pub plain_text: String,
    pub html: String,
    pub middle_json: Option<String>,
    pub model_output: Option<String>,
    pub content_list: Option<String>,
    pub knowledge_graph: Option<String>,
    pub creator_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ContentRecord {
    /// A fresh record holding only the eagerly derived text fields.
    pub fn new(key: ContentKey, plain_text: String, html: String, creator_id: &str) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            contract_id: key.contract_id,
            version_id: key.version_id,
            content: None,
            plain_text,
            html,
            middle_json: None,
            model_output: None,
            content_list: None,
            knowledge_graph: None,
            creator_id: creator_id.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> ContentKey {
        ContentKey::new(self.contract_id, self.version_id)
    }

    /// Overwrites the stage-1 artifact fields and clears the graph, which
    /// belonged to the previous extraction.
    pub fn apply_extraction(&mut self, artifacts: &ExtractionArtifacts) {
        self.content = Some(artifacts.markdown.clone());
        self.knowledge_graph = None;
        self.middle_json = artifacts.middle_json.clone();
        self.model_output = artifacts.model_output.clone();
        self.content_list = artifacts.content_list.clone();
        self.updated_at = chrono::Utc::now().timestamp();
    }
}

/// Output of the extraction stage for one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionArtifacts {
    pub markdown: String,
    pub middle_json: Option<String>,
    pub model_output: Option<String>,
    pub content_list: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_only() {
        use ContractStatus::*;
        assert!(Draft.can_transition_to(UnderReview));
        assert!(UnderReview.can_transition_to(UnderReview));
        assert!(!UnderReview.can_transition_to(Draft));
        assert!(!Approved.can_transition_to(UnderReview));
    }

    #[test]
    fn manual_decisions_always_allowed() {
        use ContractStatus::*;
        assert!(Draft.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Rejected));
        assert!(Rejected.can_transition_to(Approved));
    }

    #[test]
    fn status_serializes_as_code() {
        let json = serde_json::to_string(&ContractStatus::UnderReview).unwrap();
        assert_eq!(json, "1");
        let parsed: ContractStatus = serde_json::from_str("3").unwrap();
        assert_eq!(parsed, ContractStatus::Rejected);
        assert!(serde_json::from_str::<ContractStatus>("9").is_err());
    }

    #[test]
    fn extraction_clears_previous_graph() {
        let mut record = ContentRecord::new(ContentKey::new(1, 2), String::new(), String::new(), "alice");
        record.content = Some("old text".into());
        record.knowledge_graph = Some("{\"nodes\":[]}".into());

        record.apply_extraction(&ExtractionArtifacts {
            markdown: "new text".into(),
            ..Default::default()
        });
        assert_eq!(record.content.as_deref(), Some("new text"));
        assert!(record.knowledge_graph.is_none());
    }
}
