#![allow(dead_code)]

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use contract_review::app::{App, Components};
use contract_review::config::Config;
use contract_review::error::{ContractError, Result};
use contract_review::models::ExtractionArtifacts;
use contract_review::progress::{ProgressEvent, ProgressReporter, Stage, StageStatus};
use contract_review::remote::{LocalRemoteStore, RemoteStore};
use contract_review::services::{DocumentExtractor, ExtractionRequest, GraphBuilder};
use contract_review::store::memory::InMemoryStore;

pub const UPLOAD_DIR: &str = "/data/contracts/uploads";

pub fn test_config(root: &Path) -> Config {
    let raw = format!(
        r#"
[db]
path = "{root}/crv.sqlite"

[server]
bind = "127.0.0.1:0"

[remote]
backend = "local"
local_root = "{root}/remote"
upload_dir = "{upload}"

[extraction]
endpoint = "http://127.0.0.1:9/file_parse"
output_root = "/data/contracts/ocr"

[graph]
base_url = "http://127.0.0.1:9"
"#,
        root = root.display(),
        upload = UPLOAD_DIR
    );
    toml::from_str(&raw).unwrap()
}

/// Minimal .docx with one `w:p` per paragraph.
pub fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let opts = zip::write::SimpleFileOptions::default();
        zip.start_file("word/document.xml", opts).unwrap();
        write!(
            zip,
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        )
        .unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// Files currently stored under the local remote root's upload directory.
pub fn uploaded_files(remote_root: &Path) -> Vec<PathBuf> {
    let dir = remote_root.join(UPLOAD_DIR.trim_start_matches('/'));
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Extraction fake
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct FakeExtractor {
    markdown: Mutex<String>,
    fail: Mutex<Option<String>>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub output_dirs: Mutex<Vec<String>>,
    pub received_bytes: Mutex<Vec<usize>>,
}

impl FakeExtractor {
    pub fn returning(markdown: &str) -> Self {
        Self {
            markdown: Mutex::new(markdown.to_string()),
            ..Default::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail: Mutex::new(Some(message.to_string())),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_markdown(&self, markdown: &str) {
        *self.markdown.lock().unwrap() = markdown.to_string();
    }
}

#[async_trait]
impl DocumentExtractor for FakeExtractor {
    async fn extract(&self, request: ExtractionRequest<'_>) -> Result<ExtractionArtifacts> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let bytes = tokio::fs::read(request.file).await?;
        self.received_bytes.lock().unwrap().push(bytes.len());
        self.output_dirs
            .lock()
            .unwrap()
            .push(request.output_dir.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = self.fail.lock().unwrap().clone() {
            return Err(ContractError::transport(message));
        }
        Ok(ExtractionArtifacts {
            markdown: self.markdown.lock().unwrap().clone(),
            middle_json: Some(r#"{"pdf_info":[]}"#.to_string()),
            model_output: Some("[]".to_string()),
            content_list: Some(r#"[{"type":"text"}]"#.to_string()),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Graph fake
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub enum GraphMode {
    Graph(String),
    Fail(String),
}

pub struct FakeGraph {
    mode: Mutex<GraphMode>,
    pub calls: AtomicUsize,
    pub texts: Mutex<Vec<(String, i64)>>,
}

impl FakeGraph {
    pub fn returning(json: &str) -> Self {
        Self::new(GraphMode::Graph(json.to_string()))
    }

    pub fn failing(message: &str) -> Self {
        Self::new(GraphMode::Fail(message.to_string()))
    }

    /// Makes every later build fail with `message`.
    pub fn set_failing(&self, message: &str) {
        *self.mode.lock().unwrap() = GraphMode::Fail(message.to_string());
    }

    fn new(mode: GraphMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        }
    }
}

pub const GRAPH_JSON: &str = r#"{"status":"success","nodes":[{"id":"party-a"},{"id":"party-b"}],"edges":[{"from":"party-a","to":"party-b"}]}"#;

#[async_trait]
impl GraphBuilder for FakeGraph {
    async fn build(&self, contract_text: &str, contract_id: i64) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts
            .lock()
            .unwrap()
            .push((contract_text.to_string(), contract_id));
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            GraphMode::Graph(json) => Ok(json),
            GraphMode::Fail(message) => Err(ContractError::transport(message)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Progress recorder
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn steps(&self) -> Vec<(Stage, StageStatus)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.step, e.status))
            .collect()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════════

pub struct Harness {
    pub app: App,
    pub store: Arc<InMemoryStore>,
    pub remote_root: PathBuf,
    pub extractor: Arc<FakeExtractor>,
    pub graph: Arc<FakeGraph>,
    _tmp: TempDir,
}

pub fn harness(extractor: FakeExtractor, graph: FakeGraph) -> Harness {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let remote_root = tmp.path().join("remote");
    let store = Arc::new(InMemoryStore::new());
    let extractor = Arc::new(extractor);
    let graph = Arc::new(graph);
    let remote: Arc<dyn RemoteStore> = Arc::new(LocalRemoteStore::new(&remote_root));

    let app = App::assemble(
        &config,
        Components {
            contracts: store.clone(),
            contents: store.clone(),
            remote,
            extractor: extractor.clone(),
            graph: graph.clone(),
        },
    );
    Harness {
        app,
        store,
        remote_root,
        extractor,
        graph,
        _tmp: tmp,
    }
}
