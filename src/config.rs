//! TOML configuration parsing.
//!
//! ```toml
//! [db]
//! path = "./data/crv.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [remote]
//! backend = "sftp"          # or "local"
//! host = "files.internal"
//! username = "contracts"
//! upload_dir = "/data/contracts/uploads"
//!
//! [extraction]
//! endpoint = "http://ocr.internal:30000/file_parse"
//!
//! [graph]
//! base_url = "http://kg.internal:8000"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    pub remote: RemoteConfig,
    pub extraction: ExtractionConfig,
    pub graph: GraphConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

/// Which [`RemoteStore`](crate::remote::RemoteStore) backend to build.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    Sftp,
    Local,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub backend: RemoteBackend,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Environment variable consulted when `password` is not set inline.
    #[serde(default = "default_password_env")]
    pub password_env: String,
    /// Root directory of the `local` backend.
    #[serde(default)]
    pub local_root: Option<PathBuf>,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

fn default_ssh_port() -> u16 {
    22
}
fn default_password_env() -> String {
    "CRV_SFTP_PASSWORD".to_string()
}
fn default_upload_dir() -> String {
    "/data/contracts/uploads".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_io_timeout_secs() -> u64 {
    120
}

impl RemoteConfig {
    /// Inline password, else the configured environment variable.
    pub fn resolve_password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var(&self.password_env).ok())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    pub endpoint: String,
    #[serde(default = "default_engine")]
    pub backend: String,
    /// Remote directory the service writes its own artifacts under;
    /// `<output_root>/<contract_id>/<version_number>` is sent per run.
    #[serde(default = "default_output_root")]
    pub output_root: String,
    #[serde(default = "default_true")]
    pub formula_enable: bool,
    #[serde(default = "default_true")]
    pub table_enable: bool,
    #[serde(default = "default_true")]
    pub return_images: bool,
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_engine() -> String {
    "hybrid-auto-engine".to_string()
}
fn default_output_root() -> String {
    "/data/contracts/ocr".to_string()
}
fn default_true() -> bool {
    true
}
fn default_extraction_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    pub base_url: String,
    #[serde(default = "default_graph_path")]
    pub build_path: String,
    #[serde(default = "default_graph_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_graph_path() -> String {
    "/cckg/build".to_string()
}
fn default_graph_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    /// Directory for scratch downloads; the system temp dir when unset.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.server.bind.trim().is_empty() {
        bail!("server.bind must not be empty");
    }
    if config.server.max_upload_bytes == 0 {
        bail!("server.max_upload_bytes must be > 0");
    }

    match config.remote.backend {
        RemoteBackend::Sftp => {
            if config.remote.host.as_deref().unwrap_or("").is_empty() {
                bail!("remote.host is required for the sftp backend");
            }
            if config.remote.username.as_deref().unwrap_or("").is_empty() {
                bail!("remote.username is required for the sftp backend");
            }
        }
        RemoteBackend::Local => {
            if config.remote.local_root.is_none() {
                bail!("remote.local_root is required for the local backend");
            }
        }
    }
    if config.remote.connect_timeout_secs == 0 || config.remote.io_timeout_secs == 0 {
        bail!("remote timeouts must be > 0");
    }

    if config.extraction.endpoint.trim().is_empty() {
        bail!("extraction.endpoint must not be empty");
    }
    if config.extraction.timeout_secs == 0 || config.extraction.connect_timeout_secs == 0 {
        bail!("extraction timeouts must be > 0");
    }

    if config.graph.base_url.trim().is_empty() {
        bail!("graph.base_url must not be empty");
    }
    if config.graph.timeout_secs == 0 || config.graph.connect_timeout_secs == 0 {
        bail!("graph timeouts must be > 0");
    }

    Ok(())
}
