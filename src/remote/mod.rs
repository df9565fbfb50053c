//! Remote file storage for uploaded contract files.
//!
//! ```text
//!  VersionLedger ──upload──▶ ┌───────────────┐
//!                            │  RemoteStore  │──▶ sftp  (ssh2, session per call)
//!  ReviewPipeline ─download─▶└───────────────┘──▶ local (directory on disk)
//! ```
//!
//! Paths handed out by [`RemoteStore::upload`] are absolute, `/`-separated
//! remote paths. They are stored on the version row and passed back verbatim
//! for download and delete.

pub mod local;
pub mod sftp;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::{RemoteBackend, RemoteConfig};
use crate::error::{ContractError, Result};

pub use local::LocalRemoteStore;
pub use sftp::SftpRemoteStore;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short backend name for logs (`"sftp"`, `"local"`).
    fn backend(&self) -> &str;

    /// Writes `bytes` as `dir/file_name`, creating `dir` recursively.
    /// Returns the full remote path.
    async fn upload(&self, bytes: &[u8], dir: &str, file_name: &str) -> Result<String>;

    /// Copies the remote file to `local`, overwriting it.
    async fn download(&self, remote_path: &str, local: &Path) -> Result<()>;

    /// Best-effort removal. Failures are logged, never returned.
    async fn delete(&self, remote_path: &str);

    async fn ensure_directory(&self, dir: &str) -> Result<()>;

    async fn exists(&self, remote_path: &str) -> Result<bool>;
}

/// Joins a remote directory and a file name with exactly one `/`.
pub fn join_remote(dir: &str, file_name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let file_name = file_name.trim_start_matches('/');
    if dir.is_empty() {
        format!("/{}", file_name)
    } else {
        format!("{}/{}", dir, file_name)
    }
}

/// Builds the backend selected by `[remote].backend`.
pub fn from_config(config: &RemoteConfig) -> Result<Arc<dyn RemoteStore>> {
    match config.backend {
        RemoteBackend::Local => {
            let root = config.local_root.clone().ok_or_else(|| {
                ContractError::invalid_input("remote.local_root is required for the local backend")
            })?;
            Ok(Arc::new(LocalRemoteStore::new(root)))
        }
        RemoteBackend::Sftp => Ok(Arc::new(SftpRemoteStore::from_config(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_remote_normalizes_separators() {
        assert_eq!(join_remote("/data/up/", "a.pdf"), "/data/up/a.pdf");
        assert_eq!(join_remote("/data/up", "/a.pdf"), "/data/up/a.pdf");
        assert_eq!(join_remote("", "a.pdf"), "/a.pdf");
    }
}
