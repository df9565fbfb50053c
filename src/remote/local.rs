//! Directory-backed [`RemoteStore`] for single-host deployments and tests.
//!
//! Remote paths are mapped under `root` by stripping the leading `/`, so
//! `/data/contracts/uploads/x.pdf` lands at `<root>/data/contracts/uploads/x.pdf`.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use super::{join_remote, RemoteStore};
use crate::error::{ContractError, Result};

pub struct LocalRemoteStore {
    root: PathBuf,
}

impl LocalRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path for a remote path. Rejects `..` components.
    pub fn resolve(&self, remote_path: &str) -> Result<PathBuf> {
        let relative = Path::new(remote_path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ContractError::invalid_input(format!(
                "remote path escapes storage root: {}",
                remote_path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl RemoteStore for LocalRemoteStore {
    fn backend(&self) -> &str {
        "local"
    }

    async fn upload(&self, bytes: &[u8], dir: &str, file_name: &str) -> Result<String> {
        self.ensure_directory(dir).await?;
        let remote_path = join_remote(dir, file_name);
        let target = self.resolve(&remote_path)?;
        tokio::fs::write(&target, bytes).await?;
        tracing::debug!(path = %remote_path, bytes = bytes.len(), "stored file locally");
        Ok(remote_path)
    }

    async fn download(&self, remote_path: &str, local: &Path) -> Result<()> {
        let source = self.resolve(remote_path)?;
        match tokio::fs::copy(&source, local).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ContractError::transport(
                format!("remote file missing: {}", remote_path),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, remote_path: &str) {
        let target = match self.resolve(remote_path) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(path = %remote_path, error = %e, "skipping remote delete");
                return;
            }
        };
        if let Err(e) = tokio::fs::remove_file(&target).await {
            tracing::warn!(path = %remote_path, error = %e, "failed to delete remote file");
        }
    }

    async fn ensure_directory(&self, dir: &str) -> Result<()> {
        let target = self.resolve(dir)?;
        tokio::fs::create_dir_all(&target).await?;
        Ok(())
    }

    async fn exists(&self, remote_path: &str) -> Result<bool> {
        let target = self.resolve(remote_path)?;
        Ok(tokio::fs::try_exists(&target).await?)
    }
}
