//! SFTP-backed [`RemoteStore`] using `ssh2`.
//!
//! Each operation opens its own SSH session on a blocking worker thread and
//! tears it down when the operation ends, success or failure. Session
//! release lives in [`SftpSession`]'s `Drop`.

use async_trait::async_trait;
use ssh2::{ErrorCode, Session, Sftp};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{join_remote, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::{ContractError, Result};

/// `LIBSSH2_FX_NO_SUCH_FILE`
const FX_NO_SUCH_FILE: i32 = 2;

#[derive(Clone)]
struct Endpoint {
    host: String,
    port: u16,
    username: String,
    password: String,
    connect_timeout: Duration,
    io_timeout: Duration,
}

pub struct SftpRemoteStore {
    endpoint: Endpoint,
}

impl SftpRemoteStore {
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let host = config
            .host
            .clone()
            .ok_or_else(|| ContractError::invalid_input("remote.host is required for sftp"))?;
        let username = config
            .username
            .clone()
            .ok_or_else(|| ContractError::invalid_input("remote.username is required for sftp"))?;
        let password = config.resolve_password().ok_or_else(|| {
            ContractError::invalid_input(format!(
                "no sftp password: set remote.password or {}",
                config.password_env
            ))
        })?;
        Ok(Self {
            endpoint: Endpoint {
                host,
                port: config.port,
                username,
                password,
                connect_timeout: config.connect_timeout(),
                io_timeout: config.io_timeout(),
            },
        })
    }

    /// Runs `op` against a fresh session on the blocking pool.
    async fn with_session<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T> + Send + 'static,
    {
        let endpoint = self.endpoint.clone();
        tokio::task::spawn_blocking(move || {
            let session = SftpSession::open(&endpoint)?;
            let sftp = session.sftp()?;
            op(sftp)
        })
        .await
        .map_err(|e| ContractError::transport(format!("sftp worker failed: {}", e)))?
    }
}

/// An authenticated SSH session plus its SFTP channel.
struct SftpSession {
    sftp: Option<Sftp>,
    session: Session,
}

impl SftpSession {
    fn open(endpoint: &Endpoint) -> Result<Self> {
        let addr = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| io_transport(&endpoint.host, e))?
            .next()
            .ok_or_else(|| {
                ContractError::transport(format!("sftp host did not resolve: {}", endpoint.host))
            })?;
        let tcp = TcpStream::connect_timeout(&addr, endpoint.connect_timeout)
            .map_err(|e| io_transport(&endpoint.host, e))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(endpoint.io_timeout.as_millis().min(u32::MAX as u128) as u32);
        session.handshake()?;
        session.userauth_password(&endpoint.username, &endpoint.password)?;
        if !session.authenticated() {
            return Err(ContractError::transport(format!(
                "sftp authentication failed for {}@{}",
                endpoint.username, endpoint.host
            )));
        }
        let sftp = session.sftp()?;
        tracing::debug!(host = %endpoint.host, "sftp session opened");
        Ok(Self {
            sftp: Some(sftp),
            session,
        })
    }

    fn sftp(&self) -> Result<&Sftp> {
        self.sftp
            .as_ref()
            .ok_or_else(|| ContractError::transport("sftp channel already closed"))
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        // Channel before session.
        drop(self.sftp.take());
        if let Err(e) = self.session.disconnect(None, "done", None) {
            tracing::debug!(error = %e, "sftp disconnect failed");
        }
    }
}

fn io_transport(what: &str, err: std::io::Error) -> ContractError {
    ContractError::transport(format!("sftp {}: {}", what, err))
}

fn is_missing(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::SFTP(FX_NO_SUCH_FILE))
}

/// `mkdir -p` over SFTP.
fn mkdir_recursive(sftp: &Sftp, dir: &str) -> Result<()> {
    let mut current = PathBuf::from("/");
    for part in dir.split('/').filter(|p| !p.is_empty()) {
        current.push(part);
        match sftp.stat(&current) {
            Ok(stat) if stat.is_dir() => {}
            Ok(_) => {
                return Err(ContractError::transport(format!(
                    "remote path exists and is not a directory: {}",
                    current.display()
                )))
            }
            Err(e) if is_missing(&e) => sftp.mkdir(&current, 0o755)?,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[async_trait]
impl RemoteStore for SftpRemoteStore {
    fn backend(&self) -> &str {
        "sftp"
    }

    async fn upload(&self, bytes: &[u8], dir: &str, file_name: &str) -> Result<String> {
        let dir = dir.to_string();
        let remote_path = join_remote(&dir, file_name);
        let target = remote_path.clone();
        let bytes = bytes.to_vec();
        let size = bytes.len();
        self.with_session(move |sftp| {
            mkdir_recursive(sftp, &dir)?;
            let mut file = sftp.create(Path::new(&target))?;
            file.write_all(&bytes).map_err(|e| io_transport(&target, e))?;
            Ok(())
        })
        .await?;
        tracing::info!(path = %remote_path, bytes = size, "uploaded file over sftp");
        Ok(remote_path)
    }

    async fn download(&self, remote_path: &str, local: &Path) -> Result<()> {
        let source = remote_path.to_string();
        let local = local.to_path_buf();
        self.with_session(move |sftp| {
            let mut remote = sftp.open(Path::new(&source))?;
            let mut out = std::fs::File::create(&local)?;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = remote.read(&mut buf).map_err(|e| io_transport(&source, e))?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
            }
            out.flush()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, remote_path: &str) {
        let target = remote_path.to_string();
        let result = self
            .with_session(move |sftp| Ok(sftp.unlink(Path::new(&target))?))
            .await;
        if let Err(e) = result {
            tracing::warn!(path = %remote_path, error = %e, "failed to delete remote file");
        }
    }

    async fn ensure_directory(&self, dir: &str) -> Result<()> {
        let dir = dir.to_string();
        self.with_session(move |sftp| mkdir_recursive(sftp, &dir)).await
    }

    async fn exists(&self, remote_path: &str) -> Result<bool> {
        let target = remote_path.to_string();
        self.with_session(move |sftp| match sftp.lstat(Path::new(&target)) {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
    }
}
