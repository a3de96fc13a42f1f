//! SFTP transport over `ssh2`.
//!
//! `ssh2` is blocking, so every call runs on the blocking pool with
//! `spawn_blocking`. One [`SftpTransport`] is one SSH session with one SFTP
//! channel; the retry wrapper creates a fresh one per connection attempt.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use edi_sync_core::contract::{
    CollaboratorError, RemoteEntry, TransportConfig, TransportFactory, TransportSession,
};
use ssh2::{Session, Sftp};
use tracing::{debug, info};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Creates unconnected [`SftpTransport`] sessions.
#[derive(Debug, Clone, Copy)]
pub struct SftpTransportFactory {
    timeout_secs: u64,
}

impl SftpTransportFactory {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

impl Default for SftpTransportFactory {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECS)
    }
}

impl TransportFactory for SftpTransportFactory {
    fn create(&self) -> Box<dyn TransportSession> {
        Box::new(SftpTransport {
            timeout_secs: self.timeout_secs,
            session: None,
            sftp: None,
        })
    }
}

pub struct SftpTransport {
    timeout_secs: u64,
    session: Option<Session>,
    sftp: Option<Arc<Sftp>>,
}

fn connect_blocking(
    config: TransportConfig,
    timeout_secs: u64,
) -> Result<(Session, Sftp), CollaboratorError> {
    let addr = format!("{}:{}", config.host, config.port);
    let tcp = TcpStream::connect(&addr)
        .map_err(|e| format!("cannot reach {addr}: {e}"))?;
    let timeout = Duration::from_secs(timeout_secs);
    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout_secs.saturating_mul(1000)).unwrap_or(u32::MAX));
    session
        .handshake()
        .map_err(|e| format!("SSH handshake with {addr} failed: {e}"))?;

    let username = config
        .username
        .as_deref()
        .ok_or_else(|| format!("no username for {}", config.host))?;
    session
        .userauth_password(username, config.password.as_deref().unwrap_or_default())
        .map_err(|e| format!("password authentication as {username} failed: {e}"))?;
    if !session.authenticated() {
        return Err(format!("authentication to {addr} failed").into());
    }

    let sftp = session
        .sftp()
        .map_err(|e| format!("cannot open SFTP channel on {addr}: {e}"))?;
    Ok((session, sftp))
}

fn read_all(sftp: &Sftp, path: &Path) -> Result<Vec<u8>, CollaboratorError> {
    let mut file = sftp.open(path)?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn make_dirs(sftp: &Sftp, path: &Path) -> Result<(), CollaboratorError> {
    if sftp.stat(path).is_ok() {
        return Ok(());
    }
    let mut current = PathBuf::new();
    for component in path.components() {
        current.push(component);
        if sftp.stat(&current).is_err() {
            sftp.mkdir(&current, 0o755)?;
        }
    }
    Ok(())
}

impl SftpTransport {
    /// Run `op` against the SFTP channel on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T, CollaboratorError>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp) -> Result<T, CollaboratorError> + Send + 'static,
    {
        let sftp = self.sftp.clone().ok_or("session is not connected")?;
        tokio::task::spawn_blocking(move || op(&sftp)).await?
    }
}

#[async_trait]
impl TransportSession for SftpTransport {
    async fn connect(&mut self, config: &TransportConfig) -> Result<(), CollaboratorError> {
        let host = config.host.clone();
        let config = config.clone();
        let timeout_secs = self.timeout_secs;
        let (session, sftp) =
            tokio::task::spawn_blocking(move || connect_blocking(config, timeout_secs)).await??;
        info!(host = %host, "Connected to SFTP endpoint");
        self.session = Some(session);
        self.sftp = Some(Arc::new(sftp));
        Ok(())
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, CollaboratorError> {
        let dir = PathBuf::from(path);
        self.blocking(move |sftp| {
            let mut names: Vec<String> = sftp
                .readdir(&dir)?
                .into_iter()
                .filter(|(_, stat)| stat.is_file())
                .filter_map(|(p, _)| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect();
            names.sort();
            Ok(names.into_iter().map(|name| RemoteEntry { name }).collect())
        })
        .await
    }

    async fn get(&mut self, remote_path: &str, local_path: &Path) -> Result<(), CollaboratorError> {
        let remote = PathBuf::from(remote_path);
        let local = local_path.to_path_buf();
        self.blocking(move |sftp| {
            let content = read_all(sftp, &remote)?;
            std::fs::write(&local, content)?;
            Ok(())
        })
        .await
    }

    async fn read(&mut self, remote_path: &str) -> Result<Vec<u8>, CollaboratorError> {
        let remote = PathBuf::from(remote_path);
        self.blocking(move |sftp| read_all(sftp, &remote)).await
    }

    async fn put(&mut self, content: Vec<u8>, remote_path: &str) -> Result<(), CollaboratorError> {
        let remote = PathBuf::from(remote_path);
        self.blocking(move |sftp| {
            let mut file = sftp.create(&remote)?;
            file.write_all(&content)?;
            Ok(())
        })
        .await
    }

    async fn ensure_dir(&mut self, path: &str) -> Result<(), CollaboratorError> {
        let dir = PathBuf::from(path);
        self.blocking(move |sftp| make_dirs(sftp, &dir)).await
    }

    async fn delete(&mut self, remote_path: &str) -> Result<(), CollaboratorError> {
        let remote = PathBuf::from(remote_path);
        self.blocking(move |sftp| Ok(sftp.unlink(&remote)?)).await
    }

    async fn end(&mut self) -> Result<(), CollaboratorError> {
        self.sftp = None;
        if let Some(session) = self.session.take() {
            tokio::task::spawn_blocking(move || {
                if let Err(e) = session.disconnect(None, "closing", None) {
                    debug!(error = %e, "SFTP disconnect failed");
                }
            })
            .await?;
        }
        Ok(())
    }
}
