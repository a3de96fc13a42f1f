//! Concrete collaborators wired into the binary.
//!
//! - [`EnvSecretResolver`]: secrets from environment variables.
//! - [`FsObjectStore`]: containers as directories under a local root.
//! - [`SftpTransportFactory`]: remote endpoints over SFTP.
//! - [`MountedTransportFactory`]: remote endpoints exposed as mounted directories.
//! - [`HttpPipelineTrigger`]: starts pipeline runs over HTTP.
//!
//! Everything is selected from the `adapters` section of the YAML config, see
//! [`build_services`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use edi_sync_core::contract::{
    BlobEntry, CollaboratorError, ObjectStore, PipelineRun, PipelineTrigger, RemoteEntry,
    SecretResolver, Services, TransportConfig, TransportFactory, TransportSession,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::sftp::{SftpTransportFactory, DEFAULT_TIMEOUT_SECS};

/// The `adapters` section of the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterSettings {
    /// Root directory holding one subdirectory per object-store container.
    pub storage_root: PathBuf,
    /// How remote endpoints are reached.
    #[serde(default)]
    pub transport: TransportKind,
    /// Directory under which each remote host is mounted as `{mount_root}/{host}`.
    /// When unset, the resolved host is itself the mount path. Mounted transport only.
    #[serde(default)]
    pub mount_root: Option<PathBuf>,
    /// Socket and SSH timeout, SFTP transport only.
    #[serde(default = "default_sftp_timeout")]
    pub sftp_timeout_secs: u64,
    #[serde(default)]
    pub trigger: Option<TriggerSettings>,
}

fn default_sftp_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Endpoints mounted as local directories.
    #[default]
    Mounted,
    Sftp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerSettings {
    pub base_url: String,
    /// Environment variable holding the bearer token, if the endpoint needs one.
    #[serde(default)]
    pub token_env: Option<String>,
}

/// Build the process-wide collaborator handles.
pub fn build_services(settings: &AdapterSettings) -> Services {
    let trigger: Arc<dyn PipelineTrigger> = match &settings.trigger {
        Some(t) => Arc::new(HttpPipelineTrigger::from_settings(t)),
        None => {
            warn!("No pipeline trigger configured, pipeline runs will fail to start");
            Arc::new(DisabledTrigger)
        }
    };
    let transports: Arc<dyn TransportFactory> = match settings.transport {
        TransportKind::Mounted => Arc::new(MountedTransportFactory::new(settings.mount_root.clone())),
        TransportKind::Sftp => Arc::new(SftpTransportFactory::new(settings.sftp_timeout_secs)),
    };
    info!(transport = ?settings.transport, "Remote transport selected");
    Services {
        secrets: Arc::new(EnvSecretResolver),
        transports,
        store: Arc::new(FsObjectStore::new(&settings.storage_root)),
        trigger,
    }
}

/// Reads secret `a-b-c` from the environment variable `A_B_C`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretResolver;

impl EnvSecretResolver {
    pub fn env_name(secret: &str) -> String {
        secret.replace('-', "_").to_uppercase()
    }
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn get(&self, name: &str) -> Option<String> {
        let var = Self::env_name(name);
        match std::env::var(&var) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => {
                debug!(secret = name, env = %var, "Secret not set");
                None
            }
        }
    }
}

/// Object store on the local file system: blob `path` of `container` lives at
/// `{root}/{container}/{path}`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, container: &str, path: &str) -> PathBuf {
        self.root.join(container).join(path.trim_start_matches('/'))
    }
}

async fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent).await,
        None => Ok(()),
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list_with_prefix(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<BlobEntry>, CollaboratorError> {
        let base = self.root.join(container);
        let mut found = Vec::new();
        let mut pending = vec![base.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let name = path
                    .strip_prefix(&base)?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if name.starts_with(prefix) {
                    found.push(BlobEntry { name });
                }
            }
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(container, prefix, blobs = found.len(), "Listed blobs");
        Ok(found)
    }

    async fn read_text(&self, container: &str, path: &str) -> Result<String, CollaboratorError> {
        Ok(tokio::fs::read_to_string(self.blob_path(container, path)).await?)
    }

    async fn read_bytes(&self, container: &str, path: &str) -> Result<Vec<u8>, CollaboratorError> {
        Ok(tokio::fs::read(self.blob_path(container, path)).await?)
    }

    async fn write_text(
        &self,
        container: &str,
        path: &str,
        content: &str,
    ) -> Result<(), CollaboratorError> {
        let target = self.blob_path(container, path);
        ensure_parent(&target).await?;
        tokio::fs::write(&target, content).await?;
        Ok(())
    }

    async fn write_from_local_file(
        &self,
        container: &str,
        path: &str,
        local_path: &Path,
    ) -> Result<(), CollaboratorError> {
        let target = self.blob_path(container, path);
        ensure_parent(&target).await?;
        tokio::fs::copy(local_path, &target).await?;
        Ok(())
    }
}

/// Creates [`MountedTransport`] sessions.
#[derive(Debug, Clone, Default)]
pub struct MountedTransportFactory {
    mount_root: Option<PathBuf>,
}

impl MountedTransportFactory {
    pub fn new(mount_root: Option<PathBuf>) -> Self {
        Self { mount_root }
    }
}

impl TransportFactory for MountedTransportFactory {
    fn create(&self) -> Box<dyn TransportSession> {
        Box::new(MountedTransport {
            mount_root: self.mount_root.clone(),
            root: None,
        })
    }
}

/// A remote endpoint reachable as a local directory, e.g. an SFTP share mounted
/// with sshfs. Remote paths are resolved below the host's mount point.
#[derive(Debug)]
pub struct MountedTransport {
    mount_root: Option<PathBuf>,
    root: Option<PathBuf>,
}

impl MountedTransport {
    fn resolve(&self, remote_path: &str) -> Result<PathBuf, CollaboratorError> {
        let root = self.root.as_ref().ok_or("session is not connected")?;
        Ok(root.join(remote_path.trim_start_matches('/')))
    }
}

#[async_trait]
impl TransportSession for MountedTransport {
    async fn connect(&mut self, config: &TransportConfig) -> Result<(), CollaboratorError> {
        let root = match &self.mount_root {
            Some(mounts) => mounts.join(&config.host),
            None => PathBuf::from(&config.host),
        };
        let mounted = tokio::fs::metadata(&root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !mounted {
            return Err(format!("host {} is not mounted at {}", config.host, root.display()).into());
        }
        info!(host = %config.host, root = %root.display(), "Connected to mounted endpoint");
        self.root = Some(root);
        Ok(())
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, CollaboratorError> {
        let dir = self.resolve(path)?;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names.into_iter().map(|name| RemoteEntry { name }).collect())
    }

    async fn get(&mut self, remote_path: &str, local_path: &Path) -> Result<(), CollaboratorError> {
        tokio::fs::copy(self.resolve(remote_path)?, local_path).await?;
        Ok(())
    }

    async fn read(&mut self, remote_path: &str) -> Result<Vec<u8>, CollaboratorError> {
        Ok(tokio::fs::read(self.resolve(remote_path)?).await?)
    }

    async fn put(&mut self, content: Vec<u8>, remote_path: &str) -> Result<(), CollaboratorError> {
        tokio::fs::write(self.resolve(remote_path)?, content).await?;
        Ok(())
    }

    async fn ensure_dir(&mut self, path: &str) -> Result<(), CollaboratorError> {
        tokio::fs::create_dir_all(self.resolve(path)?).await?;
        Ok(())
    }

    async fn delete(&mut self, remote_path: &str) -> Result<(), CollaboratorError> {
        tokio::fs::remove_file(self.resolve(remote_path)?).await?;
        Ok(())
    }

    async fn end(&mut self) -> Result<(), CollaboratorError> {
        self.root = None;
        Ok(())
    }
}

/// Starts pipeline runs with a `createRun` POST.
#[derive(Debug, Clone)]
pub struct HttpPipelineTrigger {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRunResponse {
    run_id: String,
}

impl HttpPipelineTrigger {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    pub fn from_settings(settings: &TriggerSettings) -> Self {
        let token = settings.token_env.as_deref().and_then(|var| match std::env::var(var) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(env = var, error = %e, "Trigger token not available, sending without auth");
                None
            }
        });
        Self::new(settings.base_url.clone(), token)
    }

    pub fn run_url(&self, resource_group: &str, factory: &str, pipeline_name: &str) -> String {
        format!(
            "{}/resourceGroups/{resource_group}/factories/{factory}/pipelines/{pipeline_name}/createRun",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl PipelineTrigger for HttpPipelineTrigger {
    async fn create_run(
        &self,
        resource_group: &str,
        factory: &str,
        pipeline_name: &str,
        parameters: serde_json::Value,
    ) -> Result<PipelineRun, CollaboratorError> {
        let url = self.run_url(resource_group, factory, pipeline_name);
        info!(url = %url, pipeline = pipeline_name, "Creating pipeline run");
        let mut request = self.client.post(&url).json(&parameters);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?.error_for_status()?;
        let body: CreateRunResponse = response.json().await?;
        Ok(PipelineRun {
            run_id: body.run_id,
        })
    }
}

/// Used when no trigger endpoint is configured; every run request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTrigger;

#[async_trait]
impl PipelineTrigger for DisabledTrigger {
    async fn create_run(
        &self,
        _resource_group: &str,
        _factory: &str,
        pipeline_name: &str,
        _parameters: serde_json::Value,
    ) -> Result<PipelineRun, CollaboratorError> {
        Err(format!("cannot start {pipeline_name}: no pipeline trigger configured").into())
    }
}
