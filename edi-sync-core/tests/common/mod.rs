#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use edi_sync_core::config::{
    AppConfig, ConnectionDescriptor, DocumentSettings, DocumentType, PipelineSettings,
    RetryPolicy,
};
use edi_sync_core::contract::{
    BlobEntry, CollaboratorError, MockPipelineTrigger, ObjectStore, PipelineTrigger, RemoteEntry,
    SecretResolver, Services, TransportConfig, TransportFactory, TransportSession,
};

/// Retry policy without sleeps, for tests that do not assert timing.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 0,
        multiplier: 3,
    }
}

pub fn settings(source_key: &str, storage_destination: &str, file_format: &str) -> DocumentSettings {
    DocumentSettings {
        enabled: true,
        source_key: Some(source_key.to_string()),
        destination_key: None,
        storage_destination: storage_destination.to_string(),
        file_format: Some(file_format.to_string()),
        delete_after_read: false,
    }
}

/// A connection whose secrets are `{name}-host`, `{name}-user`, `{name}-password`.
pub fn descriptor(name: &str, documents: Vec<(DocumentType, DocumentSettings)>) -> ConnectionDescriptor {
    ConnectionDescriptor {
        name: name.to_string(),
        host_key: format!("{name}-host"),
        username_key: format!("{name}-user"),
        password_key: format!("{name}-password"),
        port: 22,
        documents: documents.into_iter().collect(),
    }
}

pub fn app_config(connections: Vec<ConnectionDescriptor>) -> AppConfig {
    AppConfig {
        tenant_id: "tenant-1".into(),
        container: "edi".into(),
        storage_835_destination_path: "inbound/835".into(),
        outbound_837_path: "inbound/tenant-1/generated_837_selective_grouped".into(),
        connections,
        relays: Vec::new(),
        manual_remittance: None,
        pipelines: PipelineSettings {
            resource_group: "rg".into(),
            factory: "adf".into(),
            names: HashMap::from([
                (DocumentType::Edi277, "pl-277".to_string()),
                (DocumentType::Edi835, "pl-835".to_string()),
                (DocumentType::Edi999, "pl-999".to_string()),
            ]),
        },
        retry: fast_retry(),
        scratch_dir: None,
    }
}

/// Secrets from a fixed table.
#[derive(Default)]
pub struct StaticSecrets(pub HashMap<String, String>);

impl StaticSecrets {
    pub fn with(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

#[async_trait]
impl SecretResolver for StaticSecrets {
    async fn get(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }
}

/// State of one simulated remote endpoint. Files are keyed by full remote path.
#[derive(Debug, Default)]
pub struct FakeHost {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub fail_connect: bool,
    pub fail_get: BTreeSet<String>,
    pub deleted: Vec<String>,
    pub closed: usize,
}

/// A set of simulated endpoints addressed by host name.
#[derive(Clone, Default)]
pub struct FakeNetwork {
    hosts: Arc<Mutex<HashMap<String, FakeHost>>>,
    created: Arc<AtomicUsize>,
}

impl FakeNetwork {
    pub fn add_host(&self, host: &str, files: &[(&str, &str)]) {
        let fake = FakeHost {
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
                .collect(),
            ..FakeHost::default()
        };
        self.hosts.lock().unwrap().insert(host.to_string(), fake);
    }

    pub fn with_host<R>(&self, host: &str, f: impl FnOnce(&mut FakeHost) -> R) -> R {
        let mut hosts = self.hosts.lock().unwrap();
        f(hosts.get_mut(host).expect("unknown fake host"))
    }

    pub fn sessions_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl TransportFactory for FakeNetwork {
    fn create(&self) -> Box<dyn TransportSession> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeSession {
            network: self.clone(),
            host: None,
        })
    }
}

struct FakeSession {
    network: FakeNetwork,
    host: Option<String>,
}

impl FakeSession {
    fn with<R>(&self, f: impl FnOnce(&mut FakeHost) -> Result<R, CollaboratorError>) -> Result<R, CollaboratorError> {
        let host = self.host.as_deref().ok_or("not connected")?;
        let mut hosts = self.network.hosts.lock().unwrap();
        f(hosts.get_mut(host).ok_or("host vanished")?)
    }
}

#[async_trait]
impl TransportSession for FakeSession {
    async fn connect(&mut self, config: &TransportConfig) -> Result<(), CollaboratorError> {
        let reachable = {
            let hosts = self.network.hosts.lock().unwrap();
            hosts.get(&config.host).is_some_and(|h| !h.fail_connect)
        };
        if reachable {
            self.host = Some(config.host.clone());
            Ok(())
        } else {
            Err(format!("connection refused by {}", config.host).into())
        }
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, CollaboratorError> {
        let dir = path.trim_end_matches('/');
        self.with(|h| {
            Ok(h.files
                .keys()
                .filter_map(|k| {
                    let rest = if dir.is_empty() {
                        Some(k.as_str())
                    } else {
                        k.strip_prefix(dir).and_then(|r| r.strip_prefix('/'))
                    }?;
                    (!rest.contains('/')).then(|| RemoteEntry {
                        name: rest.to_string(),
                    })
                })
                .collect())
        })
    }

    async fn get(&mut self, remote_path: &str, local_path: &Path) -> Result<(), CollaboratorError> {
        let content = self.read(remote_path).await?;
        std::fs::write(local_path, content)?;
        Ok(())
    }

    async fn read(&mut self, remote_path: &str) -> Result<Vec<u8>, CollaboratorError> {
        self.with(|h| {
            if h.fail_get.contains(remote_path) {
                return Err(format!("read of {remote_path} interrupted").into());
            }
            h.files
                .get(remote_path)
                .cloned()
                .ok_or_else(|| format!("no such file: {remote_path}").into())
        })
    }

    async fn put(&mut self, content: Vec<u8>, remote_path: &str) -> Result<(), CollaboratorError> {
        self.with(|h| {
            h.files.insert(remote_path.to_string(), content);
            Ok(())
        })
    }

    async fn ensure_dir(&mut self, path: &str) -> Result<(), CollaboratorError> {
        self.with(|h| {
            h.dirs.insert(path.to_string());
            Ok(())
        })
    }

    async fn delete(&mut self, remote_path: &str) -> Result<(), CollaboratorError> {
        self.with(|h| {
            h.files.remove(remote_path);
            h.deleted.push(remote_path.to_string());
            Ok(())
        })
    }

    async fn end(&mut self) -> Result<(), CollaboratorError> {
        if self.host.is_some() {
            self.with(|h| {
                h.closed += 1;
                Ok(())
            })?;
        }
        self.host = None;
        Ok(())
    }
}

/// Object store held in memory, keyed by `{container}/{path}`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    blobs: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn insert(&self, container: &str, path: &str, content: &str) {
        self.blobs
            .lock()
            .unwrap()
            .insert(format!("{container}/{path}"), content.as_bytes().to_vec());
    }

    pub fn text(&self, container: &str, path: &str) -> Option<String> {
        self.blobs
            .lock()
            .unwrap()
            .get(&format!("{container}/{path}"))
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Paths (without container) under `prefix`.
    pub fn paths(&self, container: &str, prefix: &str) -> Vec<String> {
        let full = format!("{container}/{prefix}");
        self.blobs
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(&full))
            .map(|k| k[container.len() + 1..].to_string())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_with_prefix(&self, container: &str, prefix: &str) -> Result<Vec<BlobEntry>, CollaboratorError> {
        Ok(self
            .paths(container, prefix)
            .into_iter()
            .map(|name| BlobEntry { name })
            .collect())
    }

    async fn read_text(&self, container: &str, path: &str) -> Result<String, CollaboratorError> {
        self.text(container, path)
            .ok_or_else(|| format!("blob not found: {path}").into())
    }

    async fn read_bytes(&self, container: &str, path: &str) -> Result<Vec<u8>, CollaboratorError> {
        self.blobs
            .lock()
            .unwrap()
            .get(&format!("{container}/{path}"))
            .cloned()
            .ok_or_else(|| format!("blob not found: {path}").into())
    }

    async fn write_text(&self, container: &str, path: &str, content: &str) -> Result<(), CollaboratorError> {
        self.insert(container, path, content);
        Ok(())
    }

    async fn write_from_local_file(&self, container: &str, path: &str, local_path: &Path) -> Result<(), CollaboratorError> {
        let content = tokio::fs::read(local_path).await?;
        self.blobs
            .lock()
            .unwrap()
            .insert(format!("{container}/{path}"), content);
        Ok(())
    }
}

pub fn services(
    secrets: StaticSecrets,
    network: &FakeNetwork,
    store: &MemoryStore,
    trigger: MockPipelineTrigger,
) -> Services {
    Services {
        secrets: Arc::new(secrets),
        transports: Arc::new(network.clone()),
        store: Arc::new(store.clone()),
        trigger: Arc::new(trigger) as Arc<dyn PipelineTrigger>,
    }
}

/// A trigger that must never be called.
pub fn idle_trigger() -> MockPipelineTrigger {
    let mut trigger = MockPipelineTrigger::new();
    trigger.expect_create_run().never();
    trigger
}
