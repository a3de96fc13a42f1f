//! # contract: interfaces to the external collaborators
//!
//! The core never talks to a secret vault, a file server, an object store or a
//! pipeline service directly. It talks to the traits in this module, and the
//! binary crate (or a test) supplies implementations.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`, so consumers get `MockSecretResolver`,
//!   `MockTransportSession`, `MockTransportFactory`, `MockObjectStore` and
//!   `MockPipelineTrigger` with the `test-export-mocks` feature.
//!
//! ## Errors
//! - Collaborators return [`CollaboratorError`]; the core converts these into its
//!   typed errors at the call site, where the operation and path are known.
//! - [`SecretResolver::get`] never fails: a missing or unreadable secret is `None`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use serde::{Deserialize, Serialize};

pub use crate::error::CollaboratorError;

/// Connection parameters for one remote file endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub(crate) fn default_port() -> u16 {
    22
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One entry returned by a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
}

/// One blob returned by an object-store prefix listing. `name` is the full blob path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub name: String,
}

/// Result of starting a downstream pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineRun {
    pub run_id: String,
}

/// Looks up secrets (hosts, usernames, passwords, remote paths) by name.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Returns `None` when the secret does not exist or cannot be read.
    async fn get(&self, name: &str) -> Option<String>;
}

/// A single authenticated connection to one remote endpoint.
///
/// Sessions are exclusive to one sync invocation and are never shared.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TransportSession: Send {
    async fn connect(&mut self, config: &TransportConfig) -> Result<(), CollaboratorError>;

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, CollaboratorError>;

    /// Download `remote_path` into the local file `local_path`.
    async fn get(&mut self, remote_path: &str, local_path: &Path)
        -> Result<(), CollaboratorError>;

    /// Read `remote_path` fully into memory.
    async fn read(&mut self, remote_path: &str) -> Result<Vec<u8>, CollaboratorError>;

    async fn put(&mut self, content: Vec<u8>, remote_path: &str) -> Result<(), CollaboratorError>;

    /// Create `path` (recursively) unless it already exists.
    async fn ensure_dir(&mut self, path: &str) -> Result<(), CollaboratorError>;

    async fn delete(&mut self, remote_path: &str) -> Result<(), CollaboratorError>;

    /// Close the session. Calling it more than once is harmless.
    async fn end(&mut self) -> Result<(), CollaboratorError>;
}

/// Creates unconnected sessions; one per connection attempt.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn TransportSession>;
}

/// Blob storage for raw and split EDI files. Single blob writes overwrite.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_with_prefix(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<BlobEntry>, CollaboratorError>;

    async fn read_text(&self, container: &str, path: &str) -> Result<String, CollaboratorError>;

    async fn read_bytes(&self, container: &str, path: &str) -> Result<Vec<u8>, CollaboratorError>;

    async fn write_text(
        &self,
        container: &str,
        path: &str,
        content: &str,
    ) -> Result<(), CollaboratorError>;

    async fn write_from_local_file(
        &self,
        container: &str,
        path: &str,
        local_path: &Path,
    ) -> Result<(), CollaboratorError>;
}

/// Starts runs of the downstream data pipeline.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PipelineTrigger: Send + Sync {
    async fn create_run(
        &self,
        resource_group: &str,
        factory: &str,
        pipeline_name: &str,
        parameters: serde_json::Value,
    ) -> Result<PipelineRun, CollaboratorError>;
}

/// Process-scoped collaborator handles, built once at startup and passed by reference.
#[derive(Clone)]
pub struct Services {
    pub secrets: Arc<dyn SecretResolver>,
    pub transports: Arc<dyn TransportFactory>,
    pub store: Arc<dyn ObjectStore>,
    pub trigger: Arc<dyn PipelineTrigger>,
}
