use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contract::default_port;

/// EDI document types handled by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(rename = "277")]
    Edi277,
    #[serde(rename = "835")]
    Edi835,
    #[serde(rename = "manual_835")]
    Manual835,
    #[serde(rename = "837")]
    Edi837,
    #[serde(rename = "999")]
    Edi999,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Edi277 => "277",
            DocumentType::Edi835 => "835",
            DocumentType::Manual835 => "manual_835",
            DocumentType::Edi837 => "837",
            DocumentType::Edi999 => "999",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "277" => Ok(DocumentType::Edi277),
            "835" => Ok(DocumentType::Edi835),
            "manual_835" => Ok(DocumentType::Manual835),
            "837" => Ok(DocumentType::Edi837),
            "999" => Ok(DocumentType::Edi999),
            other => Err(format!("unknown document type: {other}")),
        }
    }
}

/// Per-document-type settings of one remote endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Secret holding the remote directory to read from.
    #[serde(default)]
    pub source_key: Option<String>,
    /// Secret holding the remote directory to write to (relay and outbound only).
    #[serde(default)]
    pub destination_key: Option<String>,
    /// Object-store path template; `{0}` is the batch id and `{1}` the run id.
    #[serde(default)]
    pub storage_destination: String,
    /// Expected file extension, e.g. `.835`. Empty accepts every file.
    #[serde(default)]
    pub file_format: Option<String>,
    #[serde(default)]
    pub delete_after_read: bool,
}

/// Static configuration of one remote endpoint. Holds secret names, never secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub name: String,
    pub host_key: String,
    pub username_key: String,
    pub password_key: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub documents: HashMap<DocumentType, DocumentSettings>,
}

impl ConnectionDescriptor {
    pub fn settings(&self, document_type: DocumentType) -> Option<&DocumentSettings> {
        self.documents.get(&document_type)
    }

    /// A missing document entry counts as disabled.
    pub fn is_enabled(&self, document_type: DocumentType) -> bool {
        self.settings(document_type).is_some_and(|s| s.enabled)
    }
}

/// Secret names for a set of transport credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialKeys {
    pub host_key: String,
    pub username_key: String,
    pub password_key: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// An endpoint-to-endpoint copy. Credentials are read from
/// `{prefix}-sftp-hostname`, `{prefix}-sftp-username` and `{prefix}-sftp-password`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayDescriptor {
    pub name: String,
    pub source_prefix: String,
    pub destination_prefix: String,
    #[serde(default)]
    pub documents: HashMap<DocumentType, DocumentSettings>,
}

/// Where downstream pipelines live and which one serves each document type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub resource_group: String,
    pub factory: String,
    #[serde(default)]
    pub names: HashMap<DocumentType, String>,
}

/// Bounded exponential backoff for connection establishment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            multiplier: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor))
    }
}

/// The full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub tenant_id: String,
    pub container: String,
    /// Root of the 835 batches: raw files under `{root}/{batch}/{run}/sftp/`,
    /// split files under `{root}/{batch}/{run}/input/`.
    #[serde(default)]
    pub storage_835_destination_path: String,
    /// Root of generated 837 files: `{root}/{batch}/{run}/{clearing_house}/`.
    #[serde(default)]
    pub outbound_837_path: String,
    #[serde(default)]
    pub connections: Vec<ConnectionDescriptor>,
    #[serde(default)]
    pub relays: Vec<RelayDescriptor>,
    /// Credentials used for every connection when syncing manual remittances.
    #[serde(default)]
    pub manual_remittance: Option<CredentialKeys>,
    #[serde(default)]
    pub pipelines: PipelineSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Scratch area for downloads; the system temp dir when unset.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn connection(&self, name: &str) -> Option<&ConnectionDescriptor> {
        self.connections.iter().find(|c| c.name == name)
    }

    pub fn relay(&self, name: &str) -> Option<&RelayDescriptor> {
        self.relays.iter().find(|r| r.name == name)
    }

    pub fn trace_loaded(&self) {
        info!(
            tenant_id = %self.tenant_id,
            container = %self.container,
            connections = self.connections.len(),
            relays = self.relays.len(),
            "Loaded AppConfig"
        );
        debug!(?self, "AppConfig loaded (full debug)");
    }
}
