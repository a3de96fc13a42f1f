//! Endpoint sync: copy one connection's EDI files from its remote endpoint into the
//! object store.
//!
//! For one named connection and document type the engine:
//!   - connects through the retry wrapper ([`crate::retry::establish`])
//!   - lists the configured source directory and filters by file extension
//!   - for each accepted file: download to scratch, upload to the store,
//!     optionally delete the remote original, remove the scratch copy
//!   - always closes the session
//!
//! # Error Handling
//! [`sync_connection`] never returns an error: failures are captured in the
//! [`RunResult`] with the counts observed so far. [`transfer_files`] is the older,
//! non-aggregating path and propagates errors to the caller instead.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{ConnectionDescriptor, CredentialKeys, DocumentSettings, DocumentType, RetryPolicy};
use crate::contract::{SecretResolver, Services, TransportConfig, TransportSession};
use crate::error::{SyncError, TransferError, TransferOp};
use crate::retry::establish;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    NotEnabled,
    Success,
    Failure,
}

/// Outcome of one connection's sync for one document type.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub connection_name: String,
    pub status: RunStatus,
    /// Files listed remotely that passed the extension filter.
    pub files_count: usize,
    /// Accepted files whose transfer completed.
    pub file_read_so_far: usize,
    /// Files listed remotely that the extension filter rejected.
    pub files_skipped: usize,
    pub error: Option<SyncError>,
}

impl RunResult {
    fn new(connection_name: &str, status: RunStatus) -> Self {
        Self {
            connection_name: connection_name.to_string(),
            status,
            files_count: 0,
            file_read_so_far: 0,
            files_skipped: 0,
            error: None,
        }
    }

    pub fn not_enabled(connection_name: &str) -> Self {
        Self::new(connection_name, RunStatus::NotEnabled)
    }
}

/// Everything that scopes one sync: who, what, and where the files land.
#[derive(Debug, Clone)]
pub struct SyncRequest<'a> {
    pub container: &'a str,
    pub document_type: DocumentType,
    pub batch_id: &'a str,
    pub run_id: &'a str,
    /// Connection parameters that replace the descriptor's own credentials.
    pub connection_override: Option<&'a TransportConfig>,
    pub retry: RetryPolicy,
    pub scratch_dir: Option<&'a Path>,
    pub deadline: Option<Instant>,
}

/// True when `file_format` is unset/empty or `file_name` ends with it, ignoring case.
pub fn can_read_file(file_name: &str, file_format: Option<&str>) -> bool {
    match file_format {
        None | Some("") => true,
        Some(format) => file_name
            .to_lowercase()
            .ends_with(&format.to_lowercase()),
    }
}

/// True for a bare file name that stays inside whatever directory it is joined to.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Substitute positional `{N}` placeholders; unknown indices are left untouched.
pub fn format_template(template: &str, values: &[&str]) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| Regex::new(r"\{(\d+)\}").expect("static regex"));
    re.replace_all(template, |caps: &regex::Captures<'_>| {
        caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|i| values.get(i))
            .map(|v| v.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

/// Join a remote directory and a file name with `/`; an empty directory yields the bare name.
pub fn remote_join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Resolve transport credentials from secret names.
pub async fn resolve_credentials(
    secrets: &dyn SecretResolver,
    host_key: &str,
    username_key: &str,
    password_key: &str,
    port: u16,
) -> Result<TransportConfig, SyncError> {
    let host = secrets
        .get(host_key)
        .await
        .ok_or_else(|| SyncError::Config(format!("secret '{host_key}' not found")))?;
    Ok(TransportConfig {
        host,
        port,
        username: secrets.get(username_key).await,
        password: secrets.get(password_key).await,
    })
}

pub async fn resolve_credential_keys(
    secrets: &dyn SecretResolver,
    keys: &CredentialKeys,
) -> Result<TransportConfig, SyncError> {
    resolve_credentials(
        secrets,
        &keys.host_key,
        &keys.username_key,
        &keys.password_key,
        keys.port,
    )
    .await
}

/// Counters and names collected while a connection's files are copied.
#[derive(Debug, Default)]
struct Progress {
    files_count: usize,
    files_skipped: usize,
    transferred: Vec<String>,
}

impl Progress {
    fn apply_to(&self, result: &mut RunResult) {
        result.files_count = self.files_count;
        result.files_skipped = self.files_skipped;
        result.file_read_so_far = self.transferred.len();
    }
}

/// Sync one connection. Never fails; see [`RunResult`].
pub async fn sync_connection(
    services: &Services,
    descriptor: &ConnectionDescriptor,
    request: &SyncRequest<'_>,
) -> RunResult {
    let name = descriptor.name.as_str();
    let settings = match descriptor.settings(request.document_type) {
        Some(s) if s.enabled => s,
        _ => {
            info!(connection = name, document_type = %request.document_type, "[SYNC] Not enabled, skipping");
            return RunResult::not_enabled(name);
        }
    };

    info!(connection = name, document_type = %request.document_type, "[SYNC] Reading files from endpoint");
    let mut progress = Progress::default();
    let outcome = run_with_session(services, descriptor, settings, request, &mut progress).await;

    let mut result = RunResult::new(name, RunStatus::Success);
    progress.apply_to(&mut result);
    match outcome {
        Ok(()) => {
            info!(
                connection = name,
                files_read = result.file_read_so_far,
                "[SYNC] Endpoint sync complete"
            );
        }
        Err(e) => {
            error!(
                connection = name,
                error = %e,
                files_count = result.files_count,
                files_read = result.file_read_so_far,
                "[SYNC][ERROR] Endpoint sync failed"
            );
            result.status = RunStatus::Failure;
            result.error = Some(e);
        }
    }
    result
}

/// Non-aggregating variant of [`sync_connection`].
///
/// Returns the transferred file names, or `None` when the document type is not
/// enabled for this connection. Any failure is returned as an error.
pub async fn transfer_files(
    services: &Services,
    descriptor: &ConnectionDescriptor,
    request: &SyncRequest<'_>,
) -> Result<Option<Vec<String>>, SyncError> {
    let settings = match descriptor.settings(request.document_type) {
        Some(s) if s.enabled => s,
        _ => {
            info!(connection = %descriptor.name, document_type = %request.document_type, "[SYNC] Not enabled, skipping");
            return Ok(None);
        }
    };

    let mut progress = Progress::default();
    run_with_session(services, descriptor, settings, request, &mut progress).await?;
    info!(
        connection = %descriptor.name,
        files_read = progress.transferred.len(),
        "[SYNC] No. of files read"
    );
    Ok(Some(progress.transferred))
}

/// Runs the copy and closes the session on every path, including early failures.
async fn run_with_session(
    services: &Services,
    descriptor: &ConnectionDescriptor,
    settings: &DocumentSettings,
    request: &SyncRequest<'_>,
    progress: &mut Progress,
) -> Result<(), SyncError> {
    let mut session: Option<Box<dyn TransportSession>> = None;
    let outcome = copy_from_endpoint(
        services,
        descriptor,
        settings,
        request,
        &mut session,
        progress,
    )
    .await;

    if let Some(mut s) = session {
        if let Err(e) = s.end().await {
            warn!(connection = %descriptor.name, error = %e, "[SYNC] Failed to close session");
        }
    }
    outcome
}

async fn copy_from_endpoint(
    services: &Services,
    descriptor: &ConnectionDescriptor,
    settings: &DocumentSettings,
    request: &SyncRequest<'_>,
    session_slot: &mut Option<Box<dyn TransportSession>>,
    progress: &mut Progress,
) -> Result<(), SyncError> {
    let transport_config = match request.connection_override {
        Some(c) => c.clone(),
        None => {
            resolve_credentials(
                services.secrets.as_ref(),
                &descriptor.host_key,
                &descriptor.username_key,
                &descriptor.password_key,
                descriptor.port,
            )
            .await?
        }
    };

    let session = session_slot.insert(
        establish(
            services.transports.as_ref(),
            &transport_config,
            &request.retry,
            request.deadline,
        )
        .await?,
    );

    let source = secret_or_empty(services.secrets.as_ref(), settings.source_key.as_deref()).await;
    let entries = session
        .list(&source)
        .await
        .map_err(|e| TransferError::new(TransferOp::List, &source, e))?;

    let file_format = settings.file_format.as_deref();
    let mut accepted = Vec::with_capacity(entries.len());
    for entry in entries {
        if !is_plain_file_name(&entry.name) {
            warn!(file = %entry.name, "[SYNC][WARN] Skipping remote entry that is not a plain file name");
            progress.files_skipped += 1;
        } else if can_read_file(&entry.name, file_format) {
            accepted.push(entry.name);
        } else {
            debug!(file = %entry.name, ?file_format, "[SYNC] Skipping file with unexpected format");
            progress.files_skipped += 1;
        }
    }
    progress.files_count = accepted.len();
    info!(
        connection = %descriptor.name,
        source = %source,
        accepted = progress.files_count,
        skipped = progress.files_skipped,
        "[SYNC] Listed remote files"
    );

    let destination = format_template(
        &settings.storage_destination,
        &[request.batch_id, request.run_id],
    );
    let scratch = scratch_dir(request.scratch_dir)?;

    for file_name in accepted {
        copy_file(
            services,
            session.as_mut(),
            request.container,
            &file_name,
            &source,
            &destination,
            scratch.path(),
            settings.delete_after_read,
        )
        .await?;
        progress.transferred.push(file_name);
    }
    Ok(())
}

/// A secret-held remote path; missing keys and missing secrets both mean "".
pub(crate) async fn secret_or_empty(secrets: &dyn SecretResolver, key: Option<&str>) -> String {
    match key {
        Some(key) => secrets.get(key).await.unwrap_or_default(),
        None => String::new(),
    }
}

fn scratch_dir(base: Option<&Path>) -> Result<tempfile::TempDir, SyncError> {
    let dir = match base {
        Some(base) => tempfile::tempdir_in(base),
        None => tempfile::tempdir(),
    };
    dir.map_err(|e| SyncError::Scratch(e.to_string()))
}

/// Download → upload → optional remote delete → scratch cleanup, strictly in order.
#[allow(clippy::too_many_arguments)]
async fn copy_file(
    services: &Services,
    session: &mut dyn TransportSession,
    container: &str,
    file_name: &str,
    source: &str,
    destination: &str,
    scratch: &Path,
    delete_after_read: bool,
) -> Result<(), SyncError> {
    let remote_path = remote_join(source, file_name);
    let local_path: PathBuf = scratch.join(file_name);

    session
        .get(&remote_path, &local_path)
        .await
        .map_err(|e| TransferError::new(TransferOp::Download, &remote_path, e))?;
    debug!(file = file_name, "[SYNC] File downloaded");

    let blob_path = remote_join(destination, file_name);
    services
        .store
        .write_from_local_file(container, &blob_path, &local_path)
        .await
        .map_err(|e| TransferError::new(TransferOp::Upload, &blob_path, e))?;
    debug!(file = file_name, blob = %blob_path, "[SYNC] File uploaded to object store");

    if delete_after_read {
        session
            .delete(&remote_path)
            .await
            .map_err(|e| TransferError::new(TransferOp::Delete, &remote_path, e))?;
        debug!(remote = %remote_path, "[SYNC] File deleted from endpoint");
    }

    if let Err(e) = tokio::fs::remove_file(&local_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(TransferError::new(
                TransferOp::Cleanup,
                local_path.display().to_string(),
                e,
            )
            .into());
        }
    }
    debug!(local = %local_path.display(), "[SYNC] Scratch copy removed");
    Ok(())
}
