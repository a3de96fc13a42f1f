//! Relay: copy files straight from one remote endpoint to another.
//!
//! Both sessions are opened through the retry wrapper and closed on every path.
//! Errors propagate; there is no per-file aggregation here.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DocumentSettings, DocumentType, RelayDescriptor, RetryPolicy};
use crate::contract::{SecretResolver, Services, TransportConfig, TransportSession};
use crate::error::{SyncError, TransferError, TransferOp};
use crate::retry::establish;
use crate::sync_engine::{
    can_read_file, is_plain_file_name, remote_join, resolve_credentials, secret_or_empty,
};

/// Credentials stored as `{prefix}-sftp-hostname`, `-username` and `-password`.
pub async fn credentials_for_prefix(
    secrets: &dyn SecretResolver,
    prefix: &str,
) -> Result<TransportConfig, SyncError> {
    resolve_credentials(
        secrets,
        &format!("{prefix}-sftp-hostname"),
        &format!("{prefix}-sftp-username"),
        &format!("{prefix}-sftp-password"),
        crate::contract::default_port(),
    )
    .await
}

/// Copy every accepted file of `document_type` from the relay's source to its
/// destination. Returns `None` when the document type is not enabled.
pub async fn relay_files(
    services: &Services,
    relay: &RelayDescriptor,
    document_type: DocumentType,
    retry: &RetryPolicy,
    deadline: Option<Instant>,
) -> Result<Option<Vec<String>>, SyncError> {
    let Some(settings) = relay.documents.get(&document_type).filter(|s| s.enabled) else {
        info!(relay = %relay.name, document_type = %document_type, "[RELAY] Not enabled, skipping");
        return Ok(None);
    };
    info!(relay = %relay.name, document_type = %document_type, "[RELAY] Reading files from source");

    let secrets = services.secrets.as_ref();
    let source_config = credentials_for_prefix(secrets, &relay.source_prefix).await?;
    let destination_config = credentials_for_prefix(secrets, &relay.destination_prefix).await?;

    let mut source = establish(services.transports.as_ref(), &source_config, retry, deadline).await?;
    let outcome = match establish(
        services.transports.as_ref(),
        &destination_config,
        retry,
        deadline,
    )
    .await
    {
        Ok(mut destination) => {
            let copied = copy_across(secrets, settings, source.as_mut(), destination.as_mut()).await;
            close(destination.as_mut(), &relay.name).await;
            copied
        }
        Err(e) => Err(e),
    };
    close(source.as_mut(), &relay.name).await;

    let names = outcome?;
    info!(relay = %relay.name, files_read = names.len(), "[RELAY] No. of files relayed");
    Ok(Some(names))
}

async fn copy_across(
    secrets: &dyn SecretResolver,
    settings: &DocumentSettings,
    source: &mut dyn TransportSession,
    destination: &mut dyn TransportSession,
) -> Result<Vec<String>, SyncError> {
    let source_path = secret_or_empty(secrets, settings.source_key.as_deref()).await;
    let destination_path = secret_or_empty(secrets, settings.destination_key.as_deref()).await;

    let entries = source
        .list(&source_path)
        .await
        .map_err(|e| TransferError::new(TransferOp::List, &source_path, e))?;

    let mut copied = Vec::new();
    for entry in entries {
        if !is_plain_file_name(&entry.name) {
            warn!(file = %entry.name, "[RELAY][WARN] Skipping remote entry that is not a plain file name");
            continue;
        }
        if !can_read_file(&entry.name, settings.file_format.as_deref()) {
            debug!(file = %entry.name, "[RELAY] Skipping file with unexpected format");
            continue;
        }
        let from = remote_join(&source_path, &entry.name);
        let content = source
            .read(&from)
            .await
            .map_err(|e| TransferError::new(TransferOp::Download, &from, e))?;
        let to = remote_join(&destination_path, &entry.name);
        destination
            .put(content, &to)
            .await
            .map_err(|e| TransferError::new(TransferOp::Upload, &to, e))?;
        if settings.delete_after_read {
            source
                .delete(&from)
                .await
                .map_err(|e| TransferError::new(TransferOp::Delete, &from, e))?;
        }
        debug!(from = %from, to = %to, "[RELAY] File relayed");
        copied.push(entry.name);
    }
    Ok(copied)
}

async fn close(session: &mut dyn TransportSession, relay: &str) {
    if let Err(e) = session.end().await {
        warn!(relay, error = %e, "[RELAY] Failed to close session");
    }
}
