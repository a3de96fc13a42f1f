//! Outbound 837 push: deliver generated claim files from the object store to
//! clearing houses.
//!
//! Each clearing house gets its own session. Files for a run are listed under
//! `{outbound_root}/{batch}/{run}/{clearing_house}/` and uploaded into a
//! per-batch directory on the clearing house side. Unlike the inbound sync there is
//! no aggregation: the first error is returned once every clearing house finished.

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::{AppConfig, DocumentType};
use crate::contract::{Services, TransportSession};
use crate::error::{SyncError, TransferError, TransferOp};
use crate::retry::establish;
use crate::sync_engine::{remote_join, resolve_credentials, secret_or_empty};

/// Remote directory prefix the clearing house expects for a batch.
pub const BATCH_DIRECTORY_PREFIX: &str = "Waystar";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReport {
    pub clearing_house: String,
    /// `None` when 837 is not enabled for the clearing house.
    pub files_sent: Option<usize>,
}

/// Push the run's 837 files to every named clearing house concurrently.
pub async fn send_837_files(
    services: &Services,
    config: &AppConfig,
    run_id: &str,
    batch_id: &str,
    clearing_houses: &[String],
    deadline: Option<Instant>,
) -> Result<Vec<OutboundReport>, SyncError> {
    info!(run_id, batch_id, ?clearing_houses, "[OUTBOUND] Sending 837 files");
    let sends = clearing_houses.iter().map(|name| {
        let name = name.trim().to_lowercase();
        async move {
            let sent = send_to_clearing_house(services, config, run_id, batch_id, &name, deadline).await;
            (name, sent)
        }
    });

    let mut reports = Vec::with_capacity(clearing_houses.len());
    let mut first_error = None;
    for (clearing_house, sent) in join_all(sends).await {
        match sent {
            Ok(files_sent) => reports.push(OutboundReport {
                clearing_house,
                files_sent,
            }),
            Err(e) => {
                error!(clearing_house = %clearing_house, error = %e, "[OUTBOUND][ERROR] Send failed");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(reports),
    }
}

async fn send_to_clearing_house(
    services: &Services,
    config: &AppConfig,
    run_id: &str,
    batch_id: &str,
    clearing_house: &str,
    deadline: Option<Instant>,
) -> Result<Option<usize>, SyncError> {
    let descriptor = config
        .connection(clearing_house)
        .ok_or_else(|| SyncError::Config(format!("unknown clearing house '{clearing_house}'")))?;
    let Some(settings) = descriptor
        .settings(DocumentType::Edi837)
        .filter(|s| s.enabled)
    else {
        info!(clearing_house, "[OUTBOUND] 837 not enabled");
        return Ok(None);
    };

    info!(clearing_house, "[OUTBOUND] Sending files to clearing house");
    let secrets = services.secrets.as_ref();
    let transport_config = resolve_credentials(
        secrets,
        &descriptor.host_key,
        &descriptor.username_key,
        &descriptor.password_key,
        descriptor.port,
    )
    .await?;
    let destination_root = secret_or_empty(secrets, settings.destination_key.as_deref()).await;

    let mut session = establish(
        services.transports.as_ref(),
        &transport_config,
        &config.retry,
        deadline,
    )
    .await?;
    let outcome = push_blobs(
        services,
        session.as_mut(),
        &config.container,
        &format!(
            "{}/{batch_id}/{run_id}/{clearing_house}/",
            config.outbound_837_path
        ),
        &remote_join(
            &destination_root,
            &format!("{BATCH_DIRECTORY_PREFIX}{batch_id}"),
        ),
    )
    .await;
    if let Err(e) = session.end().await {
        debug!(clearing_house, error = %e, "[OUTBOUND] Failed to close session");
    }
    outcome.map(Some)
}

async fn push_blobs(
    services: &Services,
    session: &mut dyn TransportSession,
    container: &str,
    blob_prefix: &str,
    remote_dir: &str,
) -> Result<usize, SyncError> {
    let blobs = services
        .store
        .list_with_prefix(container, blob_prefix)
        .await
        .map_err(|e| TransferError::new(TransferOp::List, blob_prefix, e))?;
    info!(prefix = blob_prefix, files = blobs.len(), "[OUTBOUND] Total files available to send");

    session
        .ensure_dir(remote_dir)
        .await
        .map_err(|e| TransferError::new(TransferOp::MakeDir, remote_dir, e))?;

    for blob in &blobs {
        let file_name = blob.name.rsplit('/').next().unwrap_or(&blob.name);
        let content = services
            .store
            .read_bytes(container, &blob.name)
            .await
            .map_err(|e| TransferError::new(TransferOp::Read, &blob.name, e))?;
        let remote_path = remote_join(remote_dir, file_name);
        session
            .put(content, &remote_path)
            .await
            .map_err(|e| TransferError::new(TransferOp::Upload, &remote_path, e))?;
        debug!(blob = %blob.name, remote = %remote_path, "[OUTBOUND] Uploaded blob");
    }
    Ok(blobs.len())
}
