//! Per-document-type entry point: sync, split (835 only), trigger, validate.
//!
//! One generic pipeline serves 277, 835 (automatic and manual remittance) and 999.
//! What differs per type is data: which document settings are read, whether the
//! raw files are split, and the key casing of the trigger payload.

use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::{AppConfig, DocumentType};
use crate::contract::{PipelineRun, Services};
use crate::error::PipelineError;
use crate::fleet::{sync_all, validate_run_status, FleetResult};
use crate::split::split_835_batch;
use crate::sync_engine::{resolve_credential_keys, SyncRequest};

/// Key casing of the trigger payload. Downstream pipelines depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadCasing {
    /// `tenantId`, `batchId`, `runId`
    Camel,
    /// `tenant_id`, `batch_id`, `run_id`
    Snake,
}

/// The per-type shape of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentPipeline {
    /// Document settings read during sync.
    pub sync_type: DocumentType,
    /// Pipeline that is triggered.
    pub trigger_type: DocumentType,
    pub split: bool,
    pub casing: PayloadCasing,
}

impl DocumentPipeline {
    pub fn for_type(document_type: DocumentType, manual: bool) -> Result<Self, PipelineError> {
        let pipeline = match (document_type, manual) {
            (DocumentType::Edi835, false) => Self {
                sync_type: DocumentType::Edi835,
                trigger_type: DocumentType::Edi835,
                split: true,
                casing: PayloadCasing::Camel,
            },
            (DocumentType::Edi835, true) | (DocumentType::Manual835, _) => Self {
                sync_type: DocumentType::Manual835,
                trigger_type: DocumentType::Edi835,
                split: true,
                casing: PayloadCasing::Camel,
            },
            (DocumentType::Edi277 | DocumentType::Edi999, false) => Self {
                sync_type: document_type,
                trigger_type: document_type,
                split: false,
                casing: PayloadCasing::Snake,
            },
            (other, _) => {
                return Err(PipelineError::Config(format!(
                    "no inbound pipeline for document type {other}{}",
                    if manual { " (manual)" } else { "" }
                )))
            }
        };
        Ok(pipeline)
    }

    pub fn is_manual(&self) -> bool {
        self.sync_type == DocumentType::Manual835
    }

    pub fn payload(&self, tenant_id: &str, batch_id: &str, run_id: &str) -> serde_json::Value {
        match self.casing {
            PayloadCasing::Camel => json!({
                "tenantId": tenant_id,
                "batchId": batch_id,
                "runId": run_id,
            }),
            PayloadCasing::Snake => json!({
                "tenant_id": tenant_id,
                "batch_id": batch_id,
                "run_id": run_id,
            }),
        }
    }
}

/// Caller input. Absent tokens are generated.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub document_type: DocumentType,
    pub run_id: Option<String>,
    pub batch_id: Option<String>,
    pub manual: bool,
    /// Bounds connection establishment for the whole run.
    pub timeout: Option<Duration>,
}

impl RunRequest {
    pub fn new(document_type: DocumentType) -> Self {
        Self {
            document_type,
            run_id: None,
            batch_id: None,
            manual: false,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub batch_id: String,
    pub run_id: String,
    pub fleet: FleetResult,
    pub split_outputs: usize,
    pub triggered: Option<PipelineRun>,
}

/// A fresh random run token.
pub fn generate_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Today's local date as `YYYYMMDD`.
pub fn generate_batch_id() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

/// Run one document type end to end.
///
/// A supplied run id skips the sync phase and re-runs only split and trigger for
/// that batch. Validation always runs last, so a partial failure still triggers the
/// downstream pipeline for the files that did arrive, and a split or trigger
/// failure never hides failed connections. When more than one phase fails the
/// error is [`PipelineError::Multiple`], validation first.
pub async fn run_document_pipeline(
    services: &Services,
    config: &AppConfig,
    request: RunRequest,
) -> Result<RunOutcome, PipelineError> {
    let pipeline = DocumentPipeline::for_type(request.document_type, request.manual)?;
    let skip_sync = request.run_id.is_some();
    let run_id = request.run_id.unwrap_or_else(generate_run_id);
    let batch_id = request.batch_id.unwrap_or_else(generate_batch_id);
    info!(run_id = %run_id, batch_id = %batch_id, document_type = %pipeline.sync_type, "[PIPELINE] Starting run");

    let fleet = if skip_sync {
        info!(run_id = %run_id, "[PIPELINE] Run id supplied, skipping sync");
        FleetResult::assumed_available()
    } else {
        let manual_connection = if pipeline.is_manual() {
            let keys = config.manual_remittance.as_ref().ok_or_else(|| {
                PipelineError::Config("manual remittance credentials are not configured".into())
            })?;
            Some(resolve_credential_keys(services.secrets.as_ref(), keys).await?)
        } else {
            None
        };
        let sync_request = SyncRequest {
            container: &config.container,
            document_type: pipeline.sync_type,
            batch_id: &batch_id,
            run_id: &run_id,
            connection_override: manual_connection.as_ref(),
            retry: config.retry,
            scratch_dir: config.scratch_dir.as_deref(),
            deadline: request.timeout.and_then(|t| Instant::now().checked_add(t)),
        };
        sync_all(services, &config.connections, &sync_request).await
    };

    info!(summary = %fleet.summary(), "[PIPELINE] Connection summary");

    let mut split_outputs = 0;
    let mut triggered = None;
    let mut downstream = Vec::new();
    if fleet.is_file_available {
        let mut nothing_to_trigger = false;
        if pipeline.split {
            match split_835_batch(
                services,
                &config.container,
                &config.storage_835_destination_path,
                &batch_id,
                &run_id,
                pipeline.is_manual(),
            )
            .await
            {
                Ok(report) => {
                    split_outputs = report.outputs;
                    if !report.failures.is_empty() {
                        nothing_to_trigger = report.outputs == 0;
                        downstream.push(PipelineError::SplitBatch(report.failures));
                    }
                }
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "[PIPELINE][ERROR] Split failed");
                    nothing_to_trigger = true;
                    downstream.push(e);
                }
            }
        }
        if nothing_to_trigger {
            warn!(run_id = %run_id, "[PIPELINE][WARN] No split output written, not triggering");
        } else {
            info!(batch_id = %batch_id, run_id = %run_id, "[PIPELINE] Triggering pipeline");
            match trigger(services, config, &pipeline, &batch_id, &run_id).await {
                Ok(run) => triggered = Some(run),
                Err(e) => downstream.push(e),
            }
        }
    } else {
        info!(document_type = %pipeline.sync_type, "[PIPELINE] No files available, nothing to trigger");
    }

    let mut failures = Vec::new();
    if let Err(aggregate) = validate_run_status(&fleet) {
        failures.push(PipelineError::Aggregate(aggregate));
    }
    failures.extend(downstream);
    if failures.len() > 1 {
        return Err(PipelineError::Multiple(failures));
    }
    if let Some(failure) = failures.pop() {
        return Err(failure);
    }

    Ok(RunOutcome {
        batch_id,
        run_id,
        fleet,
        split_outputs,
        triggered,
    })
}

async fn trigger(
    services: &Services,
    config: &AppConfig,
    pipeline: &DocumentPipeline,
    batch_id: &str,
    run_id: &str,
) -> Result<PipelineRun, PipelineError> {
    let document_type = pipeline.trigger_type;
    let name = config.pipelines.names.get(&document_type).ok_or_else(|| {
        PipelineError::Config(format!("no pipeline configured for {document_type}"))
    })?;
    let payload = pipeline.payload(&config.tenant_id, batch_id, run_id);
    let run = services
        .trigger
        .create_run(
            &config.pipelines.resource_group,
            &config.pipelines.factory,
            name,
            payload,
        )
        .await
        .map_err(|e| {
            error!(document_type = %document_type, error = %e, "[PIPELINE][ERROR] Trigger failed");
            PipelineError::Trigger {
                document_type: document_type.to_string(),
                message: e.to_string(),
            }
        })?;
    info!(document_type = %document_type, pipeline_run_id = %run.run_id, "[PIPELINE] Pipeline run created");
    Ok(run)
}
