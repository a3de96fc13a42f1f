//! Fleet sync: run the endpoint sync across every configured connection for one
//! document type and aggregate the outcome.
//!
//! Connections are synced concurrently, each on its own session. A failing
//! connection never stops its siblings; the result list keeps configuration order.

use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::ConnectionDescriptor;
use crate::contract::Services;
use crate::error::AggregateError;
use crate::sync_engine::{sync_connection, RunResult, RunStatus, SyncRequest};

/// Aggregate of one document type's run across all connections.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetResult {
    /// True iff at least one successful connection transferred a file.
    pub is_file_available: bool,
    pub run_status: Vec<RunResult>,
}

impl FleetResult {
    pub fn from_results(run_status: Vec<RunResult>) -> Self {
        let is_file_available = run_status
            .iter()
            .any(|r| r.status == RunStatus::Success && r.file_read_so_far > 0);
        Self {
            is_file_available,
            run_status,
        }
    }

    /// Used when an operator re-runs only the downstream stage of an existing batch.
    pub fn assumed_available() -> Self {
        Self {
            is_file_available: true,
            run_status: Vec::new(),
        }
    }

    /// Pretty JSON of the per-connection results for the run summary log.
    pub fn summary(&self) -> String {
        serde_json::to_string_pretty(&self.run_status)
            .unwrap_or_else(|e| format!("<unserialisable summary: {e}>"))
    }
}

/// Sync every connection exactly once. Never short-circuits.
pub async fn sync_all(
    services: &Services,
    connections: &[ConnectionDescriptor],
    request: &SyncRequest<'_>,
) -> FleetResult {
    info!(
        document_type = %request.document_type,
        batch_id = request.batch_id,
        run_id = request.run_id,
        connections = connections.len(),
        "[FLEET] Syncing all connections"
    );
    let syncs = connections
        .iter()
        .map(|descriptor| sync_connection(services, descriptor, request));
    let results = join_all(syncs).await;
    let fleet = FleetResult::from_results(results);
    info!(
        document_type = %request.document_type,
        available = fleet.is_file_available,
        "[FLEET] All connections attempted"
    );
    fleet
}

/// Fail with every errored run when any connection failed.
pub fn validate_run_status(fleet: &FleetResult) -> Result<(), AggregateError> {
    let failures: Vec<RunResult> = fleet
        .run_status
        .iter()
        .filter(|r| r.error.is_some())
        .cloned()
        .collect();
    if failures.is_empty() {
        return Ok(());
    }
    for failure in &failures {
        if let Some(e) = &failure.error {
            error!(connection = %failure.connection_name, error = %e, "[FLEET][ERROR] Connection failed");
        }
    }
    warn!(failed = failures.len(), "[FLEET] Run finished with failed connections");
    Err(AggregateError { failures })
}
