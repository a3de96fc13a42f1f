//! Command-line surface of edi-sync.
//!
//! Each subcommand loads the YAML config, builds the collaborator adapters once
//! and hands over to `edi-sync-core`. No business logic lives here.
//!
//! - `run`: sync, split and trigger one inbound document type.
//! - `send837`: push generated 837 claim files to clearing houses.
//! - `relay`: copy files from one endpoint straight to another.
//! - `fetch`: copy one connection's files into the object store, no trigger.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use edi_sync_core::config::DocumentType;
use edi_sync_core::outbound::send_837_files;
use edi_sync_core::pipeline::{generate_batch_id, generate_run_id, run_document_pipeline, RunRequest};
use edi_sync_core::relay::relay_files;
use edi_sync_core::sync_engine::{transfer_files, SyncRequest};
use tokio::time::Instant;
use tracing::{error, info};

use crate::adapters::build_services;
use crate::load_config::load_config;

/// Moves EDI files between trading-partner endpoints and the object store.
#[derive(Parser)]
#[clap(
    name = "edi-sync",
    version,
    about = "Sync EDI files from clearing-house endpoints, split remittances and trigger downstream pipelines"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync one document type from every connection, split 835s and trigger the pipeline
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// 277, 835 or 999
        #[clap(long)]
        doc_type: DocumentType,
        /// Re-process an existing run; skips the sync
        #[clap(long)]
        run_id: Option<String>,
        /// Batch id (YYYYMMDD); today when omitted
        #[clap(long)]
        batch_id: Option<String>,
        /// Sync manual remittances (835 only)
        #[clap(long)]
        manual: bool,
        /// Upper bound on connection establishment, in seconds
        #[clap(long)]
        timeout_secs: Option<u64>,
    },
    /// Upload a run's generated 837 files to the named clearing houses
    #[clap(name = "send837")]
    Send837 {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        sync_id: String,
        #[clap(long)]
        sync_batch_id: String,
        /// Comma separated clearing house names
        #[clap(long, value_delimiter = ',', required = true)]
        clearing_houses: Vec<String>,
        #[clap(long)]
        timeout_secs: Option<u64>,
    },
    /// Copy files of one document type between two endpoints
    Relay {
        #[clap(long)]
        config: PathBuf,
        /// Relay name from the config
        #[clap(long)]
        connection: String,
        #[clap(long)]
        doc_type: DocumentType,
    },
    /// Copy one connection's files into the object store without triggering anything
    Fetch {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        connection: String,
        #[clap(long)]
        doc_type: DocumentType,
        #[clap(long)]
        batch_id: Option<String>,
        #[clap(long)]
        run_id: Option<String>,
    },
}

/// A timeout too large to represent means no deadline.
fn deadline(timeout_secs: Option<u64>) -> Option<Instant> {
    timeout_secs.and_then(|s| Instant::now().checked_add(Duration::from_secs(s)))
}

/// Async entrypoint shared by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run {
            config,
            doc_type,
            run_id,
            batch_id,
            manual,
            timeout_secs,
        } => {
            let config = load_config(config)?;
            let services = build_services(&config.adapters);
            info!(command = "run", document_type = %doc_type, manual, "Starting document pipeline");
            let request = RunRequest {
                document_type: doc_type,
                run_id,
                batch_id,
                manual,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            match run_document_pipeline(&services, &config.sync, request).await {
                Ok(outcome) => {
                    info!(
                        command = "run",
                        batch_id = %outcome.batch_id,
                        run_id = %outcome.run_id,
                        available = outcome.fleet.is_file_available,
                        split_outputs = outcome.split_outputs,
                        pipeline_run_id = ?outcome.triggered.as_ref().map(|r| r.run_id.as_str()),
                        "Document pipeline complete"
                    );
                    Ok(())
                }
                Err(e) => {
                    error!(command = "run", error = %e, "Document pipeline failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
        Commands::Send837 {
            config,
            sync_id,
            sync_batch_id,
            clearing_houses,
            timeout_secs,
        } => {
            let config = load_config(config)?;
            let services = build_services(&config.adapters);
            let reports = send_837_files(
                &services,
                &config.sync,
                &sync_id,
                &sync_batch_id,
                &clearing_houses,
                deadline(timeout_secs),
            )
            .await
            .map_err(|e| {
                error!(command = "send837", error = %e, "Sending 837 files failed");
                anyhow::Error::new(e)
            })?;
            for report in reports {
                info!(
                    command = "send837",
                    clearing_house = %report.clearing_house,
                    files_sent = ?report.files_sent,
                    "Clearing house done"
                );
            }
            Ok(())
        }
        Commands::Relay {
            config,
            connection,
            doc_type,
        } => {
            let config = load_config(config)?;
            let relay = config
                .sync
                .relay(&connection)
                .ok_or_else(|| anyhow::anyhow!("relay '{connection}' is not configured"))?;
            let services = build_services(&config.adapters);
            let copied = relay_files(&services, relay, doc_type, &config.sync.retry, None)
                .await
                .map_err(|e| {
                    error!(command = "relay", error = %e, "Relay failed");
                    anyhow::Error::new(e)
                })?;
            info!(command = "relay", relay = %connection, files = ?copied, "Relay complete");
            Ok(())
        }
        Commands::Fetch {
            config,
            connection,
            doc_type,
            batch_id,
            run_id,
        } => {
            let config = load_config(config)?;
            let descriptor = config
                .sync
                .connection(&connection)
                .ok_or_else(|| anyhow::anyhow!("connection '{connection}' is not configured"))?;
            let services = build_services(&config.adapters);
            let batch_id = batch_id.unwrap_or_else(generate_batch_id);
            let run_id = run_id.unwrap_or_else(generate_run_id);
            let request = SyncRequest {
                container: &config.sync.container,
                document_type: doc_type,
                batch_id: &batch_id,
                run_id: &run_id,
                connection_override: None,
                retry: config.sync.retry,
                scratch_dir: config.sync.scratch_dir.as_deref(),
                deadline: None,
            };
            let transferred = transfer_files(&services, descriptor, &request)
                .await
                .map_err(|e| {
                    error!(command = "fetch", error = %e, "Fetch failed");
                    anyhow::Error::new(e)
                })?;
            info!(
                command = "fetch",
                connection = %connection,
                batch_id = %batch_id,
                run_id = %run_id,
                files = ?transferred,
                "Fetch complete"
            );
            Ok(())
        }
    }
}
