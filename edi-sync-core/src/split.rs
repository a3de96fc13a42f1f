//! Interchange splitter: one 835 payload in, one output per inner transaction out.
//!
//! The header runs from the start of the payload through the `~` of the first
//! `~ST*`; the footer starts right after the `~` of the last `~GE*`. Each inner
//! transaction is an `ST*...~SE*...~` run preceded by `~`, and is emitted as
//! `header + body + footer`. Manual remittances skip all of this and only
//! normalise characters.

use std::sync::OnceLock;

use futures::future::join_all;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::contract::Services;
use crate::error::{PipelineError, SplitError, SplitFailure, TransferError, TransferOp};

pub const SPLIT_EXTENSION: &str = ".ARA";
const TRANSACTION_START: &str = "~ST*";
const GROUP_END: &str = "~GE*";

/// One file produced by the splitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutput {
    pub name: String,
    pub content: String,
}

fn transaction_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)ST\*.*?~SE\*.*?~").expect("static regex"))
}

/// Everything up to and including the `~` of the first `~ST*`; empty when absent.
pub fn header(payload: &str) -> &str {
    match payload.find(TRANSACTION_START) {
        Some(i) => &payload[..=i],
        None => "",
    }
}

/// Everything after the `~` of the last `~GE*`.
pub fn footer(payload: &str) -> Option<&str> {
    payload.rfind(GROUP_END).map(|i| &payload[i + 1..])
}

/// Inner transaction bodies in order of appearance, trimmed.
///
/// A body only counts when the `ST*` is directly preceded by `~`. The scan resumes
/// at the end of the previous body, so its closing `~` may introduce the next one.
pub fn transaction_bodies(payload: &str) -> Vec<&str> {
    let re = transaction_pattern();
    let mut bodies = Vec::new();
    let mut pos = 0;
    while pos < payload.len() {
        let Some(m) = re.find_at(payload, pos) else {
            break;
        };
        if m.start() > 0 && payload.as_bytes()[m.start() - 1] == b'~' {
            let body = m.as_str().trim();
            if !body.is_empty() {
                bodies.push(body);
            }
            pos = m.end();
        } else {
            // `ST*` is ASCII, so the next byte is a char boundary.
            pos = m.start() + 1;
        }
    }
    bodies
}

/// Split an interchange into `{stem}-{n}.ARA` outputs, `n` counting from 1.
///
/// No transactions yields no outputs. Transactions without a group-end footer is
/// a [`SplitError::MissingFooter`].
pub fn split(stem: &str, payload: &str) -> Result<Vec<SplitOutput>, SplitError> {
    let bodies = transaction_bodies(payload);
    if bodies.is_empty() {
        warn!(file = stem, "[SPLIT] No transactions found, nothing to emit");
        return Ok(Vec::new());
    }
    let head = header(payload);
    let foot = footer(payload).ok_or_else(|| SplitError::MissingFooter(stem.to_string()))?;

    Ok(bodies
        .into_iter()
        .enumerate()
        .map(|(i, body)| SplitOutput {
            name: format!("{stem}-{}{SPLIT_EXTENSION}", i + 1),
            content: format!("{head}{body}{foot}"),
        })
        .collect())
}

/// Manual remittance: drop every `\n` and `\r\n` line break and turn `>` into `:`.
///
/// A lone `\r` is not a line break here and is kept.
pub fn split_manual(stem: &str, payload: &str) -> SplitOutput {
    let content = payload
        .replace("\r\n", "")
        .replace('\n', "")
        .replace('>', ":");
    SplitOutput {
        name: format!("{stem}-M{SPLIT_EXTENSION}"),
        content,
    }
}

/// Blob base name without its extension: `a/b/remit.835` -> `remit`.
pub fn blob_stem(blob_name: &str) -> &str {
    let base = blob_name.rsplit('/').next().unwrap_or(blob_name);
    match base.rfind('.') {
        Some(i) => &base[..i],
        None => base,
    }
}

/// What a batch split produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitReport {
    /// Outputs written across all files.
    pub outputs: usize,
    /// Files that could not be split or written, in listing order.
    pub failures: Vec<SplitFailure>,
}

/// Split every raw 835 of a batch run and write the outputs next to it.
///
/// Reads `{root}/{batch}/{run}/sftp/`, writes `{root}/{batch}/{run}/input/`.
/// Files are processed concurrently and a failing file never stops the others;
/// its failure is logged and returned in the report. Only a failed listing is an
/// error.
pub async fn split_835_batch(
    services: &Services,
    container: &str,
    storage_root: &str,
    batch_id: &str,
    run_id: &str,
    manual: bool,
) -> Result<SplitReport, PipelineError> {
    info!(batch_id, run_id, manual, "[SPLIT] Splitting 835 files");
    let source_prefix = format!("{storage_root}/{batch_id}/{run_id}/sftp/");
    let destination = format!("{storage_root}/{batch_id}/{run_id}/input/");

    let blobs = services
        .store
        .list_with_prefix(container, &source_prefix)
        .await
        .map_err(|e| TransferError::new(TransferOp::List, &source_prefix, e))?;

    let jobs = blobs.iter().map(|blob| {
        split_blob(services, container, &blob.name, &destination, manual)
    });
    let results = join_all(jobs).await;

    let mut report = SplitReport::default();
    for (blob, result) in blobs.iter().zip(results) {
        match result {
            Ok(written) => report.outputs += written,
            Err(e) => {
                warn!(blob = %blob.name, error = %e, "[SPLIT][WARN] File could not be split, continuing with the rest");
                report.failures.push(SplitFailure {
                    blob: blob.name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
    info!(
        files = blobs.len(),
        outputs = report.outputs,
        failed = report.failures.len(),
        "[SPLIT] Split complete"
    );
    Ok(report)
}

async fn split_blob(
    services: &Services,
    container: &str,
    blob_name: &str,
    destination: &str,
    manual: bool,
) -> Result<usize, PipelineError> {
    debug!(blob = blob_name, "[SPLIT] Downloading blob for EDI split");
    let payload = services
        .store
        .read_text(container, blob_name)
        .await
        .map_err(|e| TransferError::new(TransferOp::Read, blob_name, e))?;

    let stem = blob_stem(blob_name);
    let outputs = if manual {
        vec![split_manual(stem, &payload)]
    } else {
        split(stem, &payload)?
    };

    for output in &outputs {
        let path = format!("{destination}{}", output.name);
        services
            .store
            .write_text(container, &path, &output.content)
            .await
            .map_err(|e| TransferError::new(TransferOp::Write, &path, e))?;
        debug!(blob = %path, "[SPLIT] Wrote split file");
    }
    Ok(outputs.len())
}
