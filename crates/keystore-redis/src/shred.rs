//! Bulk deletion of every key under a namespace.
//!
//! The scan is raced against an absolute deadline and an optional caller
//! cancellation. Whichever loses is dropped, which abandons the server-side
//! cursor. By default deletes are fire-and-forget: each one runs as a detached
//! task and a shred only certifies that the enumeration reached its end. Keys
//! written after the scan has passed their position survive the shred.

use std::time::Duration;

use futures::{future, StreamExt};
use keystore_core::storage::SlotStoreError;
use serde::{Deserialize, Serialize};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};

use crate::client::KvClient;

pub const DEFAULT_SHRED_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SCAN_COUNT: usize = 100;

/// How deletes discovered by the scan are issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShredMode {
    /// Issue deletes without waiting for acknowledgment; failures are logged only.
    #[default]
    FireAndForget,
    /// Await every delete of a batch before pulling the next one; a failure aborts the shred.
    Acknowledged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShredOptions {
    /// Bound on the whole enumeration, measured from when the scan starts.
    pub timeout: Duration,
    /// `COUNT` hint passed with each scan request.
    pub scan_count: usize,
    pub mode: ShredMode,
}

impl Default for ShredOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SHRED_TIMEOUT,
            scan_count: DEFAULT_SCAN_COUNT,
            mode: ShredMode::default(),
        }
    }
}

/// What a completed shred saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShredReport {
    /// Non-empty batches returned by the scan.
    pub batches: usize,
    /// Keys a delete was issued for.
    pub keys: usize,
}

pub(crate) async fn shred<C: KvClient>(
    client: &C,
    pattern: &str,
    options: &ShredOptions,
    deletes: &TaskTracker,
    cancel: &CancellationToken,
) -> Result<ShredReport, SlotStoreError> {
    info!(%pattern, "clearing keys matching pattern");
    let drain = drain_scan(client, pattern, options, deletes);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!(%pattern, "key clearing cancelled, abandoning scan");
            Err(SlotStoreError::Cancelled)
        }
        outcome = tokio::time::timeout(options.timeout, drain) => match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(%pattern, timeout = ?options.timeout, "timeout while clearing keys, abandoning scan");
                Err(SlotStoreError::Timeout { after: options.timeout })
            }
        },
    }
}

async fn drain_scan<C: KvClient>(
    client: &C,
    pattern: &str,
    options: &ShredOptions,
    deletes: &TaskTracker,
) -> Result<ShredReport, SlotStoreError> {
    let mut scan = client.scan_match(pattern, options.scan_count);
    let mut report = ShredReport::default();

    while let Some(batch) = scan.next().await {
        let keys = batch.map_err(|err| {
            error!(error = %err, "error while scanning keys for deletion");
            SlotStoreError::from(err)
        })?;
        if keys.is_empty() {
            continue;
        }

        info!(count = keys.len(), "deleting keys");
        report.batches += 1;
        report.keys += keys.len();
        match options.mode {
            ShredMode::FireAndForget => spawn_deletes(client, keys, deletes),
            ShredMode::Acknowledged => {
                future::try_join_all(keys.iter().map(|key| client.del(key))).await?;
            }
        }
    }

    info!(keys = report.keys, "finished scanning keys for deletion");
    Ok(report)
}

fn spawn_deletes<C: KvClient>(client: &C, keys: Vec<String>, deletes: &TaskTracker) {
    for key in keys {
        let client = client.clone();
        deletes.spawn(async move {
            if let Err(err) = client.del(&key).await {
                warn!(%key, error = %err, "delete issued during shred failed");
            }
        });
    }
}
