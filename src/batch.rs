//! Runs many share references through the transfer pipeline.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::BatchSettings;
use crate::error::{ErrorKind, PanError, Result};
use crate::models::{BatchItem, BatchResult, Outcome, ShareReference};
use crate::transfer::{SaveOptions, ShareTransfer};
use crate::url_parser::parse_share_text;

/// One line of batch input: share text plus an optional note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub text: String,
    pub note: Option<String>,
}

impl BatchEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Split a line into text and note. The note follows a tab or ` # `.
    /// Blank lines and `#` comments yield `None`.
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (text, note) = match line.split_once('\t').or_else(|| line.split_once(" # ")) {
            Some((text, note)) => (text.trim(), Some(note.trim())),
            None => (line, None),
        };
        Some(Self {
            text: text.to_string(),
            note: note.filter(|n| !n.is_empty()).map(str::to_string),
        })
    }
}

/// Read batch entries from multi-line text.
pub fn read_entries(text: &str) -> Vec<BatchEntry> {
    text.lines().filter_map(BatchEntry::from_line).collect()
}

struct BatchJob {
    key: String,
    note: Option<String>,
    share: Result<ShareReference>,
}

/// Fans share references out to a bounded number of concurrent transfers.
pub struct BatchCoordinator {
    transfer: Arc<ShareTransfer>,
    settings: BatchSettings,
}

impl BatchCoordinator {
    pub fn new(transfer: Arc<ShareTransfer>, settings: BatchSettings) -> Self {
        Self { transfer, settings }
    }

    /// Save every entry and report one outcome per distinct reference.
    ///
    /// Only invalid settings fail the whole call; per-entry problems become `Failure` outcomes.
    pub async fn save_many(
        &self,
        entries: Vec<BatchEntry>,
        options: &SaveOptions,
    ) -> Result<BatchResult> {
        if self.settings.workers == 0 {
            return Err(PanError::Config("batch.workers must be at least 1".into()));
        }

        let jobs = dedupe(entries);
        let total = jobs.len();
        info!(total, workers = self.settings.workers, "starting batch");

        let cancel = CancellationToken::new();
        let deadline = self
            .settings
            .timeout_secs
            .map(|secs| spawn_deadline(Duration::from_secs(secs), cancel.clone()));

        let (_, per_reference) = stream::iter(jobs)
            .map(|job| self.run_job(job, options, &cancel))
            .buffer_unordered(self.settings.workers)
            .fold(
                (0usize, BTreeMap::new()),
                |(done, mut per_reference), (key, item)| async move {
                    let done = done + 1;
                    info!("[{}/{}] {}: {}", done, total, key, item.outcome);
                    per_reference.insert(key, item);
                    (done, per_reference)
                },
            )
            .await;

        if let Some(handle) = deadline {
            handle.abort();
        }

        let result = BatchResult { per_reference };
        info!(
            total = result.len(),
            succeeded = result.success_count(),
            failed = result.failure_count(),
            "batch finished"
        );
        Ok(result)
    }

    async fn run_job(
        &self,
        job: BatchJob,
        options: &SaveOptions,
        cancel: &CancellationToken,
    ) -> (String, BatchItem) {
        let outcome = match job.share {
            Err(err) => Outcome::failure(err.kind(), err.to_string()),
            Ok(_) if cancel.is_cancelled() => Outcome::failure(
                ErrorKind::Cancelled,
                "batch deadline reached before this share started",
            ),
            Ok(share) => {
                let mut options = options.clone();
                if job.note.is_some() {
                    options.subfolder_name = job.note.clone();
                }
                self.transfer.save_share(&share, &options, cancel).await
            }
        };

        (
            job.key,
            BatchItem {
                note: job.note,
                outcome,
            },
        )
    }
}

/// Parse entries and drop later duplicates of an already seen key.
fn dedupe(entries: Vec<BatchEntry>) -> Vec<BatchJob> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::with_capacity(entries.len());

    for entry in entries {
        let share = parse_share_text(&entry.text);
        let key = match &share {
            Ok(share) => share.raw_url.clone(),
            Err(_) => entry.text.trim().to_string(),
        };
        if !seen.insert(key.clone()) {
            warn!(key = %key, "skipping duplicate batch entry");
            continue;
        }
        jobs.push(BatchJob {
            key,
            note: entry.note,
            share,
        });
    }
    jobs
}

fn spawn_deadline(timeout: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        warn!(?timeout, "batch deadline reached, cancelling remaining work");
        cancel.cancel();
    })
}
