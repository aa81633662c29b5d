//! Saves one share reference into the user's storage.
//!
//! A save runs a fixed sequence: session, share token and listing, destination folder, filter,
//! submission, polling. Later steps never run before earlier ones, and a submission is retried
//! at most once (on a transport error) without repeating the folder step.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::PanApi;
use crate::config::{Config, ConflictPolicy, TransferSettings};
use crate::error::{ErrorKind, PanError, Result};
use crate::filter::FilterPredicate;
use crate::models::{Outcome, ShareEntry, ShareReference, TerminalStatus, TransferTask};
use crate::poller::TaskPoller;

/// Longest folder name we create.
const MAX_FOLDER_NAME_CHARS: usize = 100;

/// Characters the backend refuses in file names.
const INVALID_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Options for one save.
#[derive(Clone)]
pub struct SaveOptions {
    pub target_folder_id: String,
    pub filter: Option<Arc<dyn FilterPredicate>>,
    pub create_subfolder: bool,
    /// Preferred subfolder name; falls back to the share title, then the link.
    pub subfolder_name: Option<String>,
    pub conflict_policy: ConflictPolicy,
    pub task_timeout: Duration,
}

impl SaveOptions {
    pub fn new(target_folder_id: impl Into<String>) -> Self {
        Self {
            target_folder_id: target_folder_id.into(),
            filter: None,
            create_subfolder: false,
            subfolder_name: None,
            conflict_policy: ConflictPolicy::default(),
            task_timeout: Duration::from_secs(120),
        }
    }

    /// Options carrying the configured conflict policy and task timeout.
    pub fn from_config(config: &Config, target_folder_id: impl Into<String>) -> Self {
        Self {
            conflict_policy: config.transfer.conflict_policy,
            task_timeout: config.poll.task_timeout(),
            ..Self::new(target_folder_id)
        }
    }

    pub fn with_filter(mut self, filter: impl FilterPredicate + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }
}

/// Destination chosen for a save.
struct Destination {
    folder_id: String,
    /// Set when this save created the folder.
    created: bool,
}

/// Drives a single share through the transfer pipeline.
pub struct ShareTransfer {
    api: PanApi,
    poller: TaskPoller,
    settings: TransferSettings,
}

impl ShareTransfer {
    pub fn new(api: PanApi, poller: TaskPoller, settings: TransferSettings) -> Self {
        Self {
            api,
            poller,
            settings,
        }
    }

    pub fn api(&self) -> &PanApi {
        &self.api
    }

    /// Save `share`. Every error is folded into the returned outcome.
    pub async fn save_share(
        &self,
        share: &ShareReference,
        options: &SaveOptions,
        cancel: &CancellationToken,
    ) -> Outcome {
        let mut created_folder = None;
        match self.run(share, options, cancel, &mut created_folder).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(share_id = %share.share_id, error = %err, "share transfer failed");
                Outcome::Failure {
                    kind: err.kind(),
                    message: err.to_string(),
                    created_folder_id: created_folder,
                }
            }
        }
    }

    async fn run(
        &self,
        share: &ShareReference,
        options: &SaveOptions,
        cancel: &CancellationToken,
        created_folder: &mut Option<String>,
    ) -> Result<Outcome> {
        // Login may wait on a QR scan for minutes; a batch deadline must not.
        tokio::select! {
            session = self.api.session().ensure_session() => {
                session?;
            }
            _ = cancel.cancelled() => {
                return Err(PanError::Cancelled(
                    "batch deadline reached while waiting for login".into(),
                ));
            }
        }

        let token = self.api.share_token(share).await?;
        let top_level = self.api.share_entries(share, &token.stoken, "0").await?;
        if top_level.is_empty() {
            return Err(PanError::NoMatch(format!("{} contains no files", share.raw_url)));
        }
        info!(share_id = %share.share_id, entries = top_level.len(), "fetched share contents");

        let destination = if options.create_subfolder {
            let name = folder_name_for(share, options, token.title.as_deref());
            let destination = self
                .prepare_folder(&options.target_folder_id, &name, options.conflict_policy)
                .await?;
            if destination.created {
                *created_folder = Some(destination.folder_id.clone());
            }
            destination
        } else {
            Destination {
                folder_id: options.target_folder_id.clone(),
                created: false,
            }
        };

        let candidates = match &options.filter {
            None => top_level,
            Some(filter) => {
                self.collect_matches(share, &token.stoken, top_level, filter.as_ref(), 0)
                    .await?
            }
        };
        if candidates.is_empty() {
            return Err(PanError::NoMatch(format!(
                "no file in {} passed the filter",
                share.raw_url
            )));
        }

        if cancel.is_cancelled() {
            return Err(PanError::Cancelled(
                "batch deadline reached before submission".into(),
            ));
        }

        let mut task = TransferTask::new(
            share.clone(),
            destination.folder_id.clone(),
            candidates.iter().map(|e| e.fid.clone()).collect(),
        );
        let task_id = self.submit(share, &token.stoken, &candidates, &destination.folder_id).await?;
        info!(share_id = %share.share_id, task_id = %task_id, files = candidates.len(), "transfer submitted");
        task.id = Some(task_id);

        let status = self
            .poller
            .await_task(&mut task, options.task_timeout, cancel)
            .await?;
        Ok(outcome_for(&task, status, created_folder.clone()))
    }

    async fn submit(
        &self,
        share: &ShareReference,
        stoken: &str,
        candidates: &[ShareEntry],
        target_folder_id: &str,
    ) -> Result<String> {
        match self
            .api
            .save_share(share, stoken, candidates, target_folder_id)
            .await
        {
            Err(err) if err.is_transient() => {
                warn!(share_id = %share.share_id, error = %err, "submission failed, retrying once");
                self.api
                    .save_share(share, stoken, candidates, target_folder_id)
                    .await
            }
            other => other,
        }
    }

    /// Resolve the destination subfolder according to the conflict policy.
    async fn prepare_folder(
        &self,
        parent_id: &str,
        name: &str,
        policy: ConflictPolicy,
    ) -> Result<Destination> {
        let siblings = self.api.list_folder(parent_id).await?;
        let existing = siblings.iter().find(|e| e.dir && e.file_name == name);

        let name = match (existing, policy) {
            (None, _) => name.to_string(),
            (Some(folder), ConflictPolicy::Merge) => {
                debug!(folder_id = %folder.fid, name, "reusing existing folder");
                return Ok(Destination {
                    folder_id: folder.fid.clone(),
                    created: false,
                });
            }
            (Some(folder), ConflictPolicy::Overwrite) => {
                info!(folder_id = %folder.fid, name, "replacing existing folder");
                self.api.delete_entries(&[folder.fid.clone()]).await?;
                name.to_string()
            }
            (Some(_), ConflictPolicy::Suffix) => (2..)
                .map(|n| format!("{} ({})", name, n))
                .find(|candidate| !siblings.iter().any(|e| &e.file_name == candidate))
                .unwrap_or_else(|| name.to_string()),
        };

        let folder_id = self.api.create_folder(parent_id, &name).await?;
        info!(folder_id = %folder_id, name = %name, "created destination folder");
        Ok(Destination {
            folder_id,
            created: true,
        })
    }

    /// Flatten `entries` into the files matching `filter`, descending into directories.
    fn collect_matches<'a>(
        &'a self,
        share: &'a ShareReference,
        stoken: &'a str,
        entries: Vec<ShareEntry>,
        filter: &'a dyn FilterPredicate,
        depth: usize,
    ) -> BoxFuture<'a, Result<Vec<ShareEntry>>> {
        async move {
            let mut matches = Vec::new();
            for entry in entries {
                if !entry.dir {
                    if filter.matches(&entry.metadata()) {
                        matches.push(entry);
                    }
                    continue;
                }

                if depth >= self.settings.max_depth {
                    warn!(fid = %entry.fid, depth, "not descending further into shared folder");
                    continue;
                }
                let children = self.api.share_entries(share, stoken, &entry.fid).await?;
                let nested = self
                    .collect_matches(share, stoken, children, filter, depth + 1)
                    .await?;
                matches.extend(nested);
            }
            Ok(matches)
        }
        .boxed()
    }
}

/// Pick and sanitize the subfolder name.
fn folder_name_for(share: &ShareReference, options: &SaveOptions, title: Option<&str>) -> String {
    let raw = options
        .subfolder_name
        .as_deref()
        .or(title)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(&share.raw_url);
    sanitize_folder_name(raw)
}

pub fn sanitize_folder_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if INVALID_NAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .take(MAX_FOLDER_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        "shared".to_string()
    } else {
        cleaned
    }
}

/// `created_folder` is kept on a failed task so the empty folder is still reported.
fn outcome_for(
    task: &TransferTask,
    status: TerminalStatus,
    created_folder: Option<String>,
) -> Outcome {
    let target_folder_id = task.target_folder_id.clone();
    match status {
        TerminalStatus::Succeeded { .. } => Outcome::Success {
            target_folder_id,
            file_count: task.candidate_file_ids.len(),
        },
        TerminalStatus::PartialSuccess {
            succeeded_ids,
            failed_ids,
            reason,
        } => Outcome::PartialSuccess {
            target_folder_id,
            succeeded_ids,
            failed_ids,
            reason,
        },
        TerminalStatus::Failed { reason } => Outcome::Failure {
            kind: ErrorKind::Remote,
            message: format!(
                "transfer task {} failed: {}",
                task.id.as_deref().unwrap_or("?"),
                reason
            ),
            created_folder_id: created_folder,
        },
        TerminalStatus::TimedOut { task_id } => Outcome::TimedOut {
            target_folder_id,
            task_id,
        },
    }
}
