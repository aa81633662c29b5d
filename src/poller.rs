//! Waits for backend transfer tasks to finish.

use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::PanApi;
use crate::config::PollSettings;
use crate::error::{PanError, Result};
use crate::models::{TaskInfo, TaskStatus, TerminalStatus, TransferTask};

/// Validate a task status response and map it onto the task lifecycle.
pub fn parse_task_status(value: &Value) -> Result<(TaskStatus, TaskInfo)> {
    let data = value
        .get("data")
        .cloned()
        .ok_or_else(|| PanError::UnexpectedResponse("task response has no data".into()))?;
    let info: TaskInfo = serde_json::from_value(data)
        .map_err(|e| PanError::UnexpectedResponse(format!("malformed task response: {}", e)))?;

    let status = match info.status {
        0 => TaskStatus::Submitted,
        1 => TaskStatus::Running,
        2 if info.failed_fids.is_empty() => TaskStatus::Succeeded,
        2 => TaskStatus::PartialSuccess,
        3 => TaskStatus::Failed,
        other => {
            return Err(PanError::UnexpectedResponse(format!(
                "unknown task status {}",
                other
            )))
        }
    };
    Ok((status, info))
}

enum PollStep {
    Observed(TaskStatus, TaskInfo),
    /// A malformed or network-failed poll that still fits the error budget.
    Transient,
}

/// Polls task status with capped exponential backoff.
#[derive(Clone)]
pub struct TaskPoller {
    api: PanApi,
    settings: PollSettings,
}

impl TaskPoller {
    pub fn new(api: PanApi, settings: PollSettings) -> Self {
        Self { api, settings }
    }

    /// Wait until `task` reaches a terminal status, `timeout` elapses, or `cancel` fires.
    ///
    /// A terminal observation is confirmed by one more poll; any regression between
    /// observations is a `PollError`. Timing out or cancellation yields
    /// [`TerminalStatus::TimedOut`] and leaves `task.status` at the last observed stage.
    pub async fn await_task(
        &self,
        task: &mut TransferTask,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TerminalStatus> {
        let task_id = task
            .id
            .clone()
            .ok_or_else(|| PanError::Poll("task has not been submitted".into()))?;
        let deadline = Instant::now() + timeout;
        let mut interval = self.settings.initial_interval();
        let mut transient_errors = 0u32;
        let mut retry_index = 0u32;
        let mut pending_terminal: Option<(TaskStatus, TaskInfo)> = None;

        loop {
            let step = self
                .poll_once(&task_id, retry_index, &mut transient_errors)
                .await?;
            retry_index += 1;

            if let PollStep::Observed(status, info) = step {
                if status.rank() < task.status.rank() {
                    return Err(PanError::Poll(format!(
                        "task {} regressed from {:?} to {:?}",
                        task_id, task.status, status
                    )));
                }

                if let Some((seen, seen_info)) = pending_terminal.take() {
                    if status != seen {
                        return Err(PanError::Poll(format!(
                            "task {} reported {:?} after {:?}",
                            task_id, status, seen
                        )));
                    }
                    return Ok(self.finish(task, seen, seen_info));
                }

                if status != task.status {
                    debug!(task_id = %task_id, ?status, "task status changed");
                }
                task.status = status;
                if status.is_terminal() {
                    pending_terminal = Some((status, info));
                    interval = self.settings.initial_interval();
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(self.give_up(task, &task_id, pending_terminal));
            }
            let wait = interval.min(deadline - now);

            tokio::select! {
                _ = sleep(wait) => {}
                _ = cancel.cancelled() => {
                    debug!(task_id = %task_id, "polling cancelled");
                    return Ok(self.give_up(task, &task_id, pending_terminal));
                }
            }

            if pending_terminal.is_none() {
                interval = interval
                    .mul_f64(self.settings.backoff_factor)
                    .min(self.settings.max_interval());
            }
        }
    }

    async fn poll_once(
        &self,
        task_id: &str,
        retry_index: u32,
        transient_errors: &mut u32,
    ) -> Result<PollStep> {
        let failure = match self.api.task_status(task_id, retry_index).await {
            Ok(value) => match parse_task_status(&value) {
                Ok((status, info)) => {
                    *transient_errors = 0;
                    return Ok(PollStep::Observed(status, info));
                }
                Err(err) => err,
            },
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(err),
        };

        *transient_errors += 1;
        warn!(
            task_id,
            attempt = *transient_errors,
            error = %failure,
            "task poll failed"
        );
        if *transient_errors > self.settings.max_transient_errors {
            return Err(PanError::Poll(format!(
                "giving up on task {} after {} failed polls: {}",
                task_id, transient_errors, failure
            )));
        }
        Ok(PollStep::Transient)
    }

    fn finish(&self, task: &mut TransferTask, status: TaskStatus, info: TaskInfo) -> TerminalStatus {
        task.status = status;
        task.completed_at = Some(OffsetDateTime::now_utc());
        let saved_ids = info.save_as.map(|s| s.save_as_top_fids).unwrap_or_default();

        match status {
            TaskStatus::PartialSuccess => TerminalStatus::PartialSuccess {
                succeeded_ids: saved_ids,
                failed_ids: info.failed_fids,
                reason: info
                    .message
                    .unwrap_or_else(|| "some files could not be saved".to_string()),
            },
            TaskStatus::Failed => TerminalStatus::Failed {
                reason: info
                    .message
                    .unwrap_or_else(|| "transfer task failed".to_string()),
            },
            _ => TerminalStatus::Succeeded { saved_ids },
        }
    }

    /// Out of time. An unconfirmed terminal observation is still the best answer we have.
    fn give_up(
        &self,
        task: &mut TransferTask,
        task_id: &str,
        pending_terminal: Option<(TaskStatus, TaskInfo)>,
    ) -> TerminalStatus {
        match pending_terminal {
            Some((status, info)) => self.finish(task, status, info),
            None => TerminalStatus::TimedOut {
                task_id: task_id.to_string(),
            },
        }
    }
}
