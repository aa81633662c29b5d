//! Data models shared by the transfer pipeline and the backend API.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::config::ShareSettings;
use crate::error::ErrorKind;

/// Folder id of the storage root.
pub const ROOT_FOLDER_ID: &str = "0";

/// Parsed identity of an externally shared link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ShareReference {
    pub share_id: String,
    pub password: Option<String>,
    pub raw_url: String,
}

/// Cookie name to value mapping.
pub type Cookies = BTreeMap<String, String>;

/// Render cookies as a `Cookie` header value.
pub fn cookie_header(cookies: &Cookies) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse a `name=value; name2=value2` header into cookies. Malformed pairs are dropped.
pub fn parse_cookie_header(header: &str) -> Cookies {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Authenticated session state.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub cookies: Cookies,
    pub acquired_at: OffsetDateTime,
    /// Cleared once the backend rejects these cookies; an invalid session is never sent.
    pub valid: bool,
}

impl Session {
    pub fn new(cookies: Cookies) -> Self {
        Self {
            cookies,
            acquired_at: OffsetDateTime::now_utc(),
            valid: true,
        }
    }
}

/// The view of a shared file that filter predicates see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub is_directory: bool,
    /// Lowercased extension without the dot.
    pub extension: Option<String>,
}

impl FileMetadata {
    pub fn new(name: impl Into<String>, size: u64, is_directory: bool) -> Self {
        let name = name.into();
        let extension = if is_directory {
            None
        } else {
            name.rsplit_once('.')
                .map(|(stem, ext)| (stem, ext.to_ascii_lowercase()))
                .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
                .map(|(_, ext)| ext)
        };
        Self {
            name,
            size,
            is_directory,
            extension,
        }
    }
}

/// An entry inside a share, as listed by the share detail endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareEntry {
    pub fid: String,
    pub file_name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub share_fid_token: String,
    #[serde(default)]
    pub pdir_fid: Option<String>,
}

impl ShareEntry {
    pub fn metadata(&self) -> FileMetadata {
        FileMetadata::new(self.file_name.clone(), self.size, self.dir)
    }
}

impl fmt::Display for ShareEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size_str = if self.dir {
            "-".to_string()
        } else {
            format_size(self.size)
        };
        let kind = if self.dir { "dir" } else { "file" };
        write!(f, "{}\t{}\t{}\t{}", self.fid, size_str, kind, self.file_name)
    }
}

/// An entry in the user's own storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveEntry {
    pub fid: String,
    pub file_name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub dir: bool,
}

/// Access token and title returned for a share.
#[derive(Debug, Clone, Deserialize)]
pub struct ShareToken {
    pub stoken: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Account details of the logged in user.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default, rename = "avatarUri")]
    pub avatar_uri: Option<String>,
}

/// Settings for sharing files from the user's own storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateShareOptions {
    /// 0 never expires.
    pub expire_days: u32,
    pub passcode: Option<String>,
    /// 0 allows unlimited downloads.
    pub download_limit: u32,
}

impl Default for CreateShareOptions {
    fn default() -> Self {
        Self::from(&ShareSettings::default())
    }
}

impl From<&ShareSettings> for CreateShareOptions {
    fn from(settings: &ShareSettings) -> Self {
        Self {
            expire_days: settings.expire_days,
            passcode: settings.passcode.clone(),
            download_limit: settings.download_limit,
        }
    }
}

/// What the backend returns for a new share. Either id may be missing while the share is
/// still being created in the background.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatedShare {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub share_id: Option<String>,
    #[serde(default)]
    pub share_url: Option<String>,
}

/// A share owned by the logged in user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyShare {
    pub share_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub share_url: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub created_at: i64,
    /// Milliseconds since the epoch; 0 never expires.
    #[serde(default)]
    pub expired_at: i64,
    #[serde(default)]
    pub click_pv: u64,
}

impl fmt::Display for MyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.share_id,
            self.click_pv,
            self.share_url.as_deref().unwrap_or("-"),
            self.title
        )
    }
}

/// Page metadata returned by list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageMetadata {
    #[serde(default, rename = "_total")]
    pub total: Option<u64>,
}

/// Response body of list endpoints.
#[derive(Debug, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
}

/// Lifecycle stage of a backend transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    PartialSuccess,
}

impl TaskStatus {
    /// Position in the lifecycle; observations must never decrease.
    pub fn rank(self) -> u8 {
        match self {
            TaskStatus::Submitted => 0,
            TaskStatus::Running => 1,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::PartialSuccess => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }
}

/// Task status payload (`data` of the task endpoint).
#[derive(Debug, Clone, Deserialize)]
pub struct TaskInfo {
    pub status: i64,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub save_as: Option<SaveAs>,
    #[serde(default)]
    pub failed_fids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveAs {
    #[serde(default)]
    pub save_as_top_fids: Vec<String>,
}

/// Backend job copying shared files into the user's storage.
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub id: Option<String>,
    pub share: ShareReference,
    pub target_folder_id: String,
    pub candidate_file_ids: Vec<String>,
    pub status: TaskStatus,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl TransferTask {
    pub fn new(
        share: ShareReference,
        target_folder_id: impl Into<String>,
        candidate_file_ids: Vec<String>,
    ) -> Self {
        Self {
            id: None,
            share,
            target_folder_id: target_folder_id.into(),
            candidate_file_ids,
            status: TaskStatus::Submitted,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        }
    }
}

/// Final state reported by the poller.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalStatus {
    Succeeded {
        saved_ids: Vec<String>,
    },
    PartialSuccess {
        succeeded_ids: Vec<String>,
        failed_ids: Vec<String>,
        reason: String,
    },
    Failed {
        reason: String,
    },
    /// The backend may still finish; the task id allows re-polling later.
    TimedOut {
        task_id: String,
    },
}

/// Result of saving one share reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        target_folder_id: String,
        file_count: usize,
    },
    PartialSuccess {
        target_folder_id: String,
        succeeded_ids: Vec<String>,
        failed_ids: Vec<String>,
        reason: String,
    },
    TimedOut {
        target_folder_id: String,
        task_id: String,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        /// Folder created for this share before the failure; it is left in place.
        #[serde(skip_serializing_if = "Option::is_none")]
        created_folder_id: Option<String>,
    },
}

impl Outcome {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Outcome::Failure {
            kind,
            message: message.into(),
            created_folder_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success {
                target_folder_id,
                file_count,
            } => write!(f, "OK: {} item(s) saved to {}", file_count, target_folder_id),
            Outcome::PartialSuccess {
                target_folder_id,
                succeeded_ids,
                failed_ids,
                reason,
            } => write!(
                f,
                "PARTIAL: {} saved, {} failed in {} ({})",
                succeeded_ids.len(),
                failed_ids.len(),
                target_folder_id,
                reason
            ),
            Outcome::TimedOut {
                target_folder_id,
                task_id,
            } => write!(
                f,
                "TIMEOUT: task {} still running for {}",
                task_id, target_folder_id
            ),
            Outcome::Failure {
                kind,
                message,
                created_folder_id,
            } => {
                write!(f, "FAILED [{}]: {}", kind, message)?;
                if let Some(folder) = created_folder_id {
                    write!(f, " (folder {} was created and left empty)", folder)?;
                }
                Ok(())
            }
        }
    }
}

/// One entry of a batch report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Per-reference report of a batch, keyed by `raw_url` (or the input text on parse failure).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub per_reference: BTreeMap<String, BatchItem>,
}

impl BatchResult {
    pub fn outcome(&self, key: &str) -> Option<&Outcome> {
        self.per_reference.get(key).map(|item| &item.outcome)
    }

    pub fn len(&self) -> usize {
        self.per_reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_reference.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.per_reference
            .values()
            .filter(|item| item.outcome.is_success())
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.per_reference
            .values()
            .filter(|item| matches!(item.outcome, Outcome::Failure { .. }))
            .count()
    }
}

/// Format bytes into human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
