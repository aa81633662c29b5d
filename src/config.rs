//! Configuration schema, defaults, and layered loading.
//!
//! Precedence: defaults < config file < environment (`PAN_SHARE_*`) < CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{PanError, Result};

const APP_DIR: &str = "pan_share";

/// Default location of the config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("pan_share.toml"))
}

/// Default location of the persisted cookie file.
pub fn default_cookie_file() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join("cookies.json"))
        .unwrap_or_else(|| PathBuf::from("cookies.json"))
}

/// What to do when the destination subfolder name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Reuse the existing folder.
    Merge,
    /// Create `name (2)`, `name (3)`, ...
    #[default]
    Suffix,
    /// Delete the existing folder and create a fresh one.
    Overwrite,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = PanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "merge" => Ok(ConflictPolicy::Merge),
            "suffix" => Ok(ConflictPolicy::Suffix),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            other => Err(PanError::Config(format!(
                "unknown conflict policy '{}' (expected merge, suffix or overwrite)",
                other
            ))),
        }
    }
}

/// Task polling schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_factor: f64,
    /// Consecutive malformed or network-failed polls tolerated before giving up.
    pub max_transient_errors: u32,
    pub task_timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            max_interval_ms: 5_000,
            backoff_factor: 1.5,
            max_transient_errors: 5,
            task_timeout_secs: 120,
        }
    }
}

impl PollSettings {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// 1 runs shares sequentially.
    pub workers: usize,
    pub timeout_secs: Option<u64>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    pub conflict_policy: ConflictPolicy,
    /// How deep filtered saves descend into shared directories.
    pub max_depth: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            max_depth: 16,
        }
    }
}

/// Defaults for shares created from the user's own files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSettings {
    /// 0 never expires.
    pub expire_days: u32,
    pub passcode: Option<String>,
    /// 0 allows unlimited downloads.
    pub download_limit: u32,
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            expire_days: 7,
            passcode: None,
            download_limit: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub drive_base_url: String,
    pub share_base_url: String,
    pub account_base_url: String,
    pub login_base_url: String,
    pub cookie_file: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub qr_timeout_secs: u64,
    pub page_size: u32,
    pub poll: PollSettings,
    pub batch: BatchSettings,
    pub transfer: TransferSettings,
    pub share: ShareSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            drive_base_url: "https://drive-pc.quark.cn/1/clouddrive".to_string(),
            share_base_url: "https://drive-h.quark.cn/1/clouddrive".to_string(),
            account_base_url: "https://pan.quark.cn".to_string(),
            login_base_url: "https://uop.quark.cn".to_string(),
            cookie_file: None,
            request_timeout_secs: 30,
            qr_timeout_secs: 300,
            page_size: 50,
            poll: PollSettings::default(),
            batch: BatchSettings::default(),
            transfer: TransferSettings::default(),
            share: ShareSettings::default(),
        }
    }
}

impl Config {
    /// Load defaults, then the TOML file at `path` (or the default location), then the
    /// environment. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PAN_SHARE_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let poll = &self.poll;
        if self.batch.workers == 0 {
            return Err(PanError::Config("batch.workers must be at least 1".into()));
        }
        if self.page_size == 0 {
            return Err(PanError::Config("page_size must be at least 1".into()));
        }
        if poll.initial_interval_ms == 0 || poll.max_interval_ms == 0 {
            return Err(PanError::Config("poll intervals must be positive".into()));
        }
        if poll.initial_interval_ms > poll.max_interval_ms {
            return Err(PanError::Config(
                "poll.initial_interval_ms exceeds poll.max_interval_ms".into(),
            ));
        }
        if !poll.backoff_factor.is_finite() || poll.backoff_factor < 1.0 {
            return Err(PanError::Config("poll.backoff_factor must be >= 1.0".into()));
        }
        if let Some(passcode) = &self.share.passcode {
            validate_passcode(passcode)?;
        }
        Ok(())
    }

    pub fn cookie_file(&self) -> PathBuf {
        self.cookie_file.clone().unwrap_or_else(default_cookie_file)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn qr_timeout(&self) -> Duration {
        Duration::from_secs(self.qr_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch.timeout_secs.map(Duration::from_secs)
    }
}

/// Extraction codes are short and alphanumeric.
pub fn validate_passcode(passcode: &str) -> Result<()> {
    if passcode.is_empty()
        || passcode.chars().count() > 8
        || !passcode.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(PanError::Config(format!(
            "invalid passcode '{}' (1-8 letters or digits)",
            passcode
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.workers, 1);
        assert_eq!(config.transfer.conflict_policy, ConflictPolicy::Suffix);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "page_size = 20\n[batch]\nworkers = 4\n[transfer]\nconflict_policy = \"merge\""
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.batch.workers, 4);
        assert_eq!(config.transfer.conflict_policy, ConflictPolicy::Merge);
        assert_eq!(config.poll.max_interval_ms, 5_000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/pan_share.toml"))).unwrap();
        assert_eq!(config.page_size, 50);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.batch.workers = 0;
        assert!(matches!(config.validate(), Err(PanError::Config(_))));

        let mut config = Config::default();
        config.poll.backoff_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.poll.initial_interval_ms = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_share_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[share]\nexpire_days = 0\npasscode = \"ab12\"").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.share.expire_days, 0);
        assert_eq!(config.share.passcode.as_deref(), Some("ab12"));
        assert_eq!(config.share.download_limit, 0);

        assert!(validate_passcode("ab12").is_ok());
        assert!(validate_passcode("").is_err());
        assert!(validate_passcode("12 34").is_err());
        assert!(validate_passcode("123456789").is_err());
    }

    #[test]
    fn test_conflict_policy_from_str() {
        assert_eq!("MERGE".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Merge);
        assert!("rename".parse::<ConflictPolicy>().is_err());
    }
}
