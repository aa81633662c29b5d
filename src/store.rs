//! Cookie file persistence.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::auth::{CredentialStore, StoredCredentials};
use crate::error::Result;
use crate::models::Cookies;

/// Records without an explicit expiry are trusted for this long.
const DEFAULT_MAX_AGE_SECS: i64 = 7 * 24 * 3600;

#[derive(Debug, Serialize, Deserialize)]
struct CookieFile {
    cookies: Cookies,
    saved_at: i64,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Stores cookies as JSON in a single file, replaced atomically on save.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_expired(file: &CookieFile, now: i64) -> bool {
        match file.expires_at {
            Some(expires_at) if expires_at > 0 => now > expires_at,
            _ => now - file.saved_at > DEFAULT_MAX_AGE_SECS,
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<StoredCredentials>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        let file: CookieFile = serde_json::from_str(&content)?;

        if Self::is_expired(&file, OffsetDateTime::now_utc().unix_timestamp()) {
            debug!(path = %self.path.display(), "stored cookies expired");
            return Ok(None);
        }

        Ok(Some(StoredCredentials {
            cookies: file.cookies,
            saved_at: file.saved_at,
            expires_at: file.expires_at,
        }))
    }

    fn save(&self, cookies: &Cookies) -> Result<()> {
        let file = CookieFile {
            cookies: cookies.clone(),
            saved_at: OffsetDateTime::now_utc().unix_timestamp(),
            expires_at: None,
        };
        let contents = serde_json::to_string_pretty(&file)?;
        atomic_write(&self.path, &contents)?;
        debug!(path = %self.path.display(), "saved cookies");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Write to a temp file next to `path`, sync it, then rename over `path`.
fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = temp_path_for(path);
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let base_name = path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("cookies.json");
    path.with_file_name(format!(".{}.{}.tmp", base_name, Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookies() -> Cookies {
        [("__pus", "a"), ("__puus", "b")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested/cookies.json"));

        store.save(&cookies()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.cookies, cookies());

        // No temp files are left behind.
        let entries = fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("cookies.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_expired_records_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let stale = CookieFile {
            cookies: cookies(),
            saved_at: now - DEFAULT_MAX_AGE_SECS - 10,
            expires_at: None,
        };
        fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();
        assert!(FileCredentialStore::new(&path).load().unwrap().is_none());

        let explicit = CookieFile {
            cookies: cookies(),
            saved_at: now,
            expires_at: Some(now - 1),
        };
        fs::write(&path, serde_json::to_string(&explicit).unwrap()).unwrap();
        assert!(FileCredentialStore::new(&path).load().unwrap().is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("cookies.json"));
        store.save(&cookies()).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        fs::write(&path, "not json").unwrap();
        assert!(FileCredentialStore::new(&path).load().is_err());
    }
}
