//! Session token persistence.
//!
//! Credentials live in `<meta_dir>/credentials.json` as
//! `{"schemaVersion": 1, "expiresAtMillis": ..., "token": "..."}`, readable by
//! the owner only. A missing, malformed, or expired file always reads as
//! "not logged in" and never as an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{SCHEMA_VERSION, expiry_from_now, now_millis};
use crate::constants::CREDENTIALS_FILE_NAME;
use crate::error::ExportError;

/// A stored session token and its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Cookie header value sent with every request.
    pub token: String,
    /// Unix time in milliseconds after which the token is treated as expired.
    pub expires_at_millis: i64,
}

impl Credentials {
    /// Returns true while the token is non-empty and unexpired at `now_millis`.
    #[must_use]
    pub fn is_valid_at(&self, now_millis: i64) -> bool {
        !self.token.trim().is_empty() && self.expires_at_millis > now_millis
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredCredentials {
    #[serde(default)]
    schema_version: u32,
    #[serde(flatten)]
    credentials: Credentials,
}

/// File-backed store for the session token.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Creates a store under the given meta directory.
    #[must_use]
    pub fn new(meta_dir: &Path) -> Self {
        Self {
            path: meta_dir.join(CREDENTIALS_FILE_NAME),
        }
    }

    /// Location of the credentials file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists `token`, valid for `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Filesystem`] if the file cannot be written.
    pub fn save(&self, token: &str, ttl: Duration) -> Result<Credentials, ExportError> {
        let credentials = Credentials {
            token: token.trim().to_string(),
            expires_at_millis: expiry_from_now(ttl),
        };
        let stored = StoredCredentials {
            schema_version: SCHEMA_VERSION,
            credentials: credentials.clone(),
        };
        let payload =
            serde_json::to_vec_pretty(&stored).map_err(|e| ExportError::encode(&self.path, e))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ExportError::filesystem(parent, e))?;
        }
        fs::write(&self.path, payload).map_err(|e| ExportError::filesystem(&self.path, e))?;
        set_owner_only_permissions(&self.path)?;

        debug!(
            path = %self.path.display(),
            expires_at_millis = credentials.expires_at_millis,
            "stored session credentials"
        );
        Ok(credentials)
    }

    /// Loads the token if present and unexpired.
    #[must_use]
    pub fn load(&self) -> Option<Credentials> {
        self.load_at(now_millis())
    }

    fn load_at(&self, now: i64) -> Option<Credentials> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "unreadable credentials file");
                return None;
            }
        };

        let stored: StoredCredentials = match serde_json::from_slice(&raw) {
            Ok(stored) => stored,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "malformed credentials file");
                return None;
            }
        };

        if stored.credentials.is_valid_at(now) {
            Some(stored.credentials)
        } else {
            debug!(
                expires_at_millis = stored.credentials.expires_at_millis,
                "stored session expired"
            );
            None
        }
    }

    /// Deletes stored credentials. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Filesystem`] when removal fails.
    pub fn clear(&self) -> Result<bool, ExportError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(ExportError::filesystem(&self.path, error)),
        }
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), ExportError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, permissions).map_err(|e| ExportError::filesystem(path, e))
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<(), ExportError> {
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_save_then_load_round_trip() {
        let tempdir = TempDir::new().unwrap();
        let store = CredentialStore::new(tempdir.path());

        store
            .save("_yuque_session=abc; ctoken=xyz", Duration::from_secs(3600))
            .unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.token, "_yuque_session=abc; ctoken=xyz");
    }

    #[test]
    fn test_load_missing_file_is_absent() {
        let tempdir = TempDir::new().unwrap();
        let store = CredentialStore::new(tempdir.path());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_load_malformed_file_is_absent() {
        let tempdir = TempDir::new().unwrap();
        let store = CredentialStore::new(tempdir.path());
        fs::write(store.path(), b"{not json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_load_expired_is_absent() {
        let tempdir = TempDir::new().unwrap();
        let store = CredentialStore::new(tempdir.path());
        let saved = store.save("token", Duration::from_secs(60)).unwrap();

        assert!(store.load_at(saved.expires_at_millis - 1).is_some());
        assert!(store.load_at(saved.expires_at_millis).is_none());
    }

    #[test]
    fn test_load_tolerates_missing_schema_version() {
        let tempdir = TempDir::new().unwrap();
        let store = CredentialStore::new(tempdir.path());
        fs::write(
            store.path(),
            br#"{"expiresAtMillis": 9999999999999, "token": "t", "legacy": true}"#,
        )
        .unwrap();
        assert_eq!(store.load().unwrap().token, "t");
    }

    #[test]
    fn test_empty_token_is_absent() {
        let tempdir = TempDir::new().unwrap();
        let store = CredentialStore::new(tempdir.path());
        store.save("   ", Duration::from_secs(60)).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_clear_reports_removal() {
        let tempdir = TempDir::new().unwrap();
        let store = CredentialStore::new(tempdir.path());
        assert!(!store.clear().unwrap());
        store.save("token", Duration::from_secs(60)).unwrap();
        assert!(store.clear().unwrap());
        assert!(store.load().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tempdir = TempDir::new().unwrap();
        let store = CredentialStore::new(tempdir.path());
        store.save("token", Duration::from_secs(60)).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
