//! File-backed TTL cache.
//!
//! Each key maps to one JSON file under the meta directory. A record is an
//! envelope `{schemaVersion, expiresAtMillis, ...payload}` where the payload's
//! own fields are flattened in, so the workspace list lands in
//! `workspaces.json {expiresAtMillis, workspaces: [...]}` and a document list in
//! `docs_<owner>_<slug>.json {expiresAtMillis, docs: [...]}`.
//!
//! Reads never fail: a missing, unreadable, corrupt, or expired file is a miss.
//! Access to a key is serialized through a per-key async mutex so concurrent
//! workspace processing cannot observe a half-written file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::constants::{CREDENTIALS_FILE_NAME, USER_CACHE_KEY};
use crate::error::ExportError;
use crate::model::{Document, Workspace};

/// Version written into every on-disk record.
pub const SCHEMA_VERSION: u32 = 1;

/// Cached merged workspace list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceList {
    /// Workspaces from all listing endpoints.
    #[serde(default)]
    pub workspaces: Vec<Workspace>,
}

/// Cached document list for one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentList {
    /// Documents in catalog order.
    #[serde(default)]
    pub docs: Vec<Document>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    #[serde(default)]
    schema_version: u32,
    expires_at_millis: i64,
    #[serde(flatten)]
    payload: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeRef<'a, T> {
    schema_version: u32,
    expires_at_millis: i64,
    #[serde(flatten)]
    payload: &'a T,
}

/// Keyed store with per-entry expiry.
#[derive(Debug)]
pub struct TtlCache {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TtlCache {
    /// Creates a cache rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: DashMap::new(),
        }
    }

    /// Directory holding cache files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`.
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem_for_key(key)))
    }

    /// Returns the cached value for `key` if present and unexpired.
    #[instrument(skip(self), level = "debug")]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        let path = self.path_for(key);

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(key, "cache miss");
                return None;
            }
            Err(error) => {
                warn!(key, path = %path.display(), %error, "unreadable cache entry, treating as miss");
                return None;
            }
        };

        let envelope: Envelope<T> = match serde_json::from_slice(&raw) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(key, path = %path.display(), %error, "corrupt cache entry, treating as miss");
                return None;
            }
        };

        if envelope.expires_at_millis <= now_millis() {
            debug!(
                key,
                expires_at_millis = envelope.expires_at_millis,
                "cache entry expired"
            );
            return None;
        }

        debug!(key, schema_version = envelope.schema_version, "cache hit");
        Some(envelope.payload)
    }

    /// Stores `value` under `key`, valid for `ttl`. Replaces any previous entry whole.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Filesystem`] or [`ExportError::Encode`] if the record
    /// cannot be written.
    #[instrument(skip(self, value), level = "debug")]
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), ExportError> {
        self.put_until(key, value, expiry_from_now(ttl)).await
    }

    async fn put_until<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expires_at_millis: i64,
    ) -> Result<(), ExportError> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        let path = self.path_for(key);

        let record = EnvelopeRef {
            schema_version: SCHEMA_VERSION,
            expires_at_millis,
            payload: value,
        };
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| ExportError::encode(&path, e))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ExportError::filesystem(&self.dir, e))?;

        // Write-then-rename keeps readers from seeing a torn file.
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| ExportError::filesystem(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| ExportError::filesystem(&path, e))?;

        debug!(key, expires_at_millis, "cache entry stored");
        Ok(())
    }

    /// Removes the entry for `key`. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Filesystem`] when removal fails.
    pub async fn invalidate(&self, key: &str) -> Result<bool, ExportError> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(ExportError::filesystem(path, error)),
        }
    }

    /// Deletes every cache file except stored credentials and the user profile.
    /// Returns the number of files removed.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Filesystem`] if the directory cannot be listed or a
    /// file cannot be removed.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn clean(&self) -> Result<usize, ExportError> {
        let keep = [
            CREDENTIALS_FILE_NAME.to_string(),
            format!("{USER_CACHE_KEY}.json"),
        ];

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(error) => return Err(ExportError::filesystem(&self.dir, error)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ExportError::filesystem(&self.dir, e))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_cache_file = name.ends_with(".json") || name.ends_with(".json.tmp");
            if !is_cache_file || keep.iter().any(|k| k == name) {
                continue;
            }
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| ExportError::filesystem(&path, e))?;
            debug!(file = name, "removed cache file");
            removed += 1;
        }

        Ok(removed)
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Cache key for a workspace's document list.
///
/// # Example
///
/// ```
/// use exporter_core::cache::docs_key;
///
/// assert_eq!(docs_key("alice/notes"), "docs_alice_notes");
/// ```
#[must_use]
pub fn docs_key(namespace: &str) -> String {
    format!("docs_{}", namespace.trim().replace('/', "_"))
}

fn file_stem_for_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Current Unix time in milliseconds.
#[must_use]
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Expiry timestamp `ttl` from now, saturating.
#[must_use]
pub(crate) fn expiry_from_now(ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_millis().saturating_add(ttl_ms)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn sample_docs() -> DocumentList {
        DocumentList {
            docs: vec![Document {
                id: "1".to_string(),
                slug: "intro".to_string(),
                title: "Intro".to_string(),
                ..Document::default()
            }],
        }
    }

    #[tokio::test]
    async fn test_put_then_get_within_ttl_returns_value() {
        let tempdir = TempDir::new().unwrap();
        let cache = TtlCache::new(tempdir.path());

        cache
            .put("docs_alice_notes", &sample_docs(), Duration::from_secs(3600))
            .await
            .unwrap();
        let cached: Option<DocumentList> = cache.get("docs_alice_notes").await;
        assert_eq!(cached, Some(sample_docs()));
    }

    #[tokio::test]
    async fn test_get_after_expiry_forced_into_past_is_absent() {
        let tempdir = TempDir::new().unwrap();
        let cache = TtlCache::new(tempdir.path());
        cache
            .put("workspaces", &WorkspaceList::default(), Duration::from_secs(3600))
            .await
            .unwrap();

        let path = cache.path_for("workspaces");
        let mut record: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        record["expiresAtMillis"] = serde_json::json!(now_millis() - 1);
        std::fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

        let cached: Option<WorkspaceList> = cache.get("workspaces").await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let tempdir = TempDir::new().unwrap();
        let cache = TtlCache::new(tempdir.path());
        std::fs::write(cache.path_for("workspaces"), b"{\"expiresAtMillis\": ").unwrap();

        let cached: Option<WorkspaceList> = cache.get("workspaces").await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_missing_entry_is_a_miss() {
        let tempdir = TempDir::new().unwrap();
        let cache = TtlCache::new(tempdir.path().join("not-created-yet"));
        let cached: Option<WorkspaceList> = cache.get("workspaces").await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_file_layout_matches_documented_schema() {
        let tempdir = TempDir::new().unwrap();
        let cache = TtlCache::new(tempdir.path());
        cache
            .put(&docs_key("alice/notes"), &sample_docs(), Duration::from_secs(60))
            .await
            .unwrap();

        let path = tempdir.path().join("docs_alice_notes.json");
        let record: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(record["schemaVersion"], 1);
        assert!(record["expiresAtMillis"].as_i64().unwrap() > now_millis());
        assert_eq!(record["docs"][0]["slug"], "intro");
    }

    #[tokio::test]
    async fn test_tolerant_decoding_ignores_unknown_fields() {
        let tempdir = TempDir::new().unwrap();
        let cache = TtlCache::new(tempdir.path());
        let raw = format!(
            r#"{{"expiresAtMillis": {}, "docs": [{{"id": 7, "title": "T", "future": 1}}], "extra": true}}"#,
            now_millis() + 60_000
        );
        std::fs::write(cache.path_for("docs_a_b"), raw).unwrap();

        let cached: DocumentList = cache.get("docs_a_b").await.unwrap();
        assert_eq!(cached.docs[0].id, "7");
    }

    #[tokio::test]
    async fn test_put_replaces_whole_collection() {
        let tempdir = TempDir::new().unwrap();
        let cache = TtlCache::new(tempdir.path());
        cache
            .put("docs_a_b", &sample_docs(), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .put("docs_a_b", &DocumentList::default(), Duration::from_secs(60))
            .await
            .unwrap();

        let cached: DocumentList = cache.get("docs_a_b").await.unwrap();
        assert!(cached.docs.is_empty());
    }

    #[tokio::test]
    async fn test_clean_keeps_credentials_and_user() {
        let tempdir = TempDir::new().unwrap();
        let cache = TtlCache::new(tempdir.path());
        for name in ["credentials.json", "user.json", "workspaces.json", "docs_a_b.json"] {
            std::fs::write(tempdir.path().join(name), b"{}").unwrap();
        }
        std::fs::write(tempdir.path().join("config.toml"), b"").unwrap();

        let removed = cache.clean().await.unwrap();
        assert_eq!(removed, 2);
        assert!(tempdir.path().join("credentials.json").exists());
        assert!(tempdir.path().join("user.json").exists());
        assert!(tempdir.path().join("config.toml").exists());
        assert!(!tempdir.path().join("workspaces.json").exists());
    }

    #[tokio::test]
    async fn test_concurrent_puts_leave_a_readable_entry() {
        let tempdir = TempDir::new().unwrap();
        let cache = Arc::new(TtlCache::new(tempdir.path()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache
                    .put("docs_a_b", &sample_docs(), Duration::from_secs(60))
                    .await
                    .unwrap();
                let _: Option<DocumentList> = cache.get("docs_a_b").await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let cached: Option<DocumentList> = cache.get("docs_a_b").await;
        assert_eq!(cached, Some(sample_docs()));
    }

    #[test]
    fn test_docs_key_flattens_namespace() {
        assert_eq!(docs_key("alice/notes"), "docs_alice_notes");
    }
}
