//! Export configuration: the explicit settings object handed to every component,
//! plus the optional TOML file that seeds it.
//!
//! Resolution order for the file: `$XDG_CONFIG_HOME/yuque-exporter/config.toml`,
//! then `$HOME/.config/yuque-exporter/config.toml`. Values given on the command
//! line override file values.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CACHE_TTL, DEFAULT_CDN_DOMAIN, DEFAULT_CREDENTIALS_TTL,
    DEFAULT_DOC_DELAY, DEFAULT_HOST, DEFAULT_IMAGE_PREFIX, DEFAULT_IMAGE_WORKERS,
    MAX_IMAGE_WORKERS, MIN_IMAGE_WORKERS, REQUEST_TIMEOUT_SECS,
};
use crate::model::RenameMode;
use crate::transport::DEFAULT_MAX_RETRIES;
use crate::user_agent;

const APP_DIR_NAME: &str = "yuque-exporter";
/// File name of the TOML config inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";
const MAX_DOC_DELAY_MS: u64 = 60_000;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No suitable user config directory is available.
    #[error("unable to determine config directory (set XDG_CONFIG_HOME or HOME)")]
    ConfigDirUnavailable,

    /// Config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML or has unknown keys.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// The TOML error, including line information.
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Offending key.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Human-readable accepted range.
        expected: &'static str,
    },
}

/// What to do when a whole workspace fails for a reason other than expired credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceFailurePolicy {
    /// Stop the run at the first failed workspace.
    #[default]
    Abort,
    /// Record the failure and move on to the next workspace.
    Continue,
}

/// Settings shared by all exporter components.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Base URL of the host, without a trailing slash.
    pub host: String,
    /// Referer header value.
    pub referer: String,
    /// User-Agent header value.
    pub user_agent: String,
    /// Directory holding credentials and cache files.
    pub meta_dir: PathBuf,
    /// Root directory for exported workspaces.
    pub output_dir: PathBuf,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// TTL of cached workspace and document lists.
    pub cache_ttl: Duration,
    /// TTL of a stored session token.
    pub credentials_ttl: Duration,
    /// Pause between two document fetches in one workspace.
    pub doc_delay: Duration,
    /// Maximum attempts per request, including the first.
    pub max_retries: u32,
    /// Policy for non-credential workspace failures.
    pub workspace_failure_policy: WorkspaceFailurePolicy,
    /// Run the image pass after exporting.
    pub download_images: bool,
    /// Image download workers (1-30).
    pub image_workers: usize,
    /// Image naming policy.
    pub image_rename_mode: RenameMode,
    /// File name prefix for sequential image names.
    pub image_file_prefix: String,
    /// Prefix written in front of rewritten image references.
    pub image_url_prefix: String,
    /// CDN host serving images. Informational only.
    pub cdn_domain: String,
}

impl ExportConfig {
    /// Creates a configuration with defaults rooted at the given directories.
    #[must_use]
    pub fn new(meta_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            referer: user_agent::default_referer(DEFAULT_HOST),
            user_agent: user_agent::MOBILE_USER_AGENT.to_string(),
            meta_dir: meta_dir.into(),
            output_dir: output_dir.into(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            cache_ttl: DEFAULT_CACHE_TTL,
            credentials_ttl: DEFAULT_CREDENTIALS_TTL,
            doc_delay: DEFAULT_DOC_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            workspace_failure_policy: WorkspaceFailurePolicy::Abort,
            download_images: false,
            image_workers: DEFAULT_IMAGE_WORKERS,
            image_rename_mode: RenameMode::Sequential,
            image_file_prefix: DEFAULT_IMAGE_PREFIX.to_string(),
            image_url_prefix: String::new(),
            cdn_domain: DEFAULT_CDN_DOMAIN.to_string(),
        }
    }

    /// Points the configuration at another host, updating the Referer to match.
    #[must_use]
    pub fn with_host(mut self, host: &str) -> Self {
        let host = host.trim_end_matches('/');
        self.host = host.to_string();
        self.referer = user_agent::default_referer(host);
        self
    }

    /// Overlays values present in a config file.
    pub fn apply_file(&mut self, file: &FileConfig) {
        if let Some(host) = &file.host {
            let host = host.trim_end_matches('/');
            self.host = host.to_string();
            self.referer = user_agent::default_referer(host);
        }
        if let Some(output_dir) = &file.output_dir {
            self.output_dir.clone_from(output_dir);
        }
        if let Some(meta_dir) = &file.meta_dir {
            self.meta_dir.clone_from(meta_dir);
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(hours) = file.cache_ttl_hours {
            self.cache_ttl = Duration::from_secs(hours * 60 * 60);
        }
        if let Some(ms) = file.doc_delay_ms {
            self.doc_delay = Duration::from_millis(ms);
        }
        if let Some(max_retries) = file.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(policy) = file.workspace_failure_policy {
            self.workspace_failure_policy = policy;
        }
        if let Some(download_images) = file.download_images {
            self.download_images = download_images;
        }
        if let Some(workers) = file.image_workers {
            self.image_workers = workers;
        }
        if let Some(mode) = file.image_rename_mode {
            self.image_rename_mode = mode;
        }
        if let Some(prefix) = &file.image_file_prefix {
            self.image_file_prefix.clone_from(prefix);
        }
        if let Some(prefix) = &file.image_url_prefix {
            self.image_url_prefix.clone_from(prefix);
        }
        if let Some(cdn) = &file.cdn_domain {
            self.cdn_domain.clone_from(cdn);
        }
    }

    /// Validates ranges that components rely on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_image_workers(self.image_workers)?;
        validate_timeout_secs("request_timeout_secs", self.request_timeout.as_secs())?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout.as_secs())?;
        let delay_ms = u64::try_from(self.doc_delay.as_millis()).unwrap_or(u64::MAX);
        validate_doc_delay_ms(delay_ms)?;
        let scheme_ok = url::Url::parse(&self.host)
            .is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.has_host());
        if !scheme_ok {
            return Err(ConfigError::OutOfRange {
                field: "host",
                value: self.host.clone(),
                expected: "an http:// or https:// URL",
            });
        }
        Ok(())
    }
}

/// TOML-backed file configuration. Every key is optional; unknown keys are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Host base URL.
    pub host: Option<String>,
    /// Default output directory.
    pub output_dir: Option<PathBuf>,
    /// Directory for credentials and cache.
    pub meta_dir: Option<PathBuf>,
    /// Request timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Cache TTL in hours.
    pub cache_ttl_hours: Option<u64>,
    /// Delay between document fetches in milliseconds.
    pub doc_delay_ms: Option<u64>,
    /// Maximum attempts per request.
    pub max_retries: Option<u32>,
    /// Workspace failure policy (`abort` or `continue`).
    pub workspace_failure_policy: Option<WorkspaceFailurePolicy>,
    /// Run the image pass after export.
    pub download_images: Option<bool>,
    /// Image download workers.
    pub image_workers: Option<usize>,
    /// Image naming policy (`sequential` or `preserve`).
    pub image_rename_mode: Option<RenameMode>,
    /// Sequential image file prefix.
    pub image_file_prefix: Option<String>,
    /// Prefix for rewritten image references.
    pub image_url_prefix: Option<String>,
    /// Image CDN host.
    pub cdn_domain: Option<String>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(workers) = self.image_workers {
            validate_image_workers(workers)?;
        }
        if let Some(secs) = self.request_timeout_secs {
            validate_timeout_secs("request_timeout_secs", secs)?;
        }
        if let Some(secs) = self.connect_timeout_secs {
            validate_timeout_secs("connect_timeout_secs", secs)?;
        }
        if let Some(ms) = self.doc_delay_ms {
            validate_doc_delay_ms(ms)?;
        }
        if let Some(retries) = self.max_retries
            && !(1..=10).contains(&retries)
        {
            return Err(ConfigError::OutOfRange {
                field: "max_retries",
                value: retries.to_string(),
                expected: "1..=10",
            });
        }
        if let Some(hours) = self.cache_ttl_hours
            && !(1..=24 * 30).contains(&hours)
        {
            return Err(ConfigError::OutOfRange {
                field: "cache_ttl_hours",
                value: hours.to_string(),
                expected: "1..=720",
            });
        }
        Ok(())
    }
}

fn validate_image_workers(value: usize) -> Result<(), ConfigError> {
    if !(MIN_IMAGE_WORKERS..=MAX_IMAGE_WORKERS).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field: "image_workers",
            value: value.to_string(),
            expected: "1..=30",
        });
    }
    Ok(())
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected: "1..=3600",
        });
    }
    Ok(())
}

fn validate_doc_delay_ms(value: u64) -> Result<(), ConfigError> {
    if value > MAX_DOC_DELAY_MS {
        return Err(ConfigError::OutOfRange {
            field: "doc_delay_ms",
            value: value.to_string(),
            expected: "0..=60000",
        });
    }
    Ok(())
}

/// Parses and validates a config file.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read, parsed, or validated.
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

fn parse_config_str(raw: &str) -> Result<FileConfig, toml::de::Error> {
    toml::from_str(raw)
}

/// Loads the config file from its default location if it exists.
///
/// # Errors
///
/// Returns [`ConfigError`] if a file exists but is unreadable or invalid.
pub fn load_default_file_config() -> Result<Option<(PathBuf, FileConfig)>, ConfigError> {
    let Ok(dir) = default_config_dir() else {
        return Ok(None);
    };
    let path = dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let config = load_file_config(&path)?;
    Ok(Some((path, config)))
}

/// Default directory for credentials, cache, and the config file.
///
/// # Errors
///
/// Returns [`ConfigError::ConfigDirUnavailable`] if no usable directory is found.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    resolve_config_dir(
        sanitize_env_path(env::var_os("XDG_CONFIG_HOME")),
        sanitize_env_path(env::var_os("HOME")),
        sanitize_env_path(env::var_os("APPDATA")),
    )
}

fn sanitize_env_path(value: Option<OsString>) -> Option<PathBuf> {
    let value = value?;
    if value.to_string_lossy().trim().is_empty() {
        return None;
    }

    Some(PathBuf::from(value))
}

fn resolve_config_dir(
    xdg_config_home: Option<PathBuf>,
    home: Option<PathBuf>,
    app_data: Option<PathBuf>,
) -> Result<PathBuf, ConfigError> {
    if let Some(xdg) = xdg_config_home {
        return Ok(xdg.join(APP_DIR_NAME));
    }
    if let Some(home) = home {
        return Ok(home.join(".config").join(APP_DIR_NAME));
    }
    if let Some(app_data) = app_data {
        return Ok(app_data.join(APP_DIR_NAME));
    }

    Err(ConfigError::ConfigDirUnavailable)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_export_config_defaults() {
        let config = ExportConfig::new("/tmp/meta", "/tmp/out");
        assert_eq!(config.host, "https://www.yuque.com");
        assert_eq!(config.referer, "https://www.yuque.com/login");
        assert_eq!(config.image_workers, 5);
        assert_eq!(config.doc_delay, Duration::from_millis(500));
        assert_eq!(config.cache_ttl, Duration::from_secs(86_400));
        assert_eq!(config.image_rename_mode, RenameMode::Sequential);
        assert_eq!(config.workspace_failure_policy, WorkspaceFailurePolicy::Abort);
        config.validate().unwrap();
    }

    #[test]
    fn test_with_host_updates_referer() {
        let config = ExportConfig::new("/m", "/o").with_host("http://127.0.0.1:9000/");
        assert_eq!(config.host, "http://127.0.0.1:9000");
        assert_eq!(config.referer, "http://127.0.0.1:9000/login");
    }

    #[test]
    fn test_validate_rejects_worker_count_out_of_range() {
        let mut config = ExportConfig::new("/m", "/o");
        config.image_workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                field: "image_workers",
                ..
            })
        ));
        config.image_workers = 31;
        assert!(config.validate().is_err());
        config.image_workers = 30;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config_str_reads_known_keys() {
        let parsed = parse_config_str(
            r#"
output_dir = "/data/docs"
image_workers = 12
image_rename_mode = "preserve"
workspace_failure_policy = "continue"
doc_delay_ms = 250
"#,
        )
        .unwrap();
        assert_eq!(parsed.output_dir, Some(PathBuf::from("/data/docs")));
        assert_eq!(parsed.image_workers, Some(12));
        assert_eq!(parsed.image_rename_mode, Some(RenameMode::Preserve));
        assert_eq!(
            parsed.workspace_failure_policy,
            Some(WorkspaceFailurePolicy::Continue)
        );

        let mut config = ExportConfig::new("/m", "/o");
        config.apply_file(&parsed);
        assert_eq!(config.output_dir, PathBuf::from("/data/docs"));
        assert_eq!(config.image_workers, 12);
        assert_eq!(config.doc_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_parse_config_str_rejects_unknown_key() {
        let error = parse_config_str("concurrency = 4\n").unwrap_err();
        assert!(error.to_string().contains("concurrency"), "{error}");
    }

    #[test]
    fn test_file_config_validate_rejects_out_of_range() {
        let config = FileConfig {
            request_timeout_secs: Some(0),
            ..FileConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FileConfig {
            doc_delay_ms: Some(60_001),
            ..FileConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_file_config_reports_path() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("config.toml");
        fs::write(&path, "image_workers = \"many\"\n").unwrap();

        let error = load_file_config(&path).unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
        assert!(error.to_string().contains("config.toml"));
    }

    #[test]
    fn test_resolve_config_dir_prefers_xdg_over_home() {
        let resolved = resolve_config_dir(
            Some(PathBuf::from("/tmp/xdg")),
            Some(PathBuf::from("/tmp/home")),
            Some(PathBuf::from("/tmp/appdata")),
        )
        .unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/xdg/yuque-exporter"));
    }

    #[test]
    fn test_resolve_config_dir_falls_back_to_home() {
        let resolved =
            resolve_config_dir(None, Some(PathBuf::from("/tmp/home")), None).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/home/.config/yuque-exporter"));
    }

    #[test]
    fn test_resolve_config_dir_errors_when_all_sources_missing() {
        let result = resolve_config_dir(None, None, None);
        assert!(matches!(result, Err(ConfigError::ConfigDirUnavailable)));
    }

    #[test]
    fn test_sanitize_env_path_ignores_blank_values() {
        assert_eq!(sanitize_env_path(Some(OsString::from("  "))), None);
        assert_eq!(
            sanitize_env_path(Some(OsString::from("/x"))),
            Some(PathBuf::from("/x"))
        );
    }
}
