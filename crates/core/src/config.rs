//! Configuration types shared across crates.

use crate::duration::parse_duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest file a client may declare or upload, in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Largest single chunk body accepted, in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Largest JSON body accepted by the artifact endpoints, in bytes.
    #[serde(default = "default_max_json_body")]
    pub max_json_body: u64,
    /// Mount the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_upload_size() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_max_json_body() -> u64 {
    16 * 1024 * 1024
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_size: default_max_upload_size(),
            max_chunk_size: default_max_chunk_size(),
            max_json_body: default_max_json_body(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("server.max_chunk_size cannot be 0".to_string());
        }
        if self.max_upload_size == 0 {
            return Err("server.max_upload_size cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Filesystem locations for metadata, in-flight chunks and merged uploads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// One `<id>.json` metadata document per artifact.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// `<upload_id>/<chunk_number>` files while an upload is in flight.
    #[serde(default = "default_temp_chunk_dir")]
    pub temp_chunk_dir: PathBuf,
    /// `<upload_id>/<file_name>` merged files plus completion markers.
    #[serde(default = "default_final_upload_dir")]
    pub final_upload_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/metadata")
}

fn default_temp_chunk_dir() -> PathBuf {
    PathBuf::from("./data/chunks")
}

fn default_final_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            temp_chunk_dir: default_temp_chunk_dir(),
            final_upload_dir: default_final_upload_dir(),
        }
    }
}

impl StorageConfig {
    /// All three directories under one root.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            data_dir: root.join("metadata"),
            temp_chunk_dir: root.join("chunks"),
            final_upload_dir: root.join("uploads"),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let dirs = [
            ("storage.data_dir", &self.data_dir),
            ("storage.temp_chunk_dir", &self.temp_chunk_dir),
            ("storage.final_upload_dir", &self.final_upload_dir),
        ];
        for (name, dir) in dirs {
            if dir.as_os_str().is_empty() {
                return Err(format!("{name} cannot be empty"));
            }
        }
        // Burns remove directories recursively under these roots, so they must not alias.
        for (i, (name_a, a)) in dirs.iter().enumerate() {
            for (name_b, b) in dirs.iter().skip(i + 1) {
                if a == b {
                    return Err(format!("{name_a} and {name_b} must be different directories"));
                }
            }
        }
        Ok(())
    }
}

/// How the primary expiry duration is chosen.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExpirationMode {
    /// Always use the configured default duration.
    #[default]
    Forced,
    /// Use the client's requested duration when it is valid.
    Free,
}

/// Expiration configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExpirationConfig {
    /// When false, artifacts get a far-future expiry.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: ExpirationMode,
    /// Duration string, e.g. "24h".
    #[serde(default = "default_expiration_duration")]
    pub default_duration: String,
    #[serde(default)]
    pub access_window: AccessWindowConfig,
}

fn default_true() -> bool {
    true
}

fn default_expiration_duration() -> String {
    "24h".to_string()
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ExpirationMode::default(),
            default_duration: default_expiration_duration(),
            access_window: AccessWindowConfig::default(),
        }
    }
}

impl ExpirationConfig {
    pub fn validate(&self) -> Result<(), String> {
        check_positive_duration("expiration.default_duration", &self.default_duration)?;
        self.access_window.validate()
    }
}

/// First-access window configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessWindowConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Window used when no rule matches.
    #[serde(default = "default_access_window_duration")]
    pub default_duration: String,
    /// Evaluated in order; the first match wins.
    #[serde(default)]
    pub rules: Vec<AccessWindowRule>,
}

fn default_access_window_duration() -> String {
    "10m".to_string()
}

impl Default for AccessWindowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_duration: default_access_window_duration(),
            rules: Vec::new(),
        }
    }
}

impl AccessWindowConfig {
    pub fn validate(&self) -> Result<(), String> {
        check_positive_duration(
            "expiration.access_window.default_duration",
            &self.default_duration,
        )?;
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.types.is_empty() {
                return Err(format!(
                    "expiration.access_window.rules[{index}].type cannot be empty"
                ));
            }
            if rule.max_size_mb > 0 && rule.min_size_mb >= rule.max_size_mb {
                return Err(format!(
                    "expiration.access_window.rules[{index}]: min_size_mb must be below max_size_mb"
                ));
            }
            check_positive_duration(
                &format!("expiration.access_window.rules[{index}].duration"),
                &rule.duration,
            )?;
        }
        Ok(())
    }
}

/// One access-window rule.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessWindowRule {
    /// `"*"`, `"text"`, or lowercase file extensions without the dot.
    #[serde(rename = "type")]
    pub types: Vec<String>,
    /// Inclusive lower bound in MiB (0 = unbounded). Files only.
    #[serde(default)]
    pub min_size_mb: u64,
    /// Exclusive upper bound in MiB (0 = unbounded). Files only.
    #[serde(default)]
    pub max_size_mb: u64,
    pub duration: String,
}

fn check_positive_duration(field: &str, value: &str) -> Result<(), String> {
    match parse_duration(value) {
        Ok(d) if d.is_positive() => Ok(()),
        Ok(_) => Err(format!("{field} must be positive, got {value:?}")),
        Err(e) => Err(format!("{field}: {e}")),
    }
}

/// Background cleanup configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Run the periodic metadata sweep (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between sweeps (default: 60).
    #[serde(default = "default_cleanup_interval_secs")]
    pub interval_secs: u64,
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.interval_secs == 0 {
            return Err("cleanup.interval_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Burn worker pool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BurnConfig {
    /// Concurrent burn workers (default: 4).
    #[serde(default = "default_burn_workers")]
    pub workers: usize,
    /// Pending burns accepted before new requests are rejected (default: 1024).
    #[serde(default = "default_burn_queue_depth")]
    pub queue_depth: usize,
    /// Attempts at removing the merged-file directory (default: 5).
    #[serde(default = "default_burn_retry_attempts")]
    pub retry_attempts: u32,
    /// Pause between removal attempts in milliseconds (default: 1000).
    #[serde(default = "default_burn_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_burn_workers() -> usize {
    4
}

fn default_burn_queue_depth() -> usize {
    1024
}

fn default_burn_retry_attempts() -> u32 {
    5
}

fn default_burn_retry_delay_ms() -> u64 {
    1000
}

impl Default for BurnConfig {
    fn default() -> Self {
        Self {
            workers: default_burn_workers(),
            queue_depth: default_burn_queue_depth(),
            retry_attempts: default_burn_retry_attempts(),
            retry_delay_ms: default_burn_retry_delay_ms(),
        }
    }
}

impl BurnConfig {
    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("burn.workers cannot be 0".to_string());
        }
        if self.queue_depth == 0 {
            return Err("burn.queue_depth cannot be 0".to_string());
        }
        if self.retry_attempts == 0 {
            return Err("burn.retry_attempts cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub expiration: ExpirationConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub burn: BurnConfig,
}

impl AppConfig {
    /// Create a test configuration rooted at `root`.
    ///
    /// **For testing only.** The cleanup sweep is off and burns retry quickly.
    pub fn for_testing(root: impl AsRef<Path>) -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::rooted_at(root),
            expiration: ExpirationConfig::default(),
            cleanup: CleanupConfig {
                enabled: false,
                ..CleanupConfig::default()
            },
            burn: BurnConfig {
                workers: 2,
                queue_depth: 64,
                retry_attempts: 2,
                retry_delay_ms: 10,
            },
        }
    }

    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.expiration.validate()?;
        self.cleanup.validate()?;
        self.burn.validate()
    }
}
