//! Layered configuration, built the way the teacher builds it: defaults
//! baked into `serde(default = ...)`, an optional file source, then an
//! env-prefixed override — loaded once at startup and carried through
//! the composition root as a plain value, not re-read afterward.

use crate::error::{Error, Result};
use byte_unit::Byte;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub tiers: TierConfig,
    pub quota: QuotaConfig,
    pub upload: UploadConfig,
    pub download: DownloadConfig,
    pub rate_limit: RateLimitConfig,
    pub workers: WorkersConfig,
}

#[derive(Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: Byte,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
}

/// Hot/cold tier base paths. Both currently resolve under `data_path`
/// (see `StorageBackend`'s `<basePath>/<tier>/...` layout) but are
/// configured independently since a real deployment mounts the cold
/// tier on different, slower hardware.
#[derive(Debug, Deserialize, Clone)]
pub struct TierConfig {
    #[serde(default = "default_hot_path")]
    pub hot_path: PathBuf,

    #[serde(default = "default_cold_path")]
    pub cold_path: PathBuf,
}

/// Free-tier quota defaults, overridable in config for deployments that
/// want different numbers than spec.md's §3 table without a code change.
/// `-1` means unlimited, same convention as `QuotaLimits`. Read by
/// `QuotaAccountant`, not by the model layer, so `DefaultQuotas::for_role`
/// stays a pure function of its arguments.
#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    #[serde(default = "default_free_max_storage")]
    pub free_max_storage: i64,

    #[serde(default = "default_free_max_file_size")]
    pub free_max_file_size: i64,

    #[serde(default = "default_free_max_files")]
    pub free_max_files: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_max_storage: default_free_max_storage(),
            free_max_file_size: default_free_max_file_size(),
            free_max_files: default_free_max_files(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: Byte,

    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: i64,

    #[serde(default = "default_expiry_days_free")]
    pub expiry_days_free: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_metadata_cache_ttl_secs")]
    pub metadata_cache_ttl_secs: u64,

    #[serde(default = "default_expiry_extension_days")]
    pub expiry_extension_days: i64,
}

/// Per-`(type, role tier)` sliding-window limits. `window_secs` is the
/// sliding window width; `limit` is the max allowed requests inside it.
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitRule {
    pub window_secs: i64,
    pub limit: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_upload_rate_limit")]
    pub upload: RateLimitRule,

    #[serde(default = "default_download_rate_limit")]
    pub download: RateLimitRule,

    #[serde(default = "default_auth_rate_limit")]
    pub auth: RateLimitRule,

    #[serde(default = "default_abuse_threshold")]
    pub abuse_threshold: u32,

    #[serde(default = "default_abuse_window_secs")]
    pub abuse_window_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkersConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_hot_to_cold_days")]
    pub hot_to_cold_days: i64,

    #[serde(default = "default_cold_to_hot_downloads")]
    pub cold_to_hot_downloads: u64,

    #[serde(default = "default_session_purge_days")]
    pub session_purge_days: i64,

    #[serde(default = "default_orphan_chunk_age_secs")]
    pub orphan_chunk_age_secs: i64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_payload_size() -> Byte {
    Byte::from_u64_with_unit(512, byte_unit::Unit::MiB).unwrap()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_hot_path() -> PathBuf {
    PathBuf::from("data/hot")
}

fn default_cold_path() -> PathBuf {
    PathBuf::from("data/cold")
}

fn default_free_max_storage() -> i64 {
    50 * 1024 * 1024 * 1024
}

fn default_free_max_file_size() -> i64 {
    10 * 1024 * 1024 * 1024
}

fn default_free_max_files() -> i64 {
    1000
}

fn default_chunk_size() -> Byte {
    Byte::from_u64_with_unit(10, byte_unit::Unit::MiB).unwrap()
}

fn default_session_ttl_secs() -> i64 {
    24 * 3600
}

fn default_expiry_days_free() -> i64 {
    5
}

fn default_metadata_cache_ttl_secs() -> u64 {
    300
}

fn default_expiry_extension_days() -> i64 {
    5
}

fn default_upload_rate_limit() -> RateLimitRule {
    RateLimitRule { window_secs: 3600, limit: 100 }
}

fn default_download_rate_limit() -> RateLimitRule {
    RateLimitRule { window_secs: 3600, limit: 1000 }
}

fn default_auth_rate_limit() -> RateLimitRule {
    RateLimitRule { window_secs: 900, limit: 10 }
}

fn default_abuse_threshold() -> u32 {
    100
}

fn default_abuse_window_secs() -> i64 {
    3600
}

fn default_tick_interval_secs() -> u64 {
    3600
}

fn default_batch_size() -> usize {
    100
}

fn default_hot_to_cold_days() -> i64 {
    30
}

fn default_cold_to_hot_downloads() -> u64 {
    5
}

fn default_session_purge_days() -> i64 {
    7
}

fn default_orphan_chunk_age_secs() -> i64 {
    3600
}

impl Config {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if config_path.is_none() {
            #[cfg(not(debug_assertions))]
            {
                builder =
                    builder.add_source(config::File::with_name("/etc/tiervault/config").required(false));
            }

            #[cfg(debug_assertions)]
            {
                builder = builder.add_source(config::File::with_name("config").required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(
                config::File::with_name(path).required(true).format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(config::Environment::with_prefix("TIERVAULT").separator("__"));

        let built = builder
            .build()
            .map_err(|e| Error::Config { msg: format!("failed to load configuration: {e}") })?;

        let mut config: Self = built
            .try_deserialize()
            .map_err(|e| Error::Config { msg: format!("failed to deserialize configuration: {e}") })?;

        config.storage.data_path = absolutize(&config.storage.data_path)?;
        config.tiers.hot_path = absolutize(&config.tiers.hot_path)?;
        config.tiers.cold_path = absolutize(&config.tiers.cold_path)?;

        Ok(config)
    }
}

fn absolutize(path: &PathBuf) -> Result<PathBuf> {
    let mut path = path.clone();
    if !path.is_absolute() {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config { msg: format!("failed to get current directory: {e}") })?;
        path = cwd.join(path);
    }
    // `canonicalize` only succeeds if the path already exists; best-effort
    // since the data directory is created on first use, not at load time.
    if let Ok(canonical) = path.canonicalize() {
        path = canonical;
    }
    Ok(path)
}

impl Default for Config {
    fn default() -> Self {
        let data_path = absolutize(&default_data_path()).unwrap_or_else(|_| default_data_path());
        let hot_path = absolutize(&default_hot_path()).unwrap_or_else(|_| default_hot_path());
        let cold_path = absolutize(&default_cold_path()).unwrap_or_else(|_| default_cold_path());

        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                max_payload_size: default_max_payload_size(),
                redis_url: default_redis_url(),
            },
            storage: StorageConfig { data_path },
            tiers: TierConfig { hot_path, cold_path },
            quota: QuotaConfig {
                free_max_storage: default_free_max_storage(),
                free_max_file_size: default_free_max_file_size(),
                free_max_files: default_free_max_files(),
            },
            upload: UploadConfig {
                chunk_size: default_chunk_size(),
                session_ttl_secs: default_session_ttl_secs(),
                expiry_days_free: default_expiry_days_free(),
            },
            download: DownloadConfig {
                metadata_cache_ttl_secs: default_metadata_cache_ttl_secs(),
                expiry_extension_days: default_expiry_extension_days(),
            },
            rate_limit: RateLimitConfig {
                upload: default_upload_rate_limit(),
                download: default_download_rate_limit(),
                auth: default_auth_rate_limit(),
                abuse_threshold: default_abuse_threshold(),
                abuse_window_secs: default_abuse_window_secs(),
            },
            workers: WorkersConfig {
                tick_interval_secs: default_tick_interval_secs(),
                batch_size: default_batch_size(),
                hot_to_cold_days: default_hot_to_cold_days(),
                cold_to_hot_downloads: default_cold_to_hot_downloads(),
                session_purge_days: default_session_purge_days(),
                orphan_chunk_age_secs: default_orphan_chunk_age_secs(),
            },
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field(
                "max_payload_size",
                &format!("{}", self.max_payload_size.get_appropriate_unit(byte_unit::UnitType::Binary)),
            )
            .field("redis_url", &"<redacted>")
            .finish()
    }
}

impl std::fmt::Debug for UploadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadConfig")
            .field("chunk_size", &format!("{}", self.chunk_size.get_appropriate_unit(byte_unit::UnitType::Binary)))
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("expiry_days_free", &self.expiry_days_free)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn relative_data_path_becomes_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(
            &config_path,
            r#"
[server]
host = "127.0.0.1"
port = 3000

[storage]
data_path = "./my_data"

[tiers]
hot_path = "./my_data/hot"
cold_path = "./my_data/cold"
"#,
        )
        .unwrap();

        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();
        let config = Config::load(Some(config_path.to_str().unwrap()));
        std::env::set_current_dir(original_dir).unwrap();

        let config = config.unwrap();
        assert!(config.storage.data_path.is_absolute());
        assert!(config.storage.data_path.to_string_lossy().ends_with("my_data"));
    }

    #[test]
    fn default_has_finite_free_tier_quota() {
        let config = Config::default();
        assert_eq!(config.quota.free_max_files, 1000);
        assert_eq!(config.upload.expiry_days_free, 5);
    }
}
