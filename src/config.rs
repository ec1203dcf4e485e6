//! Configuration types for the engine (§3 "Supplemental types", `EngineConfig`).
//!
//! The `ServerConfig`/`RetryConfig` shapes, the `default_*()` helper
//! convention, the `duration_serde`/`optional_duration_serde` modules, and
//! `impl From<ServerConfig> for nntp_rs::ServerConfig` carry over unchanged.
//! Everything tied to the REST/webhook/RSS/DirectUnpack/SQLite surfaces is
//! out of scope (see `DESIGN.md`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::queue_script::QueueScriptConfig;

/// Root configuration for the engine (C9).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// News servers, across all levels/groups.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Where finished files are written, grouped by category.
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,

    /// Destination used when an NZB's category has no matching entry in
    /// `categories` (or no category at all).
    #[serde(default = "default_destination_dir")]
    pub default_destination_dir: PathBuf,

    /// Scratch directory for in-flight article segments, one subdirectory
    /// per NZB (§4.5 "a per-download segments directory").
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Path of the persisted queue snapshot (§4.8/§6 "single file per
    /// queue generation").
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Health threshold below which an NZB is marked `deleteStatus=health`
    /// (§4.4 "Retry policy").
    #[serde(default = "default_health_threshold")]
    pub health_threshold: f64,

    /// Retry/backoff tuning shared by the server pool's quarantine timers.
    #[serde(default)]
    pub retry: RetryConfig,

    /// PAR repair time limit in minutes, 0 = unlimited (§4.6 "Repair timeout").
    #[serde(default)]
    pub par_time_limit_min: u32,

    /// Percent tolerance used when matching a history dupe's file size
    /// against the expected size (§4.6 "Dupe-source selection").
    #[serde(default = "default_dupe_size_tolerance_percent")]
    pub dupe_size_tolerance_percent: u32,

    /// File-collision handling for assembled output files.
    #[serde(default)]
    pub file_collision: FileCollisionAction,

    /// Queue-script definitions and coalescing policy (C7).
    #[serde(default)]
    pub queue_scripts: QueueScriptConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            categories: Vec::new(),
            default_destination_dir: default_destination_dir(),
            temp_dir: default_temp_dir(),
            state_path: default_state_path(),
            health_threshold: default_health_threshold(),
            retry: RetryConfig::default(),
            par_time_limit_min: 0,
            dupe_size_tolerance_percent: default_dupe_size_tolerance_percent(),
            file_collision: FileCollisionAction::default(),
            queue_scripts: QueueScriptConfig::default(),
        }
    }
}

/// One configured news server (§3 `ServerConfig`, §4.3 "Server (NewsServer)").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server hostname.
    pub host: String,

    /// Server port (typically 119 for unencrypted, 563 for TLS).
    pub port: u16,

    /// Use TLS (implicit TLS, not STARTTLS).
    #[serde(default)]
    pub tls: bool,

    /// Username for authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for authentication.
    #[serde(default)]
    pub password: Option<String>,

    /// Number of connections to maintain.
    #[serde(default = "default_connections")]
    pub connections: u32,

    /// Fallback tier: 0 = primary, higher = tried only once lower levels
    /// are exhausted for an article (§4.3 "Level").
    #[serde(default)]
    pub level: i32,

    /// Group id within a level: alternative sources for the same article,
    /// tried in declared order before moving to the next level (§4.3
    /// "Group").
    #[serde(default)]
    pub group: i32,

    /// Whether this server is used at all.
    #[serde(default = "default_true")]
    pub active: bool,

    /// If `true`, the level is considered satisfied even without this
    /// server (a server optional "for the level").
    #[serde(default)]
    pub optional: bool,

    /// Number of ARTICLE commands to pipeline per connection.
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: usize,
}

/// Retry configuration for transient failures, reused by [`crate::retry`]
/// and as the base backoff tuning for [`crate::server_pool::ServerPool`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry.
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries.
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Per-category destination/script routing (§4.2 "set-category" edit).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Category name, matched against `NzbInfo::category`.
    pub name: String,
    /// Where finished files for this category are written.
    pub destination: PathBuf,
}

/// File-collision handling strategy for assembled output files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to the filename.
    #[default]
    Rename,
    /// Overwrite the existing file.
    Overwrite,
    /// Leave the existing file and fail.
    Skip,
}

fn default_destination_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./state.dat")
}

fn default_health_threshold() -> f64 {
    0.95
}

fn default_dupe_size_tolerance_percent() -> u32 {
    10
}

fn default_connections() -> u32 {
    4
}

fn default_pipeline_depth() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper, kept for config surfaces that
// need an unset-vs-zero distinction (e.g. a future unlimited script timeout).
#[allow(dead_code)]
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

impl From<ServerConfig> for nntp_rs::ServerConfig {
    fn from(config: ServerConfig) -> Self {
        nntp_rs::ServerConfig {
            host: config.host,
            port: config.port,
            tls: config.tls,
            allow_insecure_tls: false,
            username: config.username.unwrap_or_default(),
            password: config.password.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_default_has_no_servers_and_sane_thresholds() {
        let config = EngineConfig::default();
        assert!(config.servers.is_empty());
        assert!(config.health_threshold > 0.0 && config.health_threshold <= 1.0);
        assert_eq!(config.par_time_limit_min, 0);
    }

    #[test]
    fn server_config_deserializes_with_defaults() {
        let json = r#"{"host": "news.example.com", "port": 563}"#;
        let server: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(server.connections, 4);
        assert_eq!(server.level, 0);
        assert!(server.active);
        assert!(!server.optional);
    }

    #[test]
    fn retry_config_round_trips_through_json() {
        let retry = RetryConfig::default();
        let json = serde_json::to_string(&retry).unwrap();
        let restored: RetryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.max_attempts, retry.max_attempts);
        assert_eq!(restored.initial_delay, retry.initial_delay);
    }

    #[test]
    fn server_config_converts_into_nntp_rs_server_config() {
        let server = ServerConfig {
            host: "news.example.com".into(),
            port: 563,
            tls: true,
            username: Some("user".into()),
            password: None,
            connections: 10,
            level: 0,
            group: 0,
            active: true,
            optional: false,
            pipeline_depth: 10,
        };
        let converted: nntp_rs::ServerConfig = server.into();
        assert_eq!(converted.host, "news.example.com");
        assert_eq!(converted.password, "");
    }
}
