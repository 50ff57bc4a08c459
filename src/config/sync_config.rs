//! Paraclate configuration - sync identity, cadence, retry and server settings
//!
//! Every struct implements `Default`, so an empty or missing TOML file yields
//! a runnable configuration. `SyncConfig` is the live, mutable part; the
//! other sections are read once at startup.

use chrono::{NaiveTime, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root of `paraclate.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParaclateConfig {
    /// Connection identity, report cadence, attunement
    #[serde(default)]
    pub sync: SyncConfig,

    /// Retry budgets and backoff
    #[serde(default)]
    pub queue: QueueConfig,

    /// Connection health tracking
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// HTTP API
    #[serde(default)]
    pub server: ServerConfig,

    /// On-disk queue location
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ParaclateConfig,
    /// `None` when running on built-in defaults
    pub source: Option<PathBuf>,
}

impl ParaclateConfig {
    /// Load configuration using the standard search order:
    /// 1. `$PARACLATE_CONFIG` environment variable
    /// 2. `./paraclate.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> LoadedConfig {
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), tid = %config.sync.tid, "Loaded config from {}", defaults::CONFIG_ENV_VAR);
                        return LoadedConfig { config, source: Some(p) };
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from env, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(defaults::CONFIG_FILE_NAME);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(tid = %config.sync.tid, "Loaded config from ./{}", defaults::CONFIG_FILE_NAME);
                    return LoadedConfig { config, source: Some(local) };
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::CONFIG_FILE_NAME);
                }
            }
        }

        info!("No {} found, using built-in defaults", defaults::CONFIG_FILE_NAME);
        LoadedConfig {
            config: Self::default(),
            source: None,
        }
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Write to disk via a temp file + rename so a crash never leaves a
    /// truncated config behind.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = self.to_toml()?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, toml)
            .and_then(|()| std::fs::rename(&tmp, path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                ConfigError::Io(path.to_path_buf(), e)
            })
    }

    /// Validate every section, collecting all problems.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = self.sync.problems();

        let q = &self.queue;
        if q.max_retries == 0 {
            errors.push("queue.max_retries must be at least 1".to_string());
        }
        if q.emergency_max_retries < q.max_retries {
            errors.push(format!(
                "queue.emergency_max_retries ({}) must be >= queue.max_retries ({})",
                q.emergency_max_retries, q.max_retries
            ));
        }
        if q.base_delay_secs == 0 {
            errors.push("queue.base_delay_secs must be positive".to_string());
        }
        if q.max_delay_secs < q.base_delay_secs {
            errors.push(format!(
                "queue.max_delay_secs ({}) must be >= queue.base_delay_secs ({})",
                q.max_delay_secs, q.base_delay_secs
            ));
        }
        if q.max_delay_secs > 86_400 {
            errors.push(format!("queue.max_delay_secs ({}) must be <= 86400", q.max_delay_secs));
        }
        if q.drain_poll_secs == 0 {
            errors.push("queue.drain_poll_secs must be positive".to_string());
        }
        if self.connection.failure_threshold == 0 {
            errors.push("connection.failure_threshold must be at least 1".to_string());
        }
        if self.server.addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!("server.addr '{}' is not a socket address", self.server.addr));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Sync Config
// ============================================================================

/// Live sync configuration. Mutated only through validated updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Tenant id
    pub tid: String,
    /// Facility id
    pub fid: String,
    /// Remote reporting endpoint (`http://` or `https://`)
    pub endpoint: Option<String>,
    /// Cadence of `summary` payloads
    pub report_interval_minutes: u32,
    /// Tenant-local wall-clock slots for `grand_summary` payloads
    pub grand_summary_times: BTreeSet<SlotTime>,
    /// Days a `sent` item is kept before purge
    pub retention_days: u32,
    /// Tenant-local offset from UTC (minutes). Defines "today" and slot times.
    pub utc_offset_minutes: i32,
    pub attunement: AttunementConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tid: "unassigned".to_string(),
            fid: "unassigned".to_string(),
            endpoint: None,
            report_interval_minutes: defaults::REPORT_INTERVAL_MINUTES,
            grand_summary_times: BTreeSet::new(),
            retention_days: defaults::RETENTION_DAYS,
            utc_offset_minutes: 0,
            attunement: AttunementConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let errors = self.problems();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.tid.trim().is_empty() {
            errors.push("sync.tid must not be empty".to_string());
        }
        if self.fid.trim().is_empty() {
            errors.push("sync.fid must not be empty".to_string());
        }
        if let Some(endpoint) = &self.endpoint {
            check_endpoint(endpoint, &mut errors);
        }
        if self.report_interval_minutes == 0 {
            errors.push("sync.report_interval_minutes must be positive".to_string());
        }
        if self.retention_days == 0 {
            errors.push("sync.retention_days must be positive".to_string());
        }
        if self.utc_offset_minutes.abs() > defaults::MAX_UTC_OFFSET_MINUTES {
            errors.push(format!(
                "sync.utc_offset_minutes ({}) must be within ±{}",
                self.utc_offset_minutes,
                defaults::MAX_UTC_OFFSET_MINUTES
            ));
        }
        if self.attunement.tuning_aggressiveness > 100 {
            errors.push(format!(
                "sync.attunement.tuning_aggressiveness ({}) must be within [0, 100]",
                self.attunement.tuning_aggressiveness
            ));
        }

        errors
    }

    /// Tenant-local timezone.
    pub fn timezone(&self) -> chrono::FixedOffset {
        chrono::FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Apply a partial update, returning the candidate config.
    ///
    /// The result is validated as a whole; `self` is never modified.
    pub fn with_update(&self, update: &SyncConfigUpdate) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        let mut errors = Vec::new();

        if let Some(tid) = &update.tid {
            next.tid = tid.clone();
        }
        if let Some(fid) = &update.fid {
            next.fid = fid.clone();
        }
        if let Some(endpoint) = &update.endpoint {
            next.endpoint = Some(endpoint.trim().to_string());
        }
        if let Some(minutes) = update.report_interval_minutes {
            match u32::try_from(minutes) {
                Ok(m) => next.report_interval_minutes = m,
                Err(_) => errors.push(format!("sync.report_interval_minutes ({minutes}) must be positive")),
            }
        }
        if let Some(times) = &update.grand_summary_times {
            let mut slots = BTreeSet::new();
            for raw in times {
                match raw.parse::<SlotTime>() {
                    Ok(slot) => {
                        slots.insert(slot);
                    }
                    Err(e) => errors.push(format!("sync.grand_summary_times: {e}")),
                }
            }
            next.grand_summary_times = slots;
        }
        if let Some(days) = update.retention_days {
            match u32::try_from(days) {
                Ok(d) => next.retention_days = d,
                Err(_) => errors.push(format!("sync.retention_days ({days}) must be positive")),
            }
        }
        if let Some(offset) = update.utc_offset_minutes {
            next.utc_offset_minutes = offset;
        }
        if let Some(attunement) = &update.attunement {
            if let Some(enabled) = attunement.auto_tuning_enabled {
                next.attunement.auto_tuning_enabled = enabled;
            }
            if let Some(frequency) = attunement.tuning_frequency {
                next.attunement.tuning_frequency = frequency;
            }
            if let Some(aggressiveness) = attunement.tuning_aggressiveness {
                match u32::try_from(aggressiveness) {
                    Ok(a) => next.attunement.tuning_aggressiveness = a,
                    Err(_) => errors.push(format!(
                        "sync.attunement.tuning_aggressiveness ({aggressiveness}) must be within [0, 100]"
                    )),
                }
            }
        }

        errors.extend(next.problems());
        if errors.is_empty() {
            Ok(next)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

fn check_endpoint(endpoint: &str, errors: &mut Vec<String>) {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        errors.push("sync.endpoint must not be empty".to_string());
    } else if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        errors.push(format!("sync.endpoint '{trimmed}' must start with http:// or https://"));
    }
}

/// Partial update of [`SyncConfig`]. Absent fields keep their current value.
///
/// Numeric fields are signed so out-of-range input reaches validation instead
/// of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfigUpdate {
    pub tid: Option<String>,
    pub fid: Option<String>,
    pub endpoint: Option<String>,
    pub report_interval_minutes: Option<i64>,
    pub grand_summary_times: Option<Vec<String>>,
    pub retention_days: Option<i64>,
    pub utc_offset_minutes: Option<i32>,
    pub attunement: Option<AttunementUpdate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttunementUpdate {
    pub auto_tuning_enabled: Option<bool>,
    pub tuning_frequency: Option<TuningFrequency>,
    pub tuning_aggressiveness: Option<i64>,
}

// ============================================================================
// Grand summary slot
// ============================================================================

/// Tenant-local wall-clock time, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotTime(NaiveTime);

impl SlotTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub const fn time(self) -> NaiveTime {
        self.0
    }
}

impl std::str::FromStr for SlotTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|_| format!("'{s}' is not a valid HH:MM time"))
    }
}

impl TryFrom<String> for SlotTime {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SlotTime> for String {
    fn from(slot: SlotTime) -> Self {
        slot.to_string()
    }
}

impl std::fmt::Display for SlotTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

// ============================================================================
// Attunement
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningFrequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl TuningFrequency {
    /// Time between tuning runs. A month counts as 30 days.
    pub fn period(self) -> chrono::Duration {
        match self {
            Self::Daily => chrono::Duration::hours(24),
            Self::Weekly => chrono::Duration::days(7),
            Self::Monthly => chrono::Duration::days(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttunementConfig {
    pub auto_tuning_enabled: bool,
    pub tuning_frequency: TuningFrequency,
    /// 0 = never change the interval, 100 = largest steps
    pub tuning_aggressiveness: u32,
}

impl Default for AttunementConfig {
    fn default() -> Self {
        Self {
            auto_tuning_enabled: false,
            tuning_frequency: TuningFrequency::Daily,
            tuning_aggressiveness: defaults::TUNING_AGGRESSIVENESS,
        }
    }
}

// ============================================================================
// Static sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_retries: u32,
    pub emergency_max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub drain_poll_secs: u64,
    pub drain_poll_jitter_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            emergency_max_retries: defaults::EMERGENCY_MAX_RETRIES,
            base_delay_secs: defaults::RETRY_BASE_DELAY_SECS,
            max_delay_secs: defaults::RETRY_MAX_DELAY_SECS,
            drain_poll_secs: defaults::DRAIN_POLL_INTERVAL_SECS,
            drain_poll_jitter_secs: defaults::DRAIN_POLL_JITTER_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub failure_threshold: u32,
    pub http_timeout_secs: u64,
    /// Sent as a bearer token when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::CONNECTION_FAILURE_THRESHOLD,
            http_timeout_secs: defaults::HTTP_TIMEOUT_SECS,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: defaults::LISTEN_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(defaults::DATA_DIR),
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        ParaclateConfig::default().validate().unwrap();
    }

    #[test]
    fn test_slot_time_format() {
        let slot: SlotTime = "09:05".parse().unwrap();
        assert_eq!(slot.to_string(), "09:05");
        assert!("25:00".parse::<SlotTime>().is_err());
        assert!("9am".parse::<SlotTime>().is_err());
    }

    #[test]
    fn test_grand_summary_times_collapse_and_sort() {
        let update = SyncConfigUpdate {
            grand_summary_times: Some(vec!["18:00".into(), "09:00".into(), "18:00".into()]),
            ..Default::default()
        };
        let next = SyncConfig::default().with_update(&update).unwrap();
        let slots: Vec<String> = next.grand_summary_times.iter().map(ToString::to_string).collect();
        assert_eq!(slots, vec!["09:00", "18:00"]);
    }

    #[test]
    fn test_update_collects_all_errors() {
        let update = SyncConfigUpdate {
            endpoint: Some("   ".into()),
            report_interval_minutes: Some(0),
            attunement: Some(AttunementUpdate {
                tuning_aggressiveness: Some(150),
                ..Default::default()
            }),
            ..Default::default()
        };
        match SyncConfig::default().with_update(&update) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors.len(), 3, "{errors:?}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_toml_round_trip_of_slots() {
        let toml = r#"
            [sync]
            tid = "tenant-a"
            fid = "site-1"
            endpoint = "https://reports.example.com"
            grand_summary_times = ["21:30", "07:00"]

            [sync.attunement]
            auto_tuning_enabled = true
            tuning_frequency = "weekly"
        "#;
        let config = ParaclateConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.sync.grand_summary_times.len(), 2);
        assert_eq!(config.sync.attunement.tuning_frequency, TuningFrequency::Weekly);

        let reparsed = ParaclateConfig::from_toml_str(&config.to_toml().unwrap()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_bad_slot_in_toml_is_parse_error() {
        let toml = r#"
            [sync]
            grand_summary_times = ["noon"]
        "#;
        assert!(matches!(
            ParaclateConfig::from_toml_str(toml),
            Err(ConfigError::Parse(_, _))
        ));
    }
}
