//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery. Every value here can be
//! overridden from `paraclate.toml` unless noted otherwise.

// ============================================================================
// Configuration file
// ============================================================================

/// Environment variable pointing at the config file.
pub const CONFIG_ENV_VAR: &str = "PARACLATE_CONFIG";

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "paraclate.toml";

// ============================================================================
// Reporting cadence
// ============================================================================

/// Interval between periodic `summary` payloads (minutes).
pub const REPORT_INTERVAL_MINUTES: u32 = 15;

/// How long `sent` items stay in the store before purge (days).
pub const RETENTION_DAYS: u32 = 7;

/// Scheduler timer resolution (seconds).
pub const SCHEDULER_TICK_SECS: u64 = 60;

/// How often the timer loop purges old `sent` items (seconds).
pub const PURGE_INTERVAL_SECS: u64 = 3_600;

/// Largest accepted tenant UTC offset (minutes). 840 = UTC+14.
pub const MAX_UTC_OFFSET_MINUTES: i32 = 840;

// ============================================================================
// Queue delivery
// ============================================================================

/// Failed attempts before a non-emergency item turns terminal.
pub const MAX_RETRIES: u32 = 5;

/// Failed attempts before an emergency item turns terminal.
pub const EMERGENCY_MAX_RETRIES: u32 = 10;

/// Backoff base delay (seconds). Delay = min(base * 2^retry_count, max).
pub const RETRY_BASE_DELAY_SECS: u64 = 2;

/// Backoff ceiling (seconds). 300 = 5 minutes.
pub const RETRY_MAX_DELAY_SECS: u64 = 300;

/// Fallback wake-up of the drain loop when nothing else wakes it (seconds).
pub const DRAIN_POLL_INTERVAL_SECS: u64 = 30;

/// Random jitter added to the drain poll interval (seconds).
pub const DRAIN_POLL_JITTER_SECS: u64 = 5;

// ============================================================================
// Connection
// ============================================================================

/// Consecutive send failures before the connection flips to `error`.
pub const CONNECTION_FAILURE_THRESHOLD: u32 = 3;

/// HTTP client timeout for remote endpoint requests (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// zstd level for request bodies.
pub const ZSTD_LEVEL: i32 = 3;

// ============================================================================
// Attunement
// ============================================================================

/// Default tuning aggressiveness (0-100).
pub const TUNING_AGGRESSIVENESS: u32 = 50;

/// Attunement never tunes the report interval below this (minutes).
pub const ATTUNEMENT_MIN_INTERVAL_MINUTES: u32 = 5;

/// Attunement never tunes the report interval above this (minutes). 1 440 = 1 day.
pub const ATTUNEMENT_MAX_INTERVAL_MINUTES: u32 = 1_440;

/// Attempt failure rate above which reporting slows down.
pub const ATTUNEMENT_SLOWDOWN_FAILURE_RATE: f64 = 0.20;

/// Attempt failure rate below which reporting may speed up.
pub const ATTUNEMENT_SPEEDUP_FAILURE_RATE: f64 = 0.05;

// ============================================================================
// Server / storage
// ============================================================================

/// HTTP API listen address.
pub const LISTEN_ADDR: &str = "0.0.0.0:8090";

/// Data directory for the sled queue database and lock file.
pub const DATA_DIR: &str = "./data/paraclate";

/// Maximum accepted HTTP request body (bytes).
pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;
