//! Configuration management for the ping monitor

use serde::{Deserialize, Serialize};
use std::env;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const INTERVAL_RANGE: RangeInclusive<u64> = 1..=60;
pub const THRESHOLD_RANGE: RangeInclusive<u32> = 1..=10;
pub const HISTORY_SLOTS_RANGE: RangeInclusive<usize> = 1..=10;

pub const DEFAULT_GROUP_FILE: &str = "target_ip.txt";

/// Operator-facing settings that drive the debounce and cadence logic.
///
/// Fields are private so a value of this type is always in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSettings")]
pub struct MonitorSettings {
    interval_secs: u64,
    failure_threshold: u32,
    recovery_threshold: u32,
    batch_size: usize,
}

/// Unchecked wire form; only reachable through `MonitorSettings::new`
#[derive(Deserialize)]
struct RawSettings {
    interval_secs: u64,
    failure_threshold: u32,
    recovery_threshold: u32,
    batch_size: usize,
}

impl TryFrom<RawSettings> for MonitorSettings {
    type Error = String;

    fn try_from(raw: RawSettings) -> Result<Self, String> {
        Self::new(
            raw.interval_secs,
            raw.failure_threshold,
            raw.recovery_threshold,
            raw.batch_size,
        )
    }
}

impl MonitorSettings {
    pub fn new(
        interval_secs: u64,
        failure_threshold: u32,
        recovery_threshold: u32,
        batch_size: usize,
    ) -> Result<Self, String> {
        validate_interval(interval_secs)?;
        validate_threshold("failure threshold", failure_threshold)?;
        validate_threshold("recovery threshold", recovery_threshold)?;

        if batch_size == 0 {
            return Err("batch size must be greater than 0".to_string());
        }

        Ok(Self {
            interval_secs,
            failure_threshold,
            recovery_threshold,
            batch_size,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_threshold(&self) -> u32 {
        self.recovery_threshold
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn with_batch_size(self, batch_size: usize) -> Result<Self, String> {
        Self::new(
            self.interval_secs,
            self.failure_threshold,
            self.recovery_threshold,
            batch_size,
        )
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            failure_threshold: 3,
            recovery_threshold: 2,
            batch_size: 500,
        }
    }
}

/// Check a sweep interval in seconds
pub fn validate_interval(interval_secs: u64) -> Result<u64, String> {
    if INTERVAL_RANGE.contains(&interval_secs) {
        Ok(interval_secs)
    } else {
        Err(format!(
            "interval must be between {} and {} seconds",
            INTERVAL_RANGE.start(),
            INTERVAL_RANGE.end()
        ))
    }
}

/// Check a failure or recovery threshold
pub fn validate_threshold(name: &str, threshold: u32) -> Result<u32, String> {
    if THRESHOLD_RANGE.contains(&threshold) {
        Ok(threshold)
    } else {
        Err(format!(
            "{} must be between {} and {}",
            name,
            THRESHOLD_RANGE.start(),
            THRESHOLD_RANGE.end()
        ))
    }
}

/// Probe implementation chosen at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProbeBackend {
    /// Spawn the platform `ping` binary
    System,
    /// Raw ICMP echo (requires the `icmp` feature and socket privileges)
    Icmp,
}

impl std::fmt::Display for ProbeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeBackend::System => write!(f, "system"),
            ProbeBackend::Icmp => write!(f, "icmp"),
        }
    }
}

/// Where rendered frames go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputTarget {
    Terminal,
    File(PathBuf),
    Http(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host list with `[group]` headers
    pub group_file: PathBuf,

    /// Interval, thresholds and wave size
    pub settings: MonitorSettings,

    /// Number of down/up pairs kept per host
    pub history_slots: usize,

    /// Maximum simultaneous in-flight probes
    pub max_in_flight: usize,

    /// Pause between probe waves
    pub batch_pause: Duration,

    /// Hard deadline for a single probe
    pub probe_timeout: Duration,

    /// Upper bound for random pre-probe jitter
    pub probe_jitter_ms: u64,

    /// Polling step while waiting for the next sweep
    pub poll_step: Duration,

    /// Recent results kept per host
    pub result_cache_capacity: usize,

    /// Probe implementation
    pub backend: ProbeBackend,

    /// Resolve DNS names once before the first sweep
    pub preresolve_hosts: bool,

    /// Frame destination
    pub output: OutputTarget,

    /// HTTP timeout for frame pushes
    pub sink_timeout: Duration,

    /// Maximum retry attempts for failed frame pushes
    pub sink_max_retries: u32,

    /// Retry backoff base for frame pushes
    pub sink_retry_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            group_file: PathBuf::from(DEFAULT_GROUP_FILE),
            settings: MonitorSettings::default(),
            history_slots: 3,
            max_in_flight: 400,
            batch_pause: Duration::from_millis(10),
            probe_timeout: Duration::from_millis(600),
            probe_jitter_ms: 5,
            poll_step: Duration::from_millis(100),
            result_cache_capacity: 1000,
            backend: ProbeBackend::System,
            preresolve_hosts: true,
            output: OutputTarget::Terminal,
            sink_timeout: Duration::from_secs(5),
            sink_max_retries: 2,
            sink_retry_backoff_ms: 200,
        }
    }
}

impl Config {
    /// Load tuning knobs from `PING_*` environment variables
    pub fn from_env() -> Result<Self, String> {
        let mut config = Config::default();
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`
    ///
    /// Unlike unset variables, values that fail to parse are rejected.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(limit) = parse_var::<usize, _>(&lookup, "PING_MAX_IN_FLIGHT")? {
            self.max_in_flight = limit;
        }

        if let Some(size) = parse_var::<usize, _>(&lookup, "PING_BATCH_SIZE")? {
            self.settings = self.settings.with_batch_size(size)?;
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "PING_BATCH_PAUSE_MS")? {
            self.batch_pause = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "PING_TIMEOUT_MS")? {
            self.probe_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "PING_JITTER_MS")? {
            self.probe_jitter_ms = ms;
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "PING_POLL_STEP_MS")? {
            self.poll_step = Duration::from_millis(ms);
        }

        if let Some(capacity) = parse_var::<usize, _>(&lookup, "PING_RESULT_CACHE")? {
            self.result_cache_capacity = capacity;
        }

        if let Some(preresolve) = parse_var::<bool, _>(&lookup, "PING_PRERESOLVE")? {
            self.preresolve_hosts = preresolve;
        }

        if let Some(seconds) = parse_var::<u64, _>(&lookup, "PING_SINK_TIMEOUT_SECONDS")? {
            self.sink_timeout = Duration::from_secs(seconds);
        }

        if let Some(retries) = parse_var::<u32, _>(&lookup, "PING_SINK_MAX_RETRIES")? {
            self.sink_max_retries = retries;
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "PING_SINK_RETRY_BACKOFF_MS")? {
            self.sink_retry_backoff_ms = ms;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.group_file.as_os_str().is_empty() {
            return Err("group_file cannot be empty".to_string());
        }

        validate_interval(self.settings.interval_secs())?;
        validate_threshold("failure threshold", self.settings.failure_threshold())?;
        validate_threshold("recovery threshold", self.settings.recovery_threshold())?;

        if !HISTORY_SLOTS_RANGE.contains(&self.history_slots) {
            return Err(format!(
                "history_slots must be between {} and {}",
                HISTORY_SLOTS_RANGE.start(),
                HISTORY_SLOTS_RANGE.end()
            ));
        }

        if self.max_in_flight == 0 {
            return Err("max_in_flight must be greater than 0".to_string());
        }

        if self.probe_timeout.is_zero() {
            return Err("probe_timeout must be greater than 0".to_string());
        }

        if self.poll_step.is_zero() {
            return Err("poll_step must be greater than 0".to_string());
        }

        if self.result_cache_capacity == 0 {
            return Err("result_cache_capacity must be greater than 0".to_string());
        }

        if let OutputTarget::Http(url) = &self.output {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("push url must be http(s): {}", url));
            }
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(None),
    }
}
