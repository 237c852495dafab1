use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CredenceError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub batch: BatchConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CREDENCE_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CREDENCE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        Self {
            batch: BatchConfig::from_env_profiled(&p),
            profile: p,
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        self.batch.log_summary();
    }
}

// ── Batch scheduler ───────────────────────────────────────────

/// Tunables for the adaptive batch scheduler.
///
/// Every field has a serde default so a partial TOML file is valid. Durations
/// are stored as integers (`_ms` / `_secs`) and exposed as [`Duration`] via the
/// accessor methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Lower bound for the adaptive batch size.
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,
    /// Upper bound for the adaptive batch size.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Starting batch size. 0 = start at `max_batch_size`.
    #[serde(default)]
    pub initial_batch_size: usize,
    /// Lower bound for the admission wait, in milliseconds.
    #[serde(default = "default_min_wait_ms")]
    pub min_wait_ms: u64,
    /// Upper bound for the admission wait, in milliseconds.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Starting admission wait. 0 = start at `min_wait_ms`.
    #[serde(default)]
    pub initial_wait_ms: u64,
    /// Single tuning step applied to the admission wait.
    #[serde(default = "default_wait_step_ms")]
    pub wait_step_ms: u64,
    /// Hard cap on batches executing at the same time.
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    /// Scheduler loop tick.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
    #[serde(default = "default_tuning_interval")]
    pub tuning_interval_secs: u64,
    /// Trailing window of samples the controller looks at.
    #[serde(default = "default_tuning_window")]
    pub tuning_window_secs: u64,
    /// Samples required inside the window before the controller acts.
    #[serde(default = "default_min_tuning_samples")]
    pub min_tuning_samples: usize,
    /// Below this success rate the batch size shrinks.
    #[serde(default = "default_low_success_rate")]
    pub low_success_rate: f64,
    /// Above this success rate (and under `fast_processing_ms`) the batch size grows.
    #[serde(default = "default_high_success_rate")]
    pub high_success_rate: f64,
    #[serde(default = "default_fast_processing_ms")]
    pub fast_processing_ms: u64,
    /// Average queue wait above which the admission wait shrinks.
    #[serde(default = "default_slow_wait_ms")]
    pub slow_wait_ms: u64,
    /// Average queue depth below which the admission wait grows.
    #[serde(default = "default_idle_queue_depth")]
    pub idle_queue_depth: f64,
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,
    #[serde(default = "default_batch_history_capacity")]
    pub batch_history_capacity: usize,
    /// Result store size kept after a purge.
    #[serde(default = "default_result_retention")]
    pub result_retention: usize,
    #[serde(default = "default_result_poll_ms")]
    pub result_poll_ms: u64,
    /// Admission bound. 0 = unbounded.
    #[serde(default)]
    pub max_queue_depth: usize,
    /// Largest accepted bulk submission.
    #[serde(default = "default_max_bulk_submit")]
    pub max_bulk_submit: usize,
    /// Per-request provider timeout. 0 = wait indefinitely.
    #[serde(default)]
    pub request_timeout_ms: u64,
}

fn default_min_batch_size() -> usize { 2 }
fn default_max_batch_size() -> usize { 8 }
fn default_min_wait_ms() -> u64 { 500 }
fn default_max_wait_ms() -> u64 { 5_000 }
fn default_wait_step_ms() -> u64 { 500 }
fn default_max_concurrent_batches() -> usize { 3 }
fn default_tick_ms() -> u64 { 100 }
fn default_metrics_interval() -> u64 { 60 }
fn default_tuning_interval() -> u64 { 30 }
fn default_tuning_window() -> u64 { 300 }
fn default_min_tuning_samples() -> usize { 10 }
fn default_low_success_rate() -> f64 { 0.8 }
fn default_high_success_rate() -> f64 { 0.95 }
fn default_fast_processing_ms() -> u64 { 2_000 }
fn default_slow_wait_ms() -> u64 { 3_000 }
fn default_idle_queue_depth() -> f64 { 2.0 }
fn default_sample_capacity() -> usize { 1_000 }
fn default_batch_history_capacity() -> usize { 100 }
fn default_result_retention() -> usize { 1_000 }
fn default_result_poll_ms() -> u64 { 100 }
fn default_max_bulk_submit() -> usize { 100 }

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            min_batch_size: default_min_batch_size(),
            max_batch_size: default_max_batch_size(),
            initial_batch_size: 0,
            min_wait_ms: default_min_wait_ms(),
            max_wait_ms: default_max_wait_ms(),
            initial_wait_ms: 0,
            wait_step_ms: default_wait_step_ms(),
            max_concurrent_batches: default_max_concurrent_batches(),
            tick_ms: default_tick_ms(),
            metrics_interval_secs: default_metrics_interval(),
            tuning_interval_secs: default_tuning_interval(),
            tuning_window_secs: default_tuning_window(),
            min_tuning_samples: default_min_tuning_samples(),
            low_success_rate: default_low_success_rate(),
            high_success_rate: default_high_success_rate(),
            fast_processing_ms: default_fast_processing_ms(),
            slow_wait_ms: default_slow_wait_ms(),
            idle_queue_depth: default_idle_queue_depth(),
            sample_capacity: default_sample_capacity(),
            batch_history_capacity: default_batch_history_capacity(),
            result_retention: default_result_retention(),
            result_poll_ms: default_result_poll_ms(),
            max_queue_depth: 0,
            max_bulk_submit: default_max_bulk_submit(),
            request_timeout_ms: 0,
        }
    }
}

impl BatchConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            min_batch_size: profiled_env_parse(p, "BATCH_MIN_SIZE", d.min_batch_size),
            max_batch_size: profiled_env_parse(p, "BATCH_MAX_SIZE", d.max_batch_size),
            initial_batch_size: profiled_env_parse(p, "BATCH_INITIAL_SIZE", d.initial_batch_size),
            min_wait_ms: profiled_env_parse(p, "BATCH_MIN_WAIT_MS", d.min_wait_ms),
            max_wait_ms: profiled_env_parse(p, "BATCH_MAX_WAIT_MS", d.max_wait_ms),
            initial_wait_ms: profiled_env_parse(p, "BATCH_INITIAL_WAIT_MS", d.initial_wait_ms),
            wait_step_ms: profiled_env_parse(p, "BATCH_WAIT_STEP_MS", d.wait_step_ms),
            max_concurrent_batches: profiled_env_parse(
                p,
                "BATCH_MAX_CONCURRENT",
                d.max_concurrent_batches,
            ),
            tick_ms: profiled_env_parse(p, "BATCH_TICK_MS", d.tick_ms),
            metrics_interval_secs: profiled_env_parse(
                p,
                "BATCH_METRICS_INTERVAL_SECS",
                d.metrics_interval_secs,
            ),
            tuning_interval_secs: profiled_env_parse(
                p,
                "BATCH_TUNING_INTERVAL_SECS",
                d.tuning_interval_secs,
            ),
            tuning_window_secs: profiled_env_parse(
                p,
                "BATCH_TUNING_WINDOW_SECS",
                d.tuning_window_secs,
            ),
            min_tuning_samples: profiled_env_parse(
                p,
                "BATCH_MIN_TUNING_SAMPLES",
                d.min_tuning_samples,
            ),
            low_success_rate: profiled_env_parse(p, "BATCH_LOW_SUCCESS_RATE", d.low_success_rate),
            high_success_rate: profiled_env_parse(
                p,
                "BATCH_HIGH_SUCCESS_RATE",
                d.high_success_rate,
            ),
            fast_processing_ms: profiled_env_parse(
                p,
                "BATCH_FAST_PROCESSING_MS",
                d.fast_processing_ms,
            ),
            slow_wait_ms: profiled_env_parse(p, "BATCH_SLOW_WAIT_MS", d.slow_wait_ms),
            idle_queue_depth: profiled_env_parse(p, "BATCH_IDLE_QUEUE_DEPTH", d.idle_queue_depth),
            sample_capacity: profiled_env_parse(p, "BATCH_SAMPLE_CAPACITY", d.sample_capacity),
            batch_history_capacity: profiled_env_parse(
                p,
                "BATCH_HISTORY_CAPACITY",
                d.batch_history_capacity,
            ),
            result_retention: profiled_env_parse(p, "BATCH_RESULT_RETENTION", d.result_retention),
            result_poll_ms: profiled_env_parse(p, "BATCH_RESULT_POLL_MS", d.result_poll_ms),
            max_queue_depth: profiled_env_parse(p, "BATCH_MAX_QUEUE_DEPTH", d.max_queue_depth),
            max_bulk_submit: profiled_env_parse(p, "BATCH_MAX_BULK_SUBMIT", d.max_bulk_submit),
            request_timeout_ms: profiled_env_parse(
                p,
                "BATCH_REQUEST_TIMEOUT_MS",
                d.request_timeout_ms,
            ),
        }
    }

    /// Parse a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, CredenceError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CredenceError> {
        Ok(toml::from_str(raw)?)
    }

    /// Reject configurations the scheduler cannot honour.
    pub fn validate(&self) -> Result<(), CredenceError> {
        let invalid = |msg: String| Err(CredenceError::InvalidConfig(msg));

        if self.min_batch_size == 0 {
            return invalid("min_batch_size must be at least 1".into());
        }
        if self.min_batch_size > self.max_batch_size {
            return invalid(format!(
                "min_batch_size ({}) exceeds max_batch_size ({})",
                self.min_batch_size, self.max_batch_size
            ));
        }
        if self.min_wait_ms > self.max_wait_ms {
            return invalid(format!(
                "min_wait_ms ({}) exceeds max_wait_ms ({})",
                self.min_wait_ms, self.max_wait_ms
            ));
        }
        if self.wait_step_ms == 0 {
            return invalid("wait_step_ms must be positive".into());
        }
        if self.max_concurrent_batches == 0 {
            return invalid("max_concurrent_batches must be at least 1".into());
        }
        if self.tick_ms == 0 || self.result_poll_ms == 0 {
            return invalid("tick_ms and result_poll_ms must be positive".into());
        }
        if self.sample_capacity == 0
            || self.batch_history_capacity == 0
            || self.result_retention == 0
        {
            return invalid("history capacities and result_retention must be positive".into());
        }
        if self.max_bulk_submit == 0 {
            return invalid("max_bulk_submit must be at least 1".into());
        }
        let rate_ok = |r: f64| (0.0..=1.0).contains(&r);
        if !rate_ok(self.low_success_rate)
            || !rate_ok(self.high_success_rate)
            || self.low_success_rate > self.high_success_rate
        {
            return invalid(format!(
                "success rate thresholds must satisfy 0 <= low ({}) <= high ({}) <= 1",
                self.low_success_rate, self.high_success_rate
            ));
        }
        if !self.idle_queue_depth.is_finite() || self.idle_queue_depth < 0.0 {
            return invalid("idle_queue_depth must be a non-negative number".into());
        }
        Ok(())
    }

    /// Batch size the controller starts from, clamped to the bounds.
    pub fn starting_batch_size(&self) -> usize {
        if self.initial_batch_size == 0 {
            self.max_batch_size
        } else {
            self.initial_batch_size.clamp(self.min_batch_size, self.max_batch_size)
        }
    }

    /// Admission wait the controller starts from, clamped to the bounds.
    pub fn starting_wait(&self) -> Duration {
        let ms = if self.initial_wait_ms == 0 {
            self.min_wait_ms
        } else {
            self.initial_wait_ms.clamp(self.min_wait_ms, self.max_wait_ms)
        };
        Duration::from_millis(ms)
    }

    pub fn min_wait(&self) -> Duration { Duration::from_millis(self.min_wait_ms) }
    pub fn max_wait(&self) -> Duration { Duration::from_millis(self.max_wait_ms) }
    pub fn wait_step(&self) -> Duration { Duration::from_millis(self.wait_step_ms) }
    pub fn tick(&self) -> Duration { Duration::from_millis(self.tick_ms) }
    pub fn metrics_interval(&self) -> Duration { Duration::from_secs(self.metrics_interval_secs) }
    pub fn tuning_interval(&self) -> Duration { Duration::from_secs(self.tuning_interval_secs) }
    pub fn tuning_window(&self) -> Duration { Duration::from_secs(self.tuning_window_secs) }
    pub fn fast_processing(&self) -> Duration { Duration::from_millis(self.fast_processing_ms) }
    pub fn slow_wait(&self) -> Duration { Duration::from_millis(self.slow_wait_ms) }
    pub fn result_poll_interval(&self) -> Duration { Duration::from_millis(self.result_poll_ms) }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn queue_limit(&self) -> Option<usize> {
        (self.max_queue_depth > 0).then_some(self.max_queue_depth)
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "  batch:       size={}..{}, wait={}..{}ms, concurrent={}",
            self.min_batch_size,
            self.max_batch_size,
            self.min_wait_ms,
            self.max_wait_ms,
            self.max_concurrent_batches
        );
        tracing::info!(
            "  tuning:      every {}s over {}s window (min {} samples)",
            self.tuning_interval_secs,
            self.tuning_window_secs,
            self.min_tuning_samples
        );
        tracing::info!(
            "  retention:   samples={}, batches={}, results={}, queue={}",
            self.sample_capacity,
            self.batch_history_capacity,
            self.result_retention,
            self.queue_limit().map_or_else(|| "unbounded".to_string(), |n| n.to_string())
        );
    }
}
