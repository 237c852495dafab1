//! Adaptive batch-size and admission-wait controller.
//!
//! Every tuning interval the controller looks at the trailing window of
//! samples and moves each tunable by at most one step, always within its
//! configured bounds. Batch size reacts to the success rate and provider
//! latency; the admission wait reacts to observed waits and queue depth.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use credence_core::BatchConfig;

use crate::types::{elapsed_between, Sample, SampleKind};

/// Aggregates over the samples inside one tuning window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WindowStats {
    /// Samples of any kind in the window.
    pub samples: usize,
    /// Completion samples in the window.
    pub completions: usize,
    /// Successful completions / completions.
    pub success_rate: f64,
    pub avg_processing_time: Duration,
    pub avg_wait_time: Duration,
    /// Mean queue depth reported by admission samples.
    pub avg_queue_depth: f64,
}

impl WindowStats {
    /// Collect statistics over samples no older than `window` as of `now`.
    pub fn from_samples<'a>(
        samples: impl IntoIterator<Item = &'a Sample>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        let mut stats = WindowStats::default();
        let mut successes = 0usize;
        let mut processing = (Duration::ZERO, 0u32);
        let mut wait = (Duration::ZERO, 0u32);
        let mut depth = (0.0f64, 0usize);

        for sample in samples {
            if elapsed_between(sample.timestamp, now) > window {
                continue;
            }
            stats.samples += 1;
            if let Some(d) = sample.queue_depth {
                depth.0 += d as f64;
                depth.1 += 1;
            }
            if sample.kind != SampleKind::RequestCompleted {
                continue;
            }
            stats.completions += 1;
            if sample.success == Some(true) {
                successes += 1;
            }
            if let Some(p) = sample.processing_time {
                processing.0 += p;
                processing.1 += 1;
            }
            if let Some(w) = sample.wait_time {
                wait.0 += w;
                wait.1 += 1;
            }
        }

        if stats.completions > 0 {
            stats.success_rate = successes as f64 / stats.completions as f64;
        }
        if processing.1 > 0 {
            stats.avg_processing_time = processing.0 / processing.1;
        }
        if wait.1 > 0 {
            stats.avg_wait_time = wait.0 / wait.1;
        }
        if depth.1 > 0 {
            stats.avg_queue_depth = depth.0 / depth.1 as f64;
        }
        stats
    }
}

/// Result of one tuning pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningReport {
    pub at: DateTime<Utc>,
    pub stats: WindowStats,
    pub batch_size_before: usize,
    pub batch_size_after: usize,
    pub wait_before: Duration,
    pub wait_after: Duration,
}

impl TuningReport {
    pub fn changed(&self) -> bool {
        self.batch_size_before != self.batch_size_after || self.wait_before != self.wait_after
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveController {
    batch_size: usize,
    wait: Duration,
    min_batch_size: usize,
    max_batch_size: usize,
    min_wait: Duration,
    max_wait: Duration,
    wait_step: Duration,
    window: Duration,
    min_samples: usize,
    low_success_rate: f64,
    high_success_rate: f64,
    fast_processing: Duration,
    slow_wait: Duration,
    idle_queue_depth: f64,
}

impl AdaptiveController {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            batch_size: config.starting_batch_size(),
            wait: config.starting_wait(),
            min_batch_size: config.min_batch_size,
            max_batch_size: config.max_batch_size,
            min_wait: config.min_wait(),
            max_wait: config.max_wait(),
            wait_step: config.wait_step(),
            window: config.tuning_window(),
            min_samples: config.min_tuning_samples,
            low_success_rate: config.low_success_rate,
            high_success_rate: config.high_success_rate,
            fast_processing: config.fast_processing(),
            slow_wait: config.slow_wait(),
            idle_queue_depth: config.idle_queue_depth,
        }
    }

    /// Current target batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Current admission wait.
    pub fn wait_time(&self) -> Duration {
        self.wait
    }

    /// Analyse the trailing window and adjust. `None` when the window holds
    /// too few samples or no completions; nothing changes in that case.
    pub fn tune<'a>(
        &mut self,
        samples: impl IntoIterator<Item = &'a Sample>,
        now: DateTime<Utc>,
    ) -> Option<TuningReport> {
        let stats = WindowStats::from_samples(samples, now, self.window);
        if stats.samples < self.min_samples || stats.completions == 0 {
            return None;
        }
        let mut report = self.apply(&stats);
        report.at = now;
        Some(report)
    }

    /// Apply the single-step policy for the given statistics.
    pub fn apply(&mut self, stats: &WindowStats) -> TuningReport {
        let batch_size_before = self.batch_size;
        let wait_before = self.wait;

        if stats.success_rate < self.low_success_rate && self.batch_size > self.min_batch_size {
            self.batch_size -= 1;
        } else if stats.success_rate > self.high_success_rate
            && stats.avg_processing_time < self.fast_processing
            && self.batch_size < self.max_batch_size
        {
            self.batch_size += 1;
        }

        if stats.avg_wait_time > self.slow_wait && self.wait > self.min_wait {
            self.wait = self.wait.saturating_sub(self.wait_step).max(self.min_wait);
        } else if stats.avg_queue_depth < self.idle_queue_depth && self.wait < self.max_wait {
            self.wait = (self.wait + self.wait_step).min(self.max_wait);
        }

        TuningReport {
            at: Utc::now(),
            stats: stats.clone(),
            batch_size_before,
            batch_size_after: self.batch_size,
            wait_before,
            wait_after: self.wait,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisRequest, Outcome};
    use credence_core::{AnalysisKind, Metadata};

    fn config() -> BatchConfig {
        BatchConfig {
            initial_batch_size: 4,
            initial_wait_ms: 1000,
            ..BatchConfig::default()
        }
    }

    fn stats(success_rate: f64, processing_ms: u64, wait_ms: u64, depth: f64) -> WindowStats {
        WindowStats {
            samples: 20,
            completions: 10,
            success_rate,
            avg_processing_time: Duration::from_millis(processing_ms),
            avg_wait_time: Duration::from_millis(wait_ms),
            avg_queue_depth: depth,
        }
    }

    fn completion(ok: bool, at: DateTime<Utc>) -> Sample {
        let req =
            AnalysisRequest::new(serde_json::json!("t"), AnalysisKind::Full, 1, Metadata::new());
        let processing = Duration::from_millis(100);
        let wait = Duration::from_millis(200);
        let mut outcome = if ok {
            let batch = uuid::Uuid::new_v4();
            Outcome::completed(&req, batch, serde_json::json!({}), processing, wait)
        } else {
            Outcome::failed(&req, None, "err", processing, wait)
        };
        outcome.resolved_at = at;
        Sample::completed(&req, &outcome)
    }

    #[test]
    fn starts_from_configured_values() {
        let c = AdaptiveController::new(&config());
        assert_eq!(c.batch_size(), 4);
        assert_eq!(c.wait_time(), Duration::from_millis(1000));
    }

    #[test]
    fn low_success_shrinks_batch() {
        let mut c = AdaptiveController::new(&config());
        let report = c.apply(&stats(0.5, 100, 100, 5.0));
        assert_eq!(report.batch_size_after, 3);
        assert!(report.changed());
    }

    #[test]
    fn healthy_fast_grows_batch() {
        let mut c = AdaptiveController::new(&config());
        c.apply(&stats(1.0, 500, 100, 5.0));
        assert_eq!(c.batch_size(), 5);
    }

    #[test]
    fn healthy_but_slow_keeps_batch() {
        let mut c = AdaptiveController::new(&config());
        c.apply(&stats(1.0, 2500, 100, 5.0));
        assert_eq!(c.batch_size(), 4);
    }

    #[test]
    fn long_waits_shorten_wait() {
        let mut c = AdaptiveController::new(&config());
        c.apply(&stats(0.9, 100, 4000, 5.0));
        assert_eq!(c.wait_time(), Duration::from_millis(500));
        // Already at the floor with a busy queue: stays put.
        c.apply(&stats(0.9, 100, 4000, 5.0));
        assert_eq!(c.wait_time(), Duration::from_millis(500));
    }

    #[test]
    fn idle_queue_at_floor_lengthens_wait() {
        let mut c = AdaptiveController::new(&config());
        c.apply(&stats(0.9, 100, 4000, 5.0));
        assert_eq!(c.wait_time(), Duration::from_millis(500));
        // Long waits cannot shrink further, so the idle-queue rule applies.
        c.apply(&stats(0.9, 100, 4000, 0.0));
        assert_eq!(c.wait_time(), Duration::from_millis(1000));
    }

    #[test]
    fn idle_queue_lengthens_wait_up_to_max() {
        let mut c = AdaptiveController::new(&config());
        for _ in 0..20 {
            c.apply(&stats(0.9, 100, 100, 0.5));
        }
        assert_eq!(c.wait_time(), Duration::from_millis(5000));
    }

    #[test]
    fn batch_size_never_leaves_bounds() {
        let mut c = AdaptiveController::new(&config());
        for _ in 0..20 {
            c.apply(&stats(0.0, 100, 100, 5.0));
            assert!(c.batch_size() >= 2);
        }
        assert_eq!(c.batch_size(), 2);
        for _ in 0..20 {
            c.apply(&stats(1.0, 100, 100, 5.0));
            assert!(c.batch_size() <= 8);
        }
        assert_eq!(c.batch_size(), 8);
    }

    #[test]
    fn tune_needs_enough_samples() {
        let now = Utc::now();
        let mut c = AdaptiveController::new(&config());
        let few: Vec<Sample> = (0..5).map(|_| completion(false, now)).collect();
        assert!(c.tune(&few, now).is_none());
        assert_eq!(c.batch_size(), 4);
    }

    #[test]
    fn tune_needs_a_completion() {
        let now = Utc::now();
        let req =
            AnalysisRequest::new(serde_json::json!("t"), AnalysisKind::Full, 1, Metadata::new());
        let admissions: Vec<Sample> = (0..15).map(|d| Sample::admitted(&req, d)).collect();
        let mut c = AdaptiveController::new(&config());
        assert!(c.tune(&admissions, now).is_none());
    }

    #[test]
    fn tune_ignores_samples_outside_window() {
        let now = Utc::now();
        let stale = now - chrono::Duration::minutes(10);
        let samples: Vec<Sample> = (0..15).map(|_| completion(false, stale)).collect();
        let mut c = AdaptiveController::new(&config());
        assert!(c.tune(&samples, now).is_none());
    }

    #[test]
    fn window_stats_from_samples() {
        let now = Utc::now();
        let mut samples: Vec<Sample> = (0..3).map(|_| completion(true, now)).collect();
        samples.push(completion(false, now));
        let req =
            AnalysisRequest::new(serde_json::json!("t"), AnalysisKind::Full, 1, Metadata::new());
        samples.push(Sample::admitted(&req, 4));
        samples.push(Sample::admitted(&req, 2));

        let stats = WindowStats::from_samples(&samples, now, Duration::from_secs(300));
        assert_eq!(stats.samples, 6);
        assert_eq!(stats.completions, 4);
        assert!((stats.success_rate - 0.75).abs() < 1e-9);
        assert_eq!(stats.avg_processing_time, Duration::from_millis(100));
        assert_eq!(stats.avg_wait_time, Duration::from_millis(200));
        assert!((stats.avg_queue_depth - 3.0).abs() < 1e-9);
    }
}
