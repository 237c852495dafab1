use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{elapsed_between, OutcomeStatus, Sample, SampleKind};

/// Window used for `throughput_per_minute`.
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// Running outcome counters. Updated on every publish, read by status and
/// metrics without taking a lock.
#[derive(Debug, Default)]
pub struct OutcomeTotals {
    admitted: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl OutcomeTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self, count: u64) {
        self.admitted.fetch_add(count, Ordering::Relaxed);
    }

    /// Count one published outcome.
    pub fn record(&self, status: OutcomeStatus) {
        let counter = match status {
            OutcomeStatus::Completed => &self.processed,
            OutcomeStatus::Failed => &self.failed,
            OutcomeStatus::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Outcomes published so far, of any status.
    pub fn resolved(&self) -> u64 {
        self.processed() + self.failed() + self.cancelled()
    }
}

/// Periodic rollup exposed through `Scheduler::metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// processed + failed + cancelled.
    pub total_requests: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    /// Mean provider time over completion samples in history.
    pub avg_processing_ms: f64,
    /// Mean admission-to-dispatch time over completion samples in history.
    pub avg_wait_ms: f64,
    /// Completion samples in the last minute.
    pub throughput_per_minute: u64,
    /// Fraction of resolved requests that completed (0.0 - 1.0).
    pub success_rate: f64,
    /// See [`resource_utilization_estimate`].
    pub resource_utilization_estimate: f64,
    /// See [`memory_usage_estimate`].
    pub memory_usage_estimate: f64,
    pub in_flight_batches: usize,
    pub stored_results: usize,
    pub uptime_secs: u64,
    /// `None` until the first update.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Rough load figure: 30 points per in-flight batch, capped at 100.
///
/// Approximate and non-authoritative. It is not derived from any measurement
/// of the inference backend and must not drive scheduling decisions.
pub fn resource_utilization_estimate(in_flight_batches: usize) -> f64 {
    (in_flight_batches as f64 * 30.0).min(100.0)
}

/// Rough result-store pressure: 0.1 points per stored outcome, capped at 100.
///
/// Approximate, like [`resource_utilization_estimate`].
pub fn memory_usage_estimate(stored_results: usize) -> f64 {
    (stored_results as f64 * 0.1).min(100.0)
}

#[derive(Debug)]
pub struct MetricsAggregator {
    snapshot: MetricsSnapshot,
    started_at: DateTime<Utc>,
}

impl MetricsAggregator {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            snapshot: MetricsSnapshot::default(),
            started_at: now,
        }
    }

    /// Recompute the snapshot from the counters and the sample history.
    pub fn update<'a>(
        &mut self,
        samples: impl IntoIterator<Item = &'a Sample>,
        totals: &OutcomeTotals,
        in_flight_batches: usize,
        stored_results: usize,
        now: DateTime<Utc>,
    ) -> &MetricsSnapshot {
        let processed = totals.processed();
        let failed = totals.failed();
        let cancelled = totals.cancelled();
        let total_requests = processed + failed + cancelled;

        let mut processing_sum = 0.0;
        let mut processing_count = 0u64;
        let mut wait_sum = 0.0;
        let mut wait_count = 0u64;
        let mut recent = 0u64;

        for sample in samples {
            if sample.kind != SampleKind::RequestCompleted {
                continue;
            }
            if let Some(p) = sample.processing_time {
                processing_sum += p.as_secs_f64() * 1000.0;
                processing_count += 1;
            }
            if let Some(w) = sample.wait_time {
                wait_sum += w.as_secs_f64() * 1000.0;
                wait_count += 1;
            }
            if sample.timestamp <= now
                && elapsed_between(sample.timestamp, now) <= THROUGHPUT_WINDOW
            {
                recent += 1;
            }
        }

        self.snapshot = MetricsSnapshot {
            total_requests,
            total_processed: processed,
            total_failed: failed,
            total_cancelled: cancelled,
            avg_processing_ms: mean(processing_sum, processing_count),
            avg_wait_ms: mean(wait_sum, wait_count),
            throughput_per_minute: recent,
            success_rate: if total_requests == 0 {
                0.0
            } else {
                processed as f64 / total_requests as f64
            },
            resource_utilization_estimate: resource_utilization_estimate(in_flight_batches),
            memory_usage_estimate: memory_usage_estimate(stored_results),
            in_flight_batches,
            stored_results,
            uptime_secs: elapsed_between(self.started_at, now).as_secs(),
            updated_at: Some(now),
        };
        &self.snapshot
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot.clone()
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.snapshot = MetricsSnapshot::default();
        self.started_at = now;
    }
}

fn mean(sum: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
