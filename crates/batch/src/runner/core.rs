use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tracing::{debug, info};

use credence_core::{AnalysisKind, BatchConfig, Metadata};

use crate::error::BatchError;
use crate::executor::BatchExecutor;
use crate::history::Telemetry;
use crate::metrics::{MetricsAggregator, MetricsSnapshot, OutcomeTotals};
use crate::provider::InferenceProvider;
use crate::queue::RequestQueue;
use crate::results::ResultStore;
use crate::sync::{lock, read, write};
use crate::tuning::{AdaptiveController, TuningReport};
use crate::types::{
    elapsed_between, AnalysisRequest, BatchRecord, Lifecycle, Outcome, RequestId, Sample,
    SchedulerStatus, Submission,
};

/// The adaptive batch scheduler.
///
/// Admits analysis requests, groups them into batches, runs batches
/// concurrently against an [`InferenceProvider`] and retunes its batch size
/// and admission wait from observed outcomes. Clones share one instance.
///
/// Lock order: controller, then queue; telemetry before metrics or
/// controller. No lock is held across an `.await`.
#[derive(Clone)]
pub struct Scheduler {
    pub(super) config: Arc<BatchConfig>,
    /// Admitted, not yet batched requests.
    pub(super) queue: Arc<Mutex<RequestQueue>>,
    pub(super) results: Arc<ResultStore>,
    /// Sample and batch history.
    pub(super) telemetry: Arc<RwLock<Telemetry>>,
    pub(super) controller: Arc<RwLock<AdaptiveController>>,
    pub(super) metrics: Arc<RwLock<MetricsAggregator>>,
    pub(super) totals: Arc<OutcomeTotals>,
    pub(super) executor: BatchExecutor,
    /// Lifecycle state. Receivers wait on it in `stopped()`.
    pub(super) lifecycle: Arc<watch::Sender<Lifecycle>>,
    /// Batches dispatched and not yet reconciled.
    pub(super) in_flight: Arc<AtomicUsize>,
    /// Wakes a parked control loop on admission or stop.
    pub(super) wake: Arc<Notify>,
    pub(super) started_at: DateTime<Utc>,
}

impl Scheduler {
    /// Build a scheduler in the `Idle` state. Rejects invalid configuration.
    pub fn new(
        config: BatchConfig,
        provider: Arc<dyn InferenceProvider>,
    ) -> Result<Self, BatchError> {
        config.validate()?;
        let now = Utc::now();

        let telemetry = Arc::new(RwLock::new(Telemetry::new(
            config.sample_capacity,
            config.batch_history_capacity,
        )));
        let results = Arc::new(ResultStore::new(
            config.result_retention,
            config.result_poll_interval(),
        ));
        let totals = Arc::new(OutcomeTotals::new());
        let executor = BatchExecutor::new(
            Arc::clone(&provider),
            Arc::clone(&telemetry),
            Arc::clone(&results),
            Arc::clone(&totals),
            config.request_timeout(),
        );
        let (lifecycle, _) = watch::channel(Lifecycle::Idle);

        info!(
            provider = provider.name(),
            batch_size = config.starting_batch_size(),
            wait_ms = config.starting_wait().as_millis() as u64,
            max_concurrent = config.max_concurrent_batches,
            "Scheduler created"
        );

        Ok(Self {
            queue: Arc::new(Mutex::new(RequestQueue::bounded(config.queue_limit()))),
            controller: Arc::new(RwLock::new(AdaptiveController::new(&config))),
            metrics: Arc::new(RwLock::new(MetricsAggregator::new(now))),
            config: Arc::new(config),
            results,
            telemetry,
            totals,
            executor,
            lifecycle: Arc::new(lifecycle),
            in_flight: Arc::new(AtomicUsize::new(0)),
            wake: Arc::new(Notify::new()),
            started_at: now,
        })
    }

    /// Admit one request. Returns its id immediately.
    pub fn submit(
        &self,
        payload: Value,
        kind: AnalysisKind,
        priority: i32,
        metadata: Metadata,
    ) -> Result<RequestId, BatchError> {
        let request = AnalysisRequest::new(payload, kind, priority, metadata);
        let id = request.id;
        self.admit(vec![request])?;
        Ok(id)
    }

    /// Admit several requests at once. Either all are admitted or none.
    pub fn submit_many(&self, items: Vec<Submission>) -> Result<Vec<RequestId>, BatchError> {
        let max = self.config.max_bulk_submit;
        if items.len() > max {
            return Err(BatchError::TooManyRequests {
                count: items.len(),
                max,
            });
        }
        self.admit(items.into_iter().map(Submission::into_request).collect())
    }

    fn admit(&self, requests: Vec<AnalysisRequest>) -> Result<Vec<RequestId>, BatchError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::with_capacity(requests.len());
        let mut samples = Vec::with_capacity(requests.len());
        {
            let mut queue = lock(&self.queue);
            queue.ensure_room(requests.len())?;
            for request in requests {
                ids.push(request.id);
                samples.push(Sample::admitted(&request, queue.len() + 1));
                queue.insert(request)?;
            }
        }
        {
            let mut telemetry = write(&self.telemetry);
            for sample in samples {
                telemetry.record_sample(sample);
            }
        }
        self.totals.record_admitted(ids.len() as u64);
        debug!(count = ids.len(), "Requests admitted");
        self.wake.notify_one();
        Ok(ids)
    }

    /// Withdraw a request that is still queued and publish a `Cancelled`
    /// outcome for it. Returns false once the request has been batched.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let removed = lock(&self.queue).remove(id);
        match removed {
            Some(request) => {
                self.executor.publish(&[Outcome::cancelled(&request)]);
                info!(request_id = %id, "Request cancelled");
                true
            }
            None => false,
        }
    }

    /// Non-blocking outcome lookup.
    pub fn outcome(&self, id: &RequestId) -> Option<Outcome> {
        self.results.get(id)
    }

    /// Wait up to `timeout` for the request's outcome. `None` means it is not
    /// available yet; calling again later is fine and returns the same value.
    pub async fn await_outcome(&self, id: &RequestId, timeout: Duration) -> Option<Outcome> {
        self.results.get_timeout(id, timeout).await
    }

    pub fn status(&self) -> SchedulerStatus {
        let (batch_size, wait) = {
            let controller = read(&self.controller);
            (controller.batch_size(), controller.wait_time())
        };
        let lifecycle = self.lifecycle();
        SchedulerStatus {
            running: lifecycle == Lifecycle::Running,
            lifecycle,
            queue_depth: lock(&self.queue).len(),
            in_flight_batches: self.in_flight.load(Ordering::Relaxed),
            max_concurrent_batches: self.config.max_concurrent_batches,
            stored_results: self.results.len(),
            total_admitted: self.totals.admitted(),
            total_processed: self.totals.processed(),
            total_failed: self.totals.failed(),
            total_cancelled: self.totals.cancelled(),
            current_batch_size: batch_size,
            min_batch_size: self.config.min_batch_size,
            max_batch_size: self.config.max_batch_size,
            current_wait_ms: wait.as_millis() as u64,
            min_wait_ms: self.config.min_wait_ms,
            max_wait_ms: self.config.max_wait_ms,
            uptime_secs: elapsed_between(self.started_at, Utc::now()).as_secs(),
        }
    }

    /// Latest periodic metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        read(&self.metrics).snapshot()
    }

    /// Recompute metrics now instead of waiting for the metrics timer.
    pub fn refresh_metrics(&self) -> MetricsSnapshot {
        self.results.trim_to_retention();
        let in_flight = self.in_flight.load(Ordering::Relaxed);
        let stored = self.results.len();
        let telemetry = read(&self.telemetry);
        let mut metrics = write(&self.metrics);
        let snapshot = metrics
            .update(telemetry.samples.iter(), &self.totals, in_flight, stored, Utc::now())
            .clone();
        debug!(
            success_rate = snapshot.success_rate,
            throughput = snapshot.throughput_per_minute,
            "Metrics updated"
        );
        snapshot
    }

    /// Run one tuning pass now. `None` when there was too little data.
    pub fn tune(&self) -> Option<TuningReport> {
        let report = {
            let telemetry = read(&self.telemetry);
            let mut controller = write(&self.controller);
            controller.tune(telemetry.samples.iter(), Utc::now())
        }?;

        if report.changed() {
            info!(
                success_rate = report.stats.success_rate,
                avg_processing_ms = report.stats.avg_processing_time.as_millis() as u64,
                avg_wait_ms = report.stats.avg_wait_time.as_millis() as u64,
                avg_queue_depth = report.stats.avg_queue_depth,
                batch_size_before = report.batch_size_before,
                batch_size_after = report.batch_size_after,
                wait_ms_before = report.wait_before.as_millis() as u64,
                wait_ms_after = report.wait_after.as_millis() as u64,
                "Scheduler retuned"
            );
        } else {
            debug!(success_rate = report.stats.success_rate, "Tuning pass made no change");
        }
        Some(report)
    }

    /// Drop stored outcomes older than `max_age`, then enforce retention.
    pub fn purge_results(&self, max_age: Duration) -> usize {
        let removed = self.results.purge(max_age, Utc::now());
        if removed > 0 {
            info!(removed, "Purged stored outcomes");
        }
        removed
    }

    /// Clear sample and batch history and the metrics snapshot. Outcome
    /// totals and stored outcomes are kept.
    pub fn reset_metrics(&self) {
        write(&self.telemetry).clear();
        write(&self.metrics).reset(Utc::now());
        info!("Metrics reset");
    }

    /// Newest `limit` samples, oldest first.
    pub fn recent_samples(&self, limit: usize) -> Vec<Sample> {
        read(&self.telemetry).samples.recent(limit)
    }

    /// Newest `limit` batch records, oldest first.
    pub fn batch_history(&self, limit: usize) -> Vec<BatchRecord> {
        read(&self.telemetry).batches.recent(limit)
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }
}
