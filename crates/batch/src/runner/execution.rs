use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sync::lock;
use crate::types::{Batch, BatchId, Lifecycle};

use super::Scheduler;

/// A dispatched batch and the task running it.
pub(super) struct InFlight {
    pub(super) batch: Arc<Batch>,
    pub(super) handle: JoinHandle<()>,
}

impl Scheduler {
    /// Start the control loop. Returns false if it was already running.
    ///
    /// Calling this while a stop is still draining cancels the stop; the
    /// existing loop keeps going. Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut spawn_loop = false;
        let changed = self.lifecycle.send_if_modified(|state| match *state {
            Lifecycle::Idle => {
                *state = Lifecycle::Running;
                spawn_loop = true;
                true
            }
            Lifecycle::Stopping => {
                *state = Lifecycle::Running;
                true
            }
            Lifecycle::Running => false,
        });

        if spawn_loop {
            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.run_loop().await });
        }
        if changed {
            info!(queued = lock(&self.queue).len(), "Scheduler started");
        }
        changed
    }

    /// Ask the loop to stop. No new batches are formed; dispatched batches
    /// run to completion and queued requests stay queued. Returns false if
    /// the scheduler was not running.
    pub fn stop(&self) -> bool {
        let changed = self.lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Running {
                *state = Lifecycle::Stopping;
                true
            } else {
                false
            }
        });
        if changed {
            info!("Scheduler stop requested");
            self.wake.notify_one();
        }
        changed
    }

    /// Resolve once the scheduler is `Idle`.
    pub async fn stopped(&self) {
        let mut rx = self.lifecycle.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| *state == Lifecycle::Idle).await;
    }

    /// The control loop. Exits once a stop has drained every in-flight batch.
    async fn run_loop(self) {
        info!(
            max_concurrent = self.config.max_concurrent_batches,
            tick_ms = self.config.tick_ms,
            "Scheduler loop running"
        );

        let mut in_flight: HashMap<BatchId, InFlight> = HashMap::new();
        let mut last_metrics = Instant::now();
        let mut last_tuning = Instant::now();

        loop {
            self.reconcile(&mut in_flight).await;

            if self.lifecycle() != Lifecycle::Running {
                self.drain(&mut in_flight).await;
                let exited = self.lifecycle.send_if_modified(|state| {
                    if *state == Lifecycle::Stopping {
                        *state = Lifecycle::Idle;
                        true
                    } else {
                        false
                    }
                });
                if exited {
                    break;
                }
                // Restarted while draining.
                continue;
            }

            while in_flight.len() < self.config.max_concurrent_batches {
                match self.form_batch(Utc::now()) {
                    Some(batch) => self.dispatch(batch, &mut in_flight),
                    None => break,
                }
            }

            if last_metrics.elapsed() >= self.config.metrics_interval() {
                self.refresh_metrics();
                last_metrics = Instant::now();
            }
            if last_tuning.elapsed() >= self.config.tuning_interval() {
                self.tune();
                last_tuning = Instant::now();
            }

            let idle = in_flight.is_empty() && self.queue_is_empty();
            let pause = if idle {
                // Nothing to do until an admission or a periodic timer.
                let metrics_due = self
                    .config
                    .metrics_interval()
                    .saturating_sub(last_metrics.elapsed());
                let tuning_due = self
                    .config
                    .tuning_interval()
                    .saturating_sub(last_tuning.elapsed());
                metrics_due.min(tuning_due).max(self.config.tick())
            } else {
                self.config.tick()
            };

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.in_flight.store(0, Ordering::Relaxed);
        info!("Scheduler stopped");
    }

    fn queue_is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Spawn a batch as its own task.
    fn dispatch(&self, batch: Batch, in_flight: &mut HashMap<BatchId, InFlight>) {
        debug_assert!(
            in_flight.len() < self.config.max_concurrent_batches,
            "dispatch past the concurrency cap"
        );
        let batch = Arc::new(batch);
        let executor = self.executor.clone();
        let task_batch = Arc::clone(&batch);
        let handle = tokio::spawn(async move { executor.run(&task_batch).await });

        in_flight.insert(batch.id, InFlight { batch, handle });
        self.in_flight.store(in_flight.len(), Ordering::Relaxed);
    }

    /// Settle every batch whose task has finished. Never blocks on a running one.
    pub(super) async fn reconcile(&self, in_flight: &mut HashMap<BatchId, InFlight>) {
        let finished: Vec<BatchId> = in_flight
            .iter()
            .filter(|(_, flight)| flight.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for id in finished {
            if let Some(flight) = in_flight.remove(&id) {
                self.settle(flight).await;
            }
        }
        self.in_flight.store(in_flight.len(), Ordering::Relaxed);
    }

    /// Wait for every dispatched batch. Batches are never aborted.
    async fn drain(&self, in_flight: &mut HashMap<BatchId, InFlight>) {
        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "Draining in-flight batches");
        }
        for (_, flight) in in_flight.drain() {
            self.settle(flight).await;
        }
        self.in_flight.store(0, Ordering::Relaxed);
    }

    /// Join a batch task. If the task itself died, fail whatever it left
    /// unresolved.
    async fn settle(&self, flight: InFlight) {
        let InFlight { batch, handle } = flight;
        match handle.await {
            Ok(()) => debug!(batch_id = %batch.id, "Batch reconciled"),
            Err(e) => {
                warn!(batch_id = %batch.id, error = %e, "Batch task failed");
                let cause = if e.is_panic() {
                    "batch execution panicked"
                } else {
                    "batch execution was cancelled"
                };
                self.executor.fail_unresolved(&batch, cause);
            }
        }
    }
}
