//! Batch execution: concurrent fan-out to the provider, fan-in of outcomes.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::history::Telemetry;
use crate::metrics::OutcomeTotals;
use crate::provider::{InferenceProvider, ProviderError};
use crate::results::ResultStore;
use crate::sync::write;
use crate::types::{elapsed_between, AnalysisRequest, Batch, Outcome, Sample};

/// Runs formed batches against an [`InferenceProvider`] and publishes the
/// outcomes. Cheap to clone; every clone shares the same stores.
#[derive(Clone)]
pub struct BatchExecutor {
    provider: Arc<dyn InferenceProvider>,
    telemetry: Arc<RwLock<Telemetry>>,
    results: Arc<ResultStore>,
    totals: Arc<OutcomeTotals>,
    request_timeout: Option<Duration>,
}

impl BatchExecutor {
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        telemetry: Arc<RwLock<Telemetry>>,
        results: Arc<ResultStore>,
        totals: Arc<OutcomeTotals>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            provider,
            telemetry,
            results,
            totals,
            request_timeout,
        }
    }

    /// Dispatch every member concurrently and collect one outcome per member,
    /// in member order.
    ///
    /// Each request runs in its own task, so a provider error or panic only
    /// fails that request. Completion samples and the batch record are
    /// updated before returning; nothing is published.
    pub async fn execute(&self, batch: &Batch) -> Vec<Outcome> {
        let dispatched_at = Utc::now();
        let started = Instant::now();

        let handles: Vec<_> = batch
            .requests
            .iter()
            .map(|request| {
                let provider = Arc::clone(&self.provider);
                let request = request.clone();
                let timeout = self.request_timeout;
                tokio::spawn(async move { analyze_one(provider.as_ref(), &request, timeout).await })
            })
            .collect();

        let joined = join_all(handles).await;

        let outcomes: Vec<Outcome> = batch
            .requests
            .iter()
            .zip(joined)
            .map(|(request, joined)| {
                let wait = elapsed_between(request.submitted_at, dispatched_at);
                match joined {
                    Ok((Ok(result), elapsed)) => {
                        Outcome::completed(request, batch.id, result, elapsed, wait)
                    }
                    Ok((Err(e), elapsed)) => {
                        warn!(
                            request_id = %request.id,
                            batch_id = %batch.id,
                            error = %e,
                            "request failed"
                        );
                        Outcome::failed(request, Some(batch.id), e.to_string(), elapsed, wait)
                    }
                    Err(e) => {
                        error!(
                            request_id = %request.id,
                            batch_id = %batch.id,
                            error = %e,
                            "request task died"
                        );
                        Outcome::failed(
                            request,
                            Some(batch.id),
                            format!("request task died: {e}"),
                            started.elapsed(),
                            wait,
                        )
                    }
                }
            })
            .collect();

        self.record_completions(batch, &outcomes, started.elapsed());
        outcomes
    }

    /// Execute a batch and publish its outcomes.
    pub async fn run(&self, batch: &Batch) {
        let started = Instant::now();
        info!(
            batch_id = %batch.id,
            members = batch.len(),
            target = batch.target_size,
            "batch started"
        );

        let outcomes = self.execute(batch).await;
        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        self.publish(&outcomes);

        info!(
            batch_id = %batch.id,
            completed = outcomes.len() - failed,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
    }

    /// Fail every member that has no published outcome yet with a shared
    /// cause. Used when the batch task itself dies.
    pub fn fail_unresolved(&self, batch: &Batch, cause: &str) -> Vec<Outcome> {
        let now = Utc::now();
        let unresolved: Vec<&AnalysisRequest> = batch
            .requests
            .iter()
            .filter(|request| !self.results.contains(&request.id))
            .collect();
        if unresolved.is_empty() {
            return Vec::new();
        }

        error!(batch_id = %batch.id, unresolved = unresolved.len(), cause, "batch execution died");

        let outcomes: Vec<Outcome> = unresolved
            .into_iter()
            .map(|request| {
                Outcome::failed(
                    request,
                    Some(batch.id),
                    cause,
                    Duration::ZERO,
                    elapsed_between(request.submitted_at, batch.formed_at),
                )
            })
            .collect();

        self.record_completions(batch, &outcomes, elapsed_between(batch.formed_at, now));
        self.publish(&outcomes);
        outcomes
    }

    /// Publish outcomes and count them. Returns how many were newly stored.
    ///
    /// Counters move before the store so a caller that observes an outcome
    /// also observes it in the totals.
    pub fn publish(&self, outcomes: &[Outcome]) -> usize {
        let mut stored = 0;
        for outcome in outcomes {
            let duplicate = self.results.contains(&outcome.request_id);
            debug_assert!(!duplicate, "outcome published twice for {}", outcome.request_id);
            if duplicate {
                error!(request_id = %outcome.request_id, "duplicate outcome dropped");
                continue;
            }
            self.totals.record(outcome.status);
            match self.results.put(outcome.clone()) {
                Ok(()) => stored += 1,
                Err(e) => error!(error = %e, "failed to store outcome"),
            }
        }
        stored
    }

    fn record_completions(&self, batch: &Batch, outcomes: &[Outcome], elapsed: Duration) {
        let mut telemetry = write(&self.telemetry);
        for outcome in outcomes {
            if let Some(request) = batch.requests.iter().find(|r| r.id == outcome.request_id) {
                telemetry.record_sample(Sample::completed(request, outcome));
            }
        }
        if !telemetry.complete_batch(batch.id, Utc::now(), elapsed) {
            debug!(batch_id = %batch.id, "batch record already completed or evicted");
        }
    }
}

/// One provider call, timed, with the optional per-request timeout applied.
async fn analyze_one(
    provider: &dyn InferenceProvider,
    request: &AnalysisRequest,
    timeout: Option<Duration>,
) -> (Result<Value, ProviderError>, Duration) {
    let started = Instant::now();
    let call = provider.analyze(&request.payload, request.kind, &request.metadata);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::TimedOut(limit)),
        },
        None => call.await,
    };
    debug!(
        request_id = %request.id,
        provider = provider.name(),
        ok = result.is_ok(),
        "provider call returned"
    );
    (result, started.elapsed())
}
