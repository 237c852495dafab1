use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use credence_core::{AnalysisKind, Metadata};

/// Unique identifier for an admitted request.
pub type RequestId = Uuid;

/// Unique identifier for a formed batch.
pub type BatchId = Uuid;

/// Elapsed time between two instants, zero if `to` is earlier than `from`.
pub(crate) fn elapsed_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    to.signed_duration_since(from).to_std().unwrap_or_default()
}

/// An analysis request as admitted by the scheduler. Immutable after admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub id: RequestId,
    /// Content handed to the inference provider (typically a transcript).
    pub payload: serde_json::Value,
    pub kind: AnalysisKind,
    /// Higher value = served earlier.
    pub priority: i32,
    pub submitted_at: DateTime<Utc>,
    pub metadata: Metadata,
}

impl AnalysisRequest {
    pub fn new(
        payload: serde_json::Value,
        kind: AnalysisKind,
        priority: i32,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            kind,
            priority,
            submitted_at: Utc::now(),
            metadata,
        }
    }

    /// Time spent since admission, as of `now`.
    pub fn waited(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.submitted_at, now)
    }
}

/// One entry of a bulk submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub payload: serde_json::Value,
    #[serde(default)]
    pub kind: AnalysisKind,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_priority() -> i32 {
    1
}

impl Submission {
    pub(crate) fn into_request(self) -> AnalysisRequest {
        AnalysisRequest::new(self.payload, self.kind, self.priority, self.metadata)
    }
}

/// Terminal state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    Cancelled,
}

/// The single terminal result of a request. Published once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub request_id: RequestId,
    /// Batch that carried the request. `None` for requests cancelled while queued.
    pub batch_id: Option<BatchId>,
    pub status: OutcomeStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Time spent inside the inference provider call.
    pub processing_time: Duration,
    /// Time between admission and dispatch.
    pub wait_time: Duration,
    pub resolved_at: DateTime<Utc>,
}

impl Outcome {
    pub fn completed(
        request: &AnalysisRequest,
        batch_id: BatchId,
        result: serde_json::Value,
        processing_time: Duration,
        wait_time: Duration,
    ) -> Self {
        Self {
            request_id: request.id,
            batch_id: Some(batch_id),
            status: OutcomeStatus::Completed,
            result: Some(result),
            error: None,
            processing_time,
            wait_time,
            resolved_at: Utc::now(),
        }
    }

    pub fn failed(
        request: &AnalysisRequest,
        batch_id: Option<BatchId>,
        error: impl Into<String>,
        processing_time: Duration,
        wait_time: Duration,
    ) -> Self {
        Self {
            request_id: request.id,
            batch_id,
            status: OutcomeStatus::Failed,
            result: None,
            error: Some(error.into()),
            processing_time,
            wait_time,
            resolved_at: Utc::now(),
        }
    }

    pub fn cancelled(request: &AnalysisRequest) -> Self {
        let now = Utc::now();
        Self {
            request_id: request.id,
            batch_id: None,
            status: OutcomeStatus::Cancelled,
            result: None,
            error: Some("cancelled before dispatch".to_string()),
            processing_time: Duration::ZERO,
            wait_time: request.waited(now),
            resolved_at: now,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

/// A group of requests formed from the queue and dispatched together.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: BatchId,
    /// Members in priority order.
    pub requests: Vec<AnalysisRequest>,
    pub formed_at: DateTime<Utc>,
    /// Batch size target in force when the batch was formed.
    pub target_size: usize,
    /// Admission wait in force when the batch was formed.
    pub wait_used: Duration,
}

impl Batch {
    pub fn new(
        requests: Vec<AnalysisRequest>,
        target_size: usize,
        wait_used: Duration,
        formed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            requests,
            formed_at,
            target_size,
            wait_used,
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn record(&self) -> BatchRecord {
        let priorities: Vec<i32> = self.requests.iter().map(|r| r.priority).collect();
        let average_priority = if priorities.is_empty() {
            0.0
        } else {
            priorities.iter().map(|&p| p as f64).sum::<f64>() / priorities.len() as f64
        };
        BatchRecord {
            batch_id: self.id,
            member_count: self.requests.len(),
            request_ids: self.requests.iter().map(|r| r.id).collect(),
            priorities,
            average_priority,
            target_batch_size: self.target_size,
            admission_wait_used: self.wait_used,
            formed_at: self.formed_at,
            completed_at: None,
            processing_time: None,
        }
    }
}

/// Diagnostic record of a formed batch, kept in the batch history ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: BatchId,
    pub member_count: usize,
    pub request_ids: Vec<RequestId>,
    pub priorities: Vec<i32>,
    pub average_priority: f64,
    pub target_batch_size: usize,
    pub admission_wait_used: Duration,
    pub formed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time: Option<Duration>,
}

impl BatchRecord {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Set the completion fields. Only the first call has any effect.
    pub(crate) fn mark_completed(&mut self, at: DateTime<Utc>, elapsed: Duration) -> bool {
        if self.completed_at.is_some() {
            return false;
        }
        self.completed_at = Some(at);
        self.processing_time = Some(elapsed);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    RequestAdmitted,
    RequestCompleted,
}

/// One observation feeding metrics and tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub kind: SampleKind,
    pub request_id: RequestId,
    pub priority: i32,
    pub success: Option<bool>,
    pub processing_time: Option<Duration>,
    pub wait_time: Option<Duration>,
    /// Queue depth right after the event (admissions only).
    pub queue_depth: Option<usize>,
}

impl Sample {
    pub fn admitted(request: &AnalysisRequest, queue_depth: usize) -> Self {
        Self {
            timestamp: request.submitted_at,
            kind: SampleKind::RequestAdmitted,
            request_id: request.id,
            priority: request.priority,
            success: None,
            processing_time: None,
            wait_time: None,
            queue_depth: Some(queue_depth),
        }
    }

    pub fn completed(request: &AnalysisRequest, outcome: &Outcome) -> Self {
        Self {
            timestamp: outcome.resolved_at,
            kind: SampleKind::RequestCompleted,
            request_id: request.id,
            priority: request.priority,
            success: Some(outcome.is_success()),
            processing_time: Some(outcome.processing_time),
            wait_time: Some(outcome.wait_time),
            queue_depth: None,
        }
    }
}

/// Scheduler lifecycle: `Idle -> Running -> Stopping -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Idle,
    Running,
    Stopping,
}

/// Point-in-time view of the scheduler for dashboards and health checks.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub lifecycle: Lifecycle,
    pub queue_depth: usize,
    pub in_flight_batches: usize,
    pub max_concurrent_batches: usize,
    pub stored_results: usize,
    pub total_admitted: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub current_batch_size: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub current_wait_ms: u64,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
    pub uptime_secs: u64,
}
