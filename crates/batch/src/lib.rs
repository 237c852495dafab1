//! Adaptive batch scheduler for credibility analysis requests.
//!
//! Requests are admitted into a priority queue, grouped into bounded batches
//! and run concurrently against an [`InferenceProvider`]. A periodic
//! controller retunes batch size and admission wait from observed success
//! rate, latency and queue depth.

pub mod error;
pub mod executor;
pub mod history;
pub mod metrics;
pub mod provider;
pub mod queue;
pub mod results;
pub mod runner;
mod sync;
pub mod tuning;
pub mod types;

pub use error::BatchError;
pub use executor::BatchExecutor;
pub use metrics::{resource_utilization_estimate, MetricsSnapshot, OutcomeTotals};
pub use provider::{InferenceProvider, ProviderError, SimulatedProvider};
pub use queue::RequestQueue;
pub use results::ResultStore;
pub use runner::{should_form_batch, Scheduler};
pub use tuning::{AdaptiveController, TuningReport, WindowStats};
pub use types::{
    AnalysisRequest, Batch, BatchId, BatchRecord, Lifecycle, Outcome, OutcomeStatus, RequestId,
    Sample, SampleKind, SchedulerStatus, Submission,
};
