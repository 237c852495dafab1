use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use credence_core::{AnalysisKind, Metadata};

/// Metadata flag that makes [`SimulatedProvider`] fail the request.
pub const SIMULATE_FAILURE_KEY: &str = "simulate_failure";

/// An inference backend. The scheduler reaches the models only through this.
///
/// Implementations must tolerate concurrent calls. Each call either returns a
/// JSON result or fails that one request; the scheduler never retries.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        payload: &Value,
        kind: AnalysisKind,
        metadata: &Metadata,
    ) -> Result<Value, ProviderError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("analysis failed: {0}")]
    Failed(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("analysis kind not supported: {0}")]
    Unsupported(AnalysisKind),
    #[error("analysis timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}

/// In-process provider with fixed latency and deterministic failure injection.
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    latency: Duration,
    /// Fail every n-th call (1-based). 0 = never.
    fail_every: u64,
    calls: AtomicU64,
}

impl SimulatedProvider {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = n;
        self
    }

    /// Number of `analyze` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl InferenceProvider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn analyze(
        &self,
        payload: &Value,
        kind: AnalysisKind,
        metadata: &Metadata,
    ) -> Result<Value, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if metadata.get(SIMULATE_FAILURE_KEY) == Some(&Value::Bool(true)) {
            return Err(ProviderError::Failed("failure requested by metadata".into()));
        }
        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(ProviderError::Failed(format!("injected failure on call {call}")));
        }

        let input_chars = match payload {
            Value::String(s) => s.chars().count(),
            other => other.to_string().chars().count(),
        };
        Ok(json!({
            "kind": kind,
            "provider": self.name(),
            "input_chars": input_chars,
        }))
    }
}
