//! Priority admission queue.
//!
//! Holds requests that have been admitted but not yet placed in a batch.
//! Ordering is descending priority, ties broken by admission order, so the
//! front of the queue is always the next request a batch should take.

use std::collections::VecDeque;

use crate::error::BatchError;
use crate::types::{AnalysisRequest, RequestId};

/// Priority-ordered queue of not-yet-batched requests.
#[derive(Debug, Default)]
pub struct RequestQueue {
    items: VecDeque<AnalysisRequest>,
    /// Admission bound. `None` = unbounded.
    max_depth: Option<usize>,
}

impl RequestQueue {
    /// Create an unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue that rejects admissions past `max_depth`.
    pub fn bounded(max_depth: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            max_depth,
        }
    }

    /// Fail with `QueueFull` unless `count` more requests fit.
    pub fn ensure_room(&self, count: usize) -> Result<(), BatchError> {
        match self.max_depth {
            Some(max) if self.items.len() + count > max => Err(BatchError::QueueFull { max }),
            _ => Ok(()),
        }
    }

    /// Insert keeping priority order; equal priorities stay in arrival order.
    ///
    /// Returns the queue depth after insertion.
    pub fn insert(&mut self, request: AnalysisRequest) -> Result<usize, BatchError> {
        self.ensure_room(1)?;
        // First slot whose priority is strictly lower than the newcomer's.
        let pos = self
            .items
            .partition_point(|queued| queued.priority >= request.priority);
        self.items.insert(pos, request);
        Ok(self.items.len())
    }

    /// Remove the highest-priority, earliest request.
    pub fn pop_front(&mut self) -> Option<AnalysisRequest> {
        self.items.pop_front()
    }

    pub fn peek_front(&self) -> Option<&AnalysisRequest> {
        self.items.front()
    }

    /// Pop up to `max` requests in queue order.
    pub fn take_batch(&mut self, max: usize) -> Vec<AnalysisRequest> {
        let n = max.min(self.items.len());
        self.items.drain(..n).collect()
    }

    /// Remove a specific request (used for cancellation).
    pub fn remove(&mut self, id: &RequestId) -> Option<AnalysisRequest> {
        let pos = self.items.iter().position(|r| &r.id == id)?;
        self.items.remove(pos)
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.items.iter().any(|r| &r.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }
}
