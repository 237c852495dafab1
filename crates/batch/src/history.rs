//! Bounded sample and batch history.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::{BatchId, BatchRecord, Sample};

/// Fixed-capacity FIFO. Pushing past capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, returning the evicted one if the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> RingBuffer<T> {
    /// The newest `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(limit);
        self.items.iter().skip(skip).cloned().collect()
    }
}

/// Observation history shared by the executor, metrics and tuning.
#[derive(Debug)]
pub struct Telemetry {
    pub samples: RingBuffer<Sample>,
    pub batches: RingBuffer<BatchRecord>,
}

impl Telemetry {
    pub fn new(sample_capacity: usize, batch_capacity: usize) -> Self {
        Self {
            samples: RingBuffer::new(sample_capacity),
            batches: RingBuffer::new(batch_capacity),
        }
    }

    pub fn record_sample(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn record_batch(&mut self, record: BatchRecord) {
        self.batches.push(record);
    }

    /// Fill in completion fields of a batch record, if it is still in history.
    ///
    /// Returns false when the record was evicted or already completed.
    pub fn complete_batch(
        &mut self,
        batch_id: BatchId,
        at: DateTime<Utc>,
        elapsed: Duration,
    ) -> bool {
        // Recent batches are at the back.
        self.batches
            .items
            .iter_mut()
            .rev()
            .find(|record| record.batch_id == batch_id)
            .map(|record| record.mark_completed(at, elapsed))
            .unwrap_or(false)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.batches.clear();
    }
}
