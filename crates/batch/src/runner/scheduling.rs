use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::sync::{lock, read, write};
use crate::types::Batch;

use super::Scheduler;

/// Batch formation rule: the head request has waited at least `wait`, or the
/// queue already holds a full batch.
pub fn should_form_batch(
    head_waited: Duration,
    queue_len: usize,
    target_size: usize,
    wait: Duration,
) -> bool {
    queue_len > 0 && (head_waited >= wait || queue_len >= target_size)
}

impl Scheduler {
    /// Take the next batch off the queue if the formation rule allows it.
    ///
    /// The batch takes up to the current target size in priority order and
    /// is recorded in the batch history before it is returned.
    pub(crate) fn form_batch(&self, now: DateTime<Utc>) -> Option<Batch> {
        let (target, wait) = {
            let controller = read(&self.controller);
            (controller.batch_size(), controller.wait_time())
        };

        let batch = {
            let mut queue = lock(&self.queue);
            let head_waited = queue.peek_front()?.waited(now);
            if !should_form_batch(head_waited, queue.len(), target, wait) {
                return None;
            }
            Batch::new(queue.take_batch(target), target, wait, now)
        };

        write(&self.telemetry).record_batch(batch.record());
        info!(
            batch_id = %batch.id,
            members = batch.len(),
            target,
            wait_ms = wait.as_millis() as u64,
            "Batch formed"
        );
        Some(batch)
    }
}
