//! Write-once outcome store with bounded retention.

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::map::Entry;
use indexmap::IndexMap;
use tracing::debug;

use crate::error::BatchError;
use crate::sync::{read, write};
use crate::types::{Outcome, RequestId};

/// Request id -> terminal outcome. Insertion order is publication order, so
/// the oldest entries sit at the front.
#[derive(Debug)]
pub struct ResultStore {
    entries: RwLock<IndexMap<RequestId, Outcome>>,
    retention: usize,
    poll_interval: Duration,
}

impl ResultStore {
    pub fn new(retention: usize, poll_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            retention: retention.max(1),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Publish an outcome. A second outcome for the same request is rejected
    /// and the first one is kept.
    pub fn put(&self, outcome: Outcome) -> Result<(), BatchError> {
        let mut entries = write(&self.entries);
        match entries.entry(outcome.request_id) {
            Entry::Occupied(_) => Err(BatchError::DuplicateOutcome(outcome.request_id)),
            Entry::Vacant(slot) => {
                slot.insert(outcome);
                Ok(())
            }
        }
    }

    /// Non-blocking lookup.
    pub fn get(&self, id: &RequestId) -> Option<Outcome> {
        read(&self.entries).get(id).cloned()
    }

    /// Poll until the outcome appears or `timeout` elapses.
    ///
    /// `None` means "not available yet", never failure. The stored outcome is
    /// left in place, so repeated calls return the same value.
    pub async fn get_timeout(&self, id: &RequestId, timeout: Duration) -> Option<Outcome> {
        // An unrepresentable deadline means wait indefinitely.
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            if let Some(outcome) = self.get(id) {
                return Some(outcome);
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };
            tokio::time::sleep(pause).await;
        }
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        read(&self.entries).contains_key(id)
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.entries).is_empty()
    }

    /// Drop outcomes resolved more than `max_age` before `now`, then trim to
    /// the retention bound. Returns the number removed.
    pub fn purge(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let mut entries = write(&self.entries);
        let before = entries.len();
        // An age reaching past the representable range keeps everything.
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age));
        if let Some(cutoff) = cutoff {
            entries.retain(|_, outcome| outcome.resolved_at >= cutoff);
        }
        Self::trim(&mut entries, self.retention);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Purged stored outcomes");
        }
        removed
    }

    /// Enforce the retention bound only. Returns the number removed.
    pub fn trim_to_retention(&self) -> usize {
        let mut entries = write(&self.entries);
        Self::trim(&mut entries, self.retention)
    }

    fn trim(entries: &mut IndexMap<RequestId, Outcome>, retention: usize) -> usize {
        let excess = entries.len().saturating_sub(retention);
        if excess > 0 {
            entries.drain(..excess);
        }
        excess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnalysisRequest;
    use credence_core::{AnalysisKind, Metadata};

    fn outcome() -> Outcome {
        let req = AnalysisRequest::new(
            serde_json::json!("x"),
            AnalysisKind::Facts,
            1,
            Metadata::new(),
        );
        Outcome::completed(
            &req,
            uuid::Uuid::new_v4(),
            serde_json::json!({"score": 0.7}),
            Duration::from_millis(10),
            Duration::from_millis(5),
        )
    }

    fn store() -> ResultStore {
        ResultStore::new(100, Duration::from_millis(10))
    }

    #[test]
    fn put_is_write_once() {
        let store = store();
        let first = outcome();
        let id = first.request_id;
        store.put(first.clone()).unwrap();

        let mut second = first.clone();
        second.error = Some("overwrite".into());
        let err = store.put(second).unwrap_err();
        assert!(matches!(err, BatchError::DuplicateOutcome(dup) if dup == id));
        assert_eq!(store.get(&id), Some(first));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn get_timeout_returns_none_when_missing() {
        let store = store();
        let started = std::time::Instant::now();
        let got = store
            .get_timeout(&uuid::Uuid::new_v4(), Duration::from_millis(50))
            .await;
        assert!(got.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn get_timeout_sees_late_publish() {
        let store = std::sync::Arc::new(store());
        let out = outcome();
        let id = out.request_id;

        let writer = std::sync::Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.put(out).unwrap();
        });

        let got = store.get_timeout(&id, Duration::from_secs(2)).await;
        assert_eq!(got.map(|o| o.request_id), Some(id));
        // Retrieval does not consume.
        assert!(store.get_timeout(&id, Duration::ZERO).await.is_some());
    }

    #[test]
    fn purge_drops_old_entries() {
        let store = store();
        let mut old = outcome();
        old.resolved_at = Utc::now() - chrono::Duration::hours(2);
        let fresh = outcome();
        let fresh_id = fresh.request_id;
        store.put(old).unwrap();
        store.put(fresh).unwrap();

        let removed = store.purge(Duration::from_secs(3600), Utc::now());
        assert_eq!(removed, 1);
        assert!(store.contains(&fresh_id));
    }

    #[test]
    fn purge_trims_oldest_beyond_retention() {
        let store = ResultStore::new(3, Duration::from_millis(10));
        let outcomes: Vec<Outcome> = (0..5).map(|_| outcome()).collect();
        for o in &outcomes {
            store.put(o.clone()).unwrap();
        }

        let removed = store.purge(Duration::from_secs(3600), Utc::now());
        assert_eq!(removed, 2);
        assert!(!store.contains(&outcomes[0].request_id));
        assert!(!store.contains(&outcomes[1].request_id));
        assert!(store.contains(&outcomes[4].request_id));
    }

    #[tokio::test]
    async fn get_timeout_accepts_unbounded_timeout() {
        let store = std::sync::Arc::new(store());
        let stored = outcome();
        let stored_id = stored.request_id;
        store.put(stored).unwrap();
        let got = store.get_timeout(&stored_id, Duration::MAX).await;
        assert_eq!(got.map(|o| o.request_id), Some(stored_id));

        // A missing id keeps polling instead of failing.
        let late = outcome();
        let late_id = late.request_id;
        let writer = std::sync::Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.put(late).unwrap();
        });
        let got = tokio::time::timeout(
            Duration::from_secs(2),
            store.get_timeout(&late_id, Duration::MAX),
        )
        .await
        .expect("late outcome arrives");
        assert_eq!(got.map(|o| o.request_id), Some(late_id));
    }

    #[test]
    fn purge_with_huge_age_keeps_everything() {
        let store = store();
        let mut old = outcome();
        old.resolved_at = Utc::now() - chrono::Duration::days(365);
        store.put(old).unwrap();
        store.put(outcome()).unwrap();

        let huge = Duration::from_secs(10_000_000_000_000);
        assert_eq!(store.purge(huge, Utc::now()), 0);
        assert_eq!(store.purge(Duration::MAX, Utc::now()), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn trim_without_age_cutoff() {
        let store = ResultStore::new(2, Duration::from_millis(10));
        for _ in 0..4 {
            store.put(outcome()).unwrap();
        }
        assert_eq!(store.trim_to_retention(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.trim_to_retention(), 0);
    }
}
