//! End-to-end scheduler scenarios against the simulated provider.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use credence_batch::provider::SIMULATE_FAILURE_KEY;
use credence_batch::{
    AdaptiveController, AnalysisRequest, Outcome, OutcomeStatus, Sample, Scheduler,
    SimulatedProvider,
};
use credence_core::{AnalysisKind, BatchConfig, Metadata};

fn scheduler(config: BatchConfig, latency_ms: u64) -> Scheduler {
    let provider = Arc::new(SimulatedProvider::new(Duration::from_millis(latency_ms)));
    Scheduler::new(config, provider).expect("valid config")
}

async fn shutdown(s: &Scheduler) {
    s.stop();
    s.stopped().await;
}

#[tokio::test]
async fn single_request_completes_with_defaults() {
    let s = scheduler(BatchConfig::default(), 10);
    s.start();

    let id = s
        .submit(json!("a short transcript"), AnalysisKind::Full, 1, Metadata::new())
        .unwrap();
    let outcome = s.await_outcome(&id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.request_id, id);
    assert!(outcome.result.is_some());
    assert!(outcome.batch_id.is_some());
    shutdown(&s).await;
}

#[tokio::test]
async fn priorities_order_members_of_one_batch() {
    let config = BatchConfig {
        min_batch_size: 4,
        max_batch_size: 8,
        min_wait_ms: 300,
        max_wait_ms: 1_000,
        tick_ms: 20,
        ..BatchConfig::default()
    };
    let s = scheduler(config, 5);
    s.start();

    let ids: Vec<_> = [1, 5, 3]
        .into_iter()
        .map(|p| s.submit(json!(format!("p{p}")), AnalysisKind::Bias, p, Metadata::new()).unwrap())
        .collect();
    for id in &ids {
        assert!(s.await_outcome(id, Duration::from_secs(3)).await.is_some());
    }

    let history = s.batch_history(10);
    assert_eq!(history.len(), 1, "all three requests share one batch");
    assert_eq!(history[0].priorities, vec![5, 3, 1]);
    assert_eq!(history[0].member_count, 3);
    assert_eq!(history[0].request_ids, vec![ids[1], ids[2], ids[0]]);
    shutdown(&s).await;
}

#[tokio::test]
async fn one_failure_leaves_siblings_untouched() {
    let config = BatchConfig {
        min_wait_ms: 50,
        tick_ms: 10,
        ..BatchConfig::default()
    };
    let s = scheduler(config, 5);
    s.start();

    let mut failing = Metadata::new();
    failing.insert(SIMULATE_FAILURE_KEY.to_string(), json!(true));
    let ok_a = s.submit(json!("a"), AnalysisKind::Facts, 1, Metadata::new()).unwrap();
    let bad = s.submit(json!("b"), AnalysisKind::Facts, 1, failing).unwrap();
    let ok_c = s.submit(json!("c"), AnalysisKind::Facts, 1, Metadata::new()).unwrap();

    let mut outcomes = Vec::new();
    for id in [ok_a, bad, ok_c] {
        outcomes.push(s.await_outcome(&id, Duration::from_secs(3)).await.unwrap());
    }

    assert_eq!(outcomes[0].status, OutcomeStatus::Completed);
    assert_eq!(outcomes[1].status, OutcomeStatus::Failed);
    assert!(outcomes[1].error.is_some());
    assert_eq!(outcomes[2].status, OutcomeStatus::Completed);

    let status = s.status();
    assert_eq!(status.total_failed, 1);
    assert_eq!(status.total_processed, 2);
    shutdown(&s).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_all_resolve() {
    let config = BatchConfig {
        min_wait_ms: 50,
        tick_ms: 10,
        ..BatchConfig::default()
    };
    let s = scheduler(config, 50);
    s.start();

    let submitters: Vec<_> = (0..20)
        .map(|i| {
            let s = s.clone();
            tokio::spawn(async move {
                s.submit(json!(format!("video {i}")), AnalysisKind::Full, i % 4, Metadata::new())
                    .unwrap()
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in submitters {
        ids.push(handle.await.unwrap());
    }
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 20);

    for id in &ids {
        assert!(s.await_outcome(id, Duration::from_secs(10)).await.is_some());
    }

    let status = s.status();
    assert_eq!(status.total_processed + status.total_failed, 20);
    assert_eq!(status.queue_depth, 0);
    shutdown(&s).await;
}

#[test]
fn sustained_failures_walk_batch_size_down() {
    let config = BatchConfig {
        min_batch_size: 2,
        max_batch_size: 8,
        ..BatchConfig::default()
    };
    let mut controller = AdaptiveController::new(&config);
    let request = AnalysisRequest::new(json!("t"), AnalysisKind::Full, 1, Metadata::new());

    let mut sizes = vec![controller.batch_size()];
    for _ in 0..3 {
        let now = Utc::now();
        let samples: Vec<Sample> = (0..15)
            .map(|i| {
                let elapsed = Duration::from_millis(100);
                let outcome = if i % 2 == 0 {
                    let batch = uuid::Uuid::new_v4();
                    Outcome::completed(&request, batch, json!({}), elapsed, elapsed)
                } else {
                    Outcome::failed(&request, None, "model error", elapsed, elapsed)
                };
                Sample::completed(&request, &outcome)
            })
            .collect();
        // 8 of 15 succeed: well under the low-success threshold.
        let report = controller.tune(&samples, now).expect("enough samples");
        assert!(report.stats.success_rate < 0.8);
        sizes.push(controller.batch_size());
    }

    assert_eq!(sizes, vec![8, 7, 6, 5]);
    assert!(sizes.windows(2).all(|w| w[1] <= w[0]));

    // Keeps shrinking until the floor, then stays there.
    for _ in 0..10 {
        let samples: Vec<Sample> = (0..15)
            .map(|_| {
                let outcome =
                    Outcome::failed(&request, None, "down", Duration::ZERO, Duration::ZERO);
                Sample::completed(&request, &outcome)
            })
            .collect();
        controller.tune(&samples, Utc::now());
        assert!(controller.batch_size() >= 2);
    }
    assert_eq!(controller.batch_size(), 2);
}

#[tokio::test]
async fn published_outcomes_match_totals() {
    let config = BatchConfig {
        min_wait_ms: 30,
        tick_ms: 10,
        ..BatchConfig::default()
    };
    let provider = Arc::new(SimulatedProvider::new(Duration::from_millis(5)).fail_every(3));
    let s = Scheduler::new(config, provider).unwrap();

    let ids: Vec<_> = (0..9)
        .map(|i| s.submit(json!(i), AnalysisKind::Sentiment, 1, Metadata::new()).unwrap())
        .collect();
    // Cancel two while nothing is running yet.
    assert!(s.cancel(&ids[0]));
    assert!(s.cancel(&ids[1]));

    s.start();
    let mut published = 0;
    for id in &ids {
        if s.await_outcome(id, Duration::from_secs(3)).await.is_some() {
            published += 1;
        }
    }

    let status = s.status();
    assert_eq!(published, 9);
    assert_eq!(
        status.total_processed + status.total_failed + status.total_cancelled,
        published
    );
    assert_eq!(status.total_cancelled, 2);
    assert_eq!(status.stored_results as u64, published);
    assert_eq!(status.total_admitted, 9);

    let metrics = s.refresh_metrics();
    assert_eq!(metrics.total_requests, published);
    shutdown(&s).await;
}

#[tokio::test]
async fn tunables_stay_within_bounds_under_load() {
    let config = BatchConfig {
        min_batch_size: 2,
        max_batch_size: 4,
        min_wait_ms: 20,
        max_wait_ms: 100,
        wait_step_ms: 20,
        tick_ms: 10,
        min_tuning_samples: 1,
        ..BatchConfig::default()
    };
    let provider = Arc::new(SimulatedProvider::new(Duration::from_millis(2)).fail_every(2));
    let s = Scheduler::new(config, provider).unwrap();
    s.start();

    for round in 0..5 {
        let ids: Vec<_> = (0..6)
            .map(|i| {
                s.submit(json!([round, i]), AnalysisKind::Classification, i, Metadata::new())
                    .unwrap()
            })
            .collect();
        for id in &ids {
            s.await_outcome(id, Duration::from_secs(3)).await;
        }
        s.tune();
        let status = s.status();
        assert!((2..=4).contains(&status.current_batch_size));
        assert!((20..=100).contains(&status.current_wait_ms));
    }
    shutdown(&s).await;
}
