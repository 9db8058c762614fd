use std::time::Duration;

use catena_core::testutil::{MemoryStore, MockFetcher, RecordingReporter};
use catena_core::{ChainEngine, ChainState};
use tokio_util::sync::CancellationToken;

use crate::integration::common::{detail_step, fast_config, link_step};

#[tokio::test]
async fn cancel_before_run_processes_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let store = MemoryStore::new();
    let fetcher = MockFetcher::new();
    let engine = ChainEngine::new(
        vec![detail_step("detail")],
        fast_config(),
        fetcher.clone(),
        store.clone(),
    )
    .unwrap();

    let outcome = engine.run_with_cancel(["a", "b"], cancel).await.unwrap();

    assert_eq!(outcome.state, ChainState::Cancelled { step: 0 });
    assert!(outcome.stats.cancelled);
    assert_eq!(outcome.stats.total_requests, 0);
    assert_eq!(outcome.pending_urls, vec!["a", "b"]);
    assert_eq!(fetcher.call_count(), 0);
    assert!(store.is_finalized());
}

#[tokio::test]
async fn cancel_mid_step_returns_partial_stats() {
    let cancel = CancellationToken::new();
    let fetcher = MockFetcher::new().with_delay(Duration::from_millis(100));
    let reporter = RecordingReporter::new();
    let urls: Vec<String> = (0..6).map(|i| format!("u{i}")).collect();
    let engine = ChainEngine::new(
        vec![detail_step("detail")],
        fast_config().with_concurrency_limit(2),
        fetcher.clone(),
        MemoryStore::new(),
    )
    .unwrap()
    .with_reporter(reporter.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });
    let outcome = engine.run_with_cancel(urls, cancel).await.unwrap();

    assert_eq!(outcome.state, ChainState::Cancelled { step: 0 });
    // The two in-flight fetches finish; the rest never start.
    assert_eq!(outcome.stats.total_requests, 2);
    assert_eq!(outcome.stats.successful_requests, 2);
    assert_eq!(outcome.pending_urls.len(), 4);
    assert_eq!(fetcher.call_count(), 2);
    assert_eq!(reporter.count("cancelled"), 1);
    assert_eq!(reporter.count("chain_completed"), 1);
}

#[tokio::test]
async fn cancel_between_steps_stops_the_chain() {
    let cancel = CancellationToken::new();
    let fetcher = MockFetcher::new();
    let engine = ChainEngine::new(
        vec![
            link_step("list", vec![("A", vec!["B"])]),
            detail_step("detail"),
        ],
        fast_config(),
        fetcher.clone(),
        MemoryStore::new(),
    )
    .unwrap()
    .with_reporter(CancelAfterFirstStep(cancel.clone()));

    let outcome = engine.run_with_cancel(["A"], cancel).await.unwrap();

    assert_eq!(outcome.state, ChainState::Cancelled { step: 1 });
    assert_eq!(outcome.stats.steps_completed, 1);
    assert_eq!(outcome.pending_urls, vec!["B"]);
    assert_eq!(fetcher.call_count(), 1);
    assert!(outcome.stats.cancelled);
}

#[tokio::test]
async fn cancel_after_last_step_finished_still_completes() {
    let cancel = CancellationToken::new();
    let store = MemoryStore::new();
    let engine = ChainEngine::new(
        vec![detail_step("detail")],
        fast_config(),
        MockFetcher::new(),
        store.clone(),
    )
    .unwrap()
    .with_reporter(CancelAfterFirstStep(cancel.clone()));

    let outcome = engine.run_with_cancel(["a", "b"], cancel.clone()).await.unwrap();

    assert!(cancel.is_cancelled());
    assert_eq!(outcome.state, ChainState::Completed);
    assert!(!outcome.stats.cancelled);
    assert_eq!(outcome.stats.steps_completed, 1);
    assert!(outcome.pending_urls.is_empty());
    assert_eq!(store.saved_urls(), vec!["a", "b"]);
}

/// Fires the token as soon as the first step reports completion.
struct CancelAfterFirstStep(CancellationToken);

impl catena_core::ChainReporter for CancelAfterFirstStep {
    fn report(&self, event: catena_core::ChainEvent<'_>) {
        if let catena_core::ChainEvent::StepCompleted { .. } = event {
            self.0.cancel();
        }
    }
}
