//! Behavior tests for the fetch pipeline: completeness, TTL interaction,
//! failure downgrades, the rate-budget wall-clock bound, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use marketsieve_core::{
    CancelToken, FailCategory, FetchConfig, FetchError, FetchPipeline, Symbol,
};
use marketsieve_tests::{sym, ScriptedSource};
use tokio::time::Instant;

fn codes(count: usize) -> Vec<Symbol> {
    (0..count).map(|i| sym(&format!("HK.{i:05}"))).collect()
}

fn roomy_config() -> FetchConfig {
    FetchConfig {
        max_calls_per_window: 10_000,
        window: Duration::from_secs(30),
        worker_count: 4,
        batch_size: 10,
        bar_count: 40,
        max_retries: 3,
        ..FetchConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn every_symbol_gets_exactly_one_result() {
    // Given: 137 symbols across uneven batches
    let source = Arc::new(ScriptedSource::new());
    let pipeline = FetchPipeline::new(roomy_config(), source.clone()).expect("valid config");
    let cancel = CancelToken::new();
    let symbols = codes(137);

    // When: the pipeline fetches snapshots
    let run = pipeline.fetch_snapshots(&symbols, &cancel).await;

    // Then: one result per input symbol, none dropped
    assert_eq!(run.results.len(), 137);
    assert_eq!(run.stats.requested, 137);
    assert_eq!(run.stats.succeeded, 137);
    let mut seen: Vec<&Symbol> = run.results.iter().map(|(symbol, _)| symbol).collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 137);
}

#[tokio::test(start_paused = true)]
async fn ttl_expiry_triggers_exactly_two_upstream_calls() {
    // Given: a series cache with a 300 s TTL
    let source = Arc::new(ScriptedSource::new());
    let config = FetchConfig {
        series_ttl: Duration::from_secs(300),
        ..roomy_config()
    };
    let pipeline = FetchPipeline::new(config, source.clone()).expect("valid config");
    let cancel = CancelToken::new();
    let symbols = vec![sym("HK.00700")];

    // When: fetching at t=0, t=100 (inside TTL) and t=400 (expired)
    pipeline.fetch_series(&symbols, &cancel).await;
    tokio::time::advance(Duration::from_secs(100)).await;
    pipeline.fetch_series(&symbols, &cancel).await;
    tokio::time::advance(Duration::from_secs(300)).await;
    let last = pipeline.fetch_series(&symbols, &cancel).await;

    // Then: exactly two upstream calls were made for the symbol
    assert_eq!(source.series_calls(), 2);
    assert_eq!(last.stats.cache_misses, 1);
    assert_eq!(last.stats.succeeded, 1);
}

#[tokio::test(start_paused = true)]
async fn quota_exhaustion_is_soft_and_never_retried() {
    // Given: one symbol whose series fetch always hits quota exhaustion
    let unlucky = sym("HK.00005");
    let source = Arc::new(
        ScriptedSource::new().with_series_error(
            &unlucky,
            FetchError::quota_exhausted("historical kline quota used up"),
            None,
        ),
    );
    let pipeline = FetchPipeline::new(roomy_config(), source.clone()).expect("valid config");
    let cancel = CancelToken::new();
    let symbols = vec![sym("HK.00700"), unlucky.clone(), sym("HK.00941")];

    // When: the pipeline fetches series for all three
    let run = pipeline.fetch_series(&symbols, &cancel).await;

    // Then: the run completes for the others and counts the quota failure
    assert_eq!(run.stats.succeeded, 2);
    assert_eq!(
        run.stats.soft_fails.get(&FailCategory::QuotaExhausted).copied(),
        Some(1)
    );
    // Quota failures are terminal: exactly one upstream call for the symbol.
    assert_eq!(source.series_calls(), 3);

    let failed: Vec<&Symbol> = run
        .results
        .iter()
        .filter(|(_, outcome)| outcome.as_soft().is_some())
        .map(|(symbol, _)| symbol)
        .collect();
    assert_eq!(failed, vec![&unlucky]);
}

#[tokio::test(start_paused = true)]
async fn network_failures_retry_with_backoff_before_downgrading() {
    // Given: a symbol that always fails with a transient network error
    let flaky = sym("HK.00005");
    let source = Arc::new(ScriptedSource::new().with_series_error(
        &flaky,
        FetchError::network("connection reset by peer"),
        None,
    ));
    let config = FetchConfig {
        max_retries: 3,
        ..roomy_config()
    };
    let pipeline = FetchPipeline::new(config, source.clone()).expect("valid config");
    let cancel = CancelToken::new();

    // When: the pipeline fetches it
    let run = pipeline.fetch_series(&[flaky], &cancel).await;

    // Then: initial attempt plus three retries, then a network soft failure
    assert_eq!(source.series_calls(), 4);
    assert_eq!(
        run.stats.soft_fails.get(&FailCategory::Network).copied(),
        Some(1)
    );
}

#[tokio::test(start_paused = true)]
async fn transient_batch_failures_recover_within_the_retry_budget() {
    // Given: the first two snapshot batch calls fail, the third succeeds
    let source = Arc::new(ScriptedSource::new().with_snapshot_failures(
        FetchError::network("gateway hiccup"),
        2,
    ));
    let pipeline = FetchPipeline::new(
        FetchConfig {
            batch_size: 50,
            ..roomy_config()
        },
        source.clone(),
    )
    .expect("valid config");
    let cancel = CancelToken::new();
    let symbols = codes(3);

    let run = pipeline.fetch_snapshots(&symbols, &cancel).await;

    assert_eq!(run.stats.succeeded, 3);
    assert_eq!(run.stats.soft_fail_total(), 0);
    assert_eq!(source.snapshot_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn second_run_within_ttl_makes_zero_extra_upstream_calls() {
    // Given: a completed series run
    let source = Arc::new(ScriptedSource::new());
    let pipeline = FetchPipeline::new(roomy_config(), source.clone()).expect("valid config");
    let cancel = CancelToken::new();
    let symbols = codes(25);

    let first = pipeline.fetch_series(&symbols, &cancel).await;
    assert_eq!(first.stats.succeeded, 25);
    let calls_after_first = source.series_calls();

    // When: the same universe is fetched again inside the TTL
    let second = pipeline.fetch_series(&symbols, &cancel).await;

    // Then: all hits, no new upstream traffic
    assert_eq!(second.stats.succeeded, 25);
    assert_eq!(second.stats.cache_hits, 25);
    assert_eq!(second.stats.cache_misses, 0);
    assert_eq!(source.series_calls(), calls_after_first);
}

#[tokio::test(start_paused = true)]
async fn two_thousand_symbols_stay_inside_the_rate_window_bound() {
    // Given: the 58-per-30s budget with 10 workers over 2000 symbols
    let source = Arc::new(ScriptedSource::new());
    let config = FetchConfig {
        max_calls_per_window: 58,
        window: Duration::from_secs(30),
        worker_count: 10,
        batch_size: 50,
        bar_count: 5,
        max_retries: 0,
        universe_cap: 5_000,
        ..FetchConfig::default()
    };
    let pipeline = FetchPipeline::new(config, source.clone()).expect("valid config");
    let cancel = CancelToken::new();
    let symbols = codes(2_000);

    // When: every symbol needs one rate-limited series call
    let start = Instant::now();
    let run = pipeline.fetch_series(&symbols, &cancel).await;
    let elapsed = start.elapsed();

    // Then: the run is complete and bounded by ceil(2000/58) windows
    assert_eq!(run.stats.succeeded, 2_000);
    let bound = Duration::from_secs((2_000_f64 / 58.0).ceil() as u64 * 30);
    assert!(
        elapsed <= bound + Duration::from_secs(10),
        "run took {elapsed:?}, bound {bound:?}"
    );

    // And: from the upstream's perspective no 30 s window saw more than 58
    // calls
    let mut times = source.series_call_times();
    times.sort();
    assert_eq!(times.len(), 2_000);
    for window in times.windows(59) {
        let span = window[58].duration_since(window[0]);
        assert!(
            span >= Duration::from_secs(30),
            "59 upstream calls within {span:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_new_work_but_keeps_cached_results() {
    // Given: a tight 1-per-30s budget so the run must outlive the signal
    let source = Arc::new(ScriptedSource::new());
    let config = FetchConfig {
        max_calls_per_window: 1,
        window: Duration::from_secs(30),
        worker_count: 2,
        batch_size: 1,
        bar_count: 5,
        max_retries: 0,
        ..FetchConfig::default()
    };
    let pipeline = Arc::new(FetchPipeline::new(config, source.clone()).expect("valid config"));
    let cancel = CancelToken::new();
    let symbols = codes(5);

    let running = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        let symbols = symbols.clone();
        tokio::spawn(async move { pipeline.fetch_series(&symbols, &cancel).await })
    };

    // When: the run is cancelled a few seconds in
    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();
    let run = running.await.expect("pipeline task");

    // Then: the run reports cancellation with partial results
    assert!(run.stats.cancelled);
    assert!(run.results.len() < 5, "cancellation must cut the run short");
    let calls_at_cancel = source.series_calls();
    assert!(calls_at_cancel >= 1, "in-flight work finishes first");

    // And: results fetched before the signal remain cached for a new run
    let fetched_before: Vec<Symbol> = run
        .results
        .iter()
        .map(|(symbol, _)| symbol.clone())
        .collect();
    if let Some(first) = fetched_before.first() {
        let fresh_cancel = CancelToken::new();
        let again = pipeline
            .fetch_series(std::slice::from_ref(first), &fresh_cancel)
            .await;
        assert_eq!(again.stats.cache_hits, 1);
        assert_eq!(source.series_calls(), calls_at_cancel);
    }
}
