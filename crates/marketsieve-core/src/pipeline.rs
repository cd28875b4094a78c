//! Bounded-concurrency fetch pipeline.
//!
//! Converts a symbol list into per-symbol outcomes, respecting the shared
//! rate limiter and the TTL caches. A fixed pool of workers pulls batches
//! from a queue and emits into an mpsc collector; the pool lives exactly as
//! long as one `fetch_*` call. Per-symbol failures never abort a run.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::cache::{CacheMetrics, TtlCache};
use crate::config::{ConfigError, FetchConfig};
use crate::data_source::{DataSource, FailCategory, FetchError, FetchOutcome, SoftFailure};
use crate::limiter::SlidingWindowLimiter;
use crate::retry::Backoff;
use crate::{CancelToken, Series, Snapshot, Symbol};

/// Aggregate counters for one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchStats {
    pub requested: usize,
    pub succeeded: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub soft_fails: BTreeMap<FailCategory, u64>,
    pub cancelled: bool,
}

impl FetchStats {
    pub fn soft_fail_total(&self) -> u64 {
        self.soft_fails.values().sum()
    }
}

/// One pipeline invocation's outcomes plus counters.
///
/// Result order is unspecified; callers re-associate by symbol. The result
/// set is complete (one entry per input symbol) unless the run was
/// cancelled.
#[derive(Debug)]
pub struct PipelineRun<T> {
    pub results: Vec<(Symbol, FetchOutcome<T>)>,
    pub stats: FetchStats,
}

impl<T> PipelineRun<T> {
    /// Successful outcomes keyed by symbol.
    pub fn into_ok_map(self) -> HashMap<Symbol, T> {
        self.results
            .into_iter()
            .filter_map(|(symbol, outcome)| outcome.ok().map(|value| (symbol, value)))
            .collect()
    }
}

type BatchFuture<T> = Pin<Box<dyn Future<Output = Vec<(Symbol, Result<T, FetchError>)>> + Send>>;
type BatchFn<T> = Arc<dyn Fn(Vec<Symbol>) -> BatchFuture<T> + Send + Sync>;

/// Orchestrates cache-aware, rate-limited fetching with a scoped worker
/// pool. The limiter and caches are the only state shared across workers;
/// both are internally synchronized.
pub struct FetchPipeline {
    config: FetchConfig,
    limiter: Arc<SlidingWindowLimiter>,
    source: Arc<dyn DataSource>,
    snapshot_cache: Arc<TtlCache<Symbol, Snapshot>>,
    series_cache: Arc<TtlCache<Symbol, Series>>,
    backoff: Backoff,
}

impl FetchPipeline {
    pub fn new(config: FetchConfig, source: Arc<dyn DataSource>) -> Result<Self, ConfigError> {
        config.validate()?;
        let limiter = Arc::new(SlidingWindowLimiter::new(
            config.max_calls_per_window,
            config.window,
        ));
        let snapshot_cache = Arc::new(TtlCache::new(config.snapshot_ttl));
        let series_cache = Arc::new(TtlCache::new(config.series_ttl));
        Ok(Self {
            config,
            limiter,
            source,
            snapshot_cache,
            series_cache,
            backoff: Backoff::default(),
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn snapshot_cache_metrics(&self) -> CacheMetrics {
        self.snapshot_cache.metrics()
    }

    pub fn series_cache_metrics(&self) -> CacheMetrics {
        self.series_cache.metrics()
    }

    /// Calls the limiter has recorded in the current trailing window.
    pub async fn calls_in_window(&self) -> usize {
        self.limiter.recorded_in_window().await
    }

    /// Fetches snapshots for `symbols`, one upstream call per batch of
    /// cache misses.
    pub async fn fetch_snapshots(
        &self,
        symbols: &[Symbol],
        cancel: &CancelToken,
    ) -> PipelineRun<Snapshot> {
        let limiter = self.limiter.clone();
        let source = self.source.clone();
        let cache = self.snapshot_cache.clone();
        let cancel_for_fill = cancel.clone();
        let max_retries = self.config.max_retries;
        let backoff = self.backoff;

        let process: BatchFn<Snapshot> = Arc::new(move |batch: Vec<Symbol>| {
            let limiter = limiter.clone();
            let source = source.clone();
            let cache = cache.clone();
            let cancel = cancel_for_fill.clone();
            Box::pin(async move {
                cache
                    .get_or_fetch_batch(&batch, |claimed| async move {
                        with_retry(&cancel, max_retries, backoff, || {
                            let limiter = limiter.clone();
                            let source = source.clone();
                            let cancel = cancel.clone();
                            let claimed = claimed.clone();
                            async move {
                                limiter.acquire(&cancel).await?;
                                source.fetch_snapshots(&claimed).await
                            }
                        })
                        .await
                    })
                    .await
            })
        });

        let before = self.snapshot_cache.metrics();
        let mut run = self.run_pool(symbols, cancel, process).await;
        apply_cache_delta(&mut run.stats, before, self.snapshot_cache.metrics());
        run
    }

    /// Fetches bar series for `symbols`, one upstream call per cache miss.
    pub async fn fetch_series(
        &self,
        symbols: &[Symbol],
        cancel: &CancelToken,
    ) -> PipelineRun<Series> {
        let limiter = self.limiter.clone();
        let source = self.source.clone();
        let cache = self.series_cache.clone();
        let cancel_for_fill = cancel.clone();
        let max_retries = self.config.max_retries;
        let bar_count = self.config.bar_count;
        let backoff = self.backoff;

        let process: BatchFn<Series> = Arc::new(move |batch: Vec<Symbol>| {
            let limiter = limiter.clone();
            let source = source.clone();
            let cache = cache.clone();
            let cancel = cancel_for_fill.clone();
            Box::pin(async move {
                let mut results = Vec::with_capacity(batch.len());
                for symbol in batch {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let fill_symbol = symbol.clone();
                    let result = cache
                        .get_or_fetch(symbol.clone(), || {
                            let limiter = limiter.clone();
                            let source = source.clone();
                            let cancel = cancel.clone();
                            async move {
                                with_retry(&cancel, max_retries, backoff, || {
                                    let limiter = limiter.clone();
                                    let source = source.clone();
                                    let cancel = cancel.clone();
                                    let symbol = fill_symbol.clone();
                                    async move {
                                        limiter.acquire(&cancel).await?;
                                        source.fetch_series(&symbol, bar_count).await
                                    }
                                })
                                .await
                            }
                        })
                        .await;
                    results.push((symbol, result));
                }
                results
            })
        });

        let before = self.series_cache.metrics();
        let mut run = self.run_pool(symbols, cancel, process).await;
        apply_cache_delta(&mut run.stats, before, self.series_cache.metrics());
        run
    }

    async fn run_pool<T: Send + 'static>(
        &self,
        symbols: &[Symbol],
        cancel: &CancelToken,
        process: BatchFn<T>,
    ) -> PipelineRun<T> {
        let requested = symbols.len();
        if requested == 0 {
            return PipelineRun {
                results: Vec::new(),
                stats: FetchStats {
                    cancelled: cancel.is_cancelled(),
                    ..FetchStats::default()
                },
            };
        }

        let batches: VecDeque<Vec<Symbol>> = symbols
            .chunks(self.config.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let worker_count = self.config.effective_worker_count().min(batches.len());
        let queue = Arc::new(Mutex::new(batches));
        let (tx, mut rx) = mpsc::unbounded_channel::<(Symbol, Result<T, FetchError>)>();

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let queue = queue.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            let process = process.clone();
            workers.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let batch = {
                        let mut queue = queue.lock().expect("batch queue lock is not poisoned");
                        queue.pop_front()
                    };
                    let Some(batch) = batch else { break };
                    for item in process(batch).await {
                        if tx.send(item).is_err() {
                            return;
                        }
                    }
                }
            });
        }
        drop(tx);

        let mut results: Vec<(Symbol, FetchOutcome<T>)> = Vec::with_capacity(requested);
        let mut stats = FetchStats {
            requested,
            ..FetchStats::default()
        };

        while let Some((symbol, result)) = rx.recv().await {
            match result {
                Ok(value) => {
                    stats.succeeded += 1;
                    results.push((symbol, FetchOutcome::Ok(value)));
                }
                Err(error) if error.is_cancelled() => {
                    stats.cancelled = true;
                }
                Err(error) => {
                    log::debug!("soft failure for {symbol}: {error}");
                    let failure = SoftFailure::from_error(&error)
                        .expect("non-cancelled errors map to a category");
                    *stats.soft_fails.entry(failure.category).or_insert(0) += 1;
                    results.push((symbol, FetchOutcome::Soft(failure)));
                }
            }
        }

        while workers.join_next().await.is_some() {}

        stats.cancelled = stats.cancelled || cancel.is_cancelled();
        PipelineRun { results, stats }
    }
}

fn apply_cache_delta(stats: &mut FetchStats, before: CacheMetrics, after: CacheMetrics) {
    stats.cache_hits = after.hits.saturating_sub(before.hits);
    stats.cache_misses = after.misses.saturating_sub(before.misses);
}

/// Runs `op` until success, a non-retryable failure, or retry exhaustion.
/// Backoff waits observe cancellation.
async fn with_retry<T, Op, Fut>(
    cancel: &CancelToken,
    max_retries: u32,
    backoff: Backoff,
    mut op: Op,
) -> Result<T, FetchError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) if error.retryable() && attempt < max_retries => {
                let delay = backoff.delay(attempt);
                attempt += 1;
                log::debug!(
                    "retry {attempt}/{max_retries} in {delay:?} after {error}"
                );
                tokio::select! {
                    () = sleep(delay) => {}
                    () = cancel.cancelled() => return Err(FetchError::cancelled()),
                }
            }
            Err(error) => return Err(error),
        }
    }
}
