//! Staged reduction of a symbol universe to a ranked shortlist.
//!
//! `Universe → CoarseFiltered → DetailFiltered → Ranked → Selected`. Each
//! stage only drops candidates or appends data; recorded fields are never
//! mutated. The coarse stage consumes snapshot fields only, so series data
//! is fetched for coarse survivors alone.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, FilterConfig, ScreenerConfig};
use crate::data_source::{DataSource, FailCategory};
use crate::pipeline::{FetchPipeline, FetchStats};
use crate::{CancelToken, Series, Snapshot, Symbol};

/// Score assigned by the pluggable scoring function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: f64,
    pub reason: String,
}

/// Pure scoring function supplied by the caller; the screener only invokes
/// it and sorts by its output.
pub trait Scorer: Send + Sync {
    fn score(&self, snapshot: &Snapshot, series: &Series) -> Score;
}

impl<F> Scorer for F
where
    F: Fn(&Snapshot, &Series) -> Score + Send + Sync,
{
    fn score(&self, snapshot: &Snapshot, series: &Series) -> Score {
        self(snapshot, series)
    }
}

/// A symbol surviving the coarse stage, enriched as later stages run.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub symbol: Symbol,
    pub snapshot: Snapshot,
    pub series: Option<Series>,
    pub score: Option<Score>,
}

/// Per-criterion rejection tallies from the coarse stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoarseTallies {
    pub price: u64,
    pub volume: u64,
    pub market_cap: u64,
    pub change_rate: u64,
    pub suspended: u64,
    pub derivative: u64,
}

/// One entry of the final shortlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub symbol: Symbol,
    pub score: f64,
    pub reason: String,
    pub last_price: f64,
    pub change_rate: f64,
}

/// Structured summary of one screening run.
///
/// Always produced, even when every symbol soft-failed; the surrounding
/// application decides how to log or render it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenReport {
    pub run_id: String,
    pub universe_size: usize,
    pub coarse_survivors: usize,
    pub detail_survivors: usize,
    pub selected: Vec<Selection>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub soft_fails: BTreeMap<FailCategory, u64>,
    pub coarse_rejections: CoarseTallies,
    pub cancelled: bool,
}

impl ScreenReport {
    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }
}

enum CoarseVerdict {
    Keep,
    Price,
    Volume,
    MarketCap,
    ChangeRate,
    Suspended,
    Derivative,
}

/// Drives the staged reduction over a shared fetch pipeline.
pub struct Screener {
    filter: FilterConfig,
    pipeline: FetchPipeline,
    scorer: Arc<dyn Scorer>,
}

impl Screener {
    pub fn new(
        config: ScreenerConfig,
        source: Arc<dyn DataSource>,
        scorer: Arc<dyn Scorer>,
    ) -> Result<Self, ConfigError> {
        config.filter.validate(config.fetch.bar_count)?;
        let pipeline = FetchPipeline::new(config.fetch, source)?;
        Ok(Self {
            filter: config.filter,
            pipeline,
            scorer,
        })
    }

    pub fn pipeline(&self) -> &FetchPipeline {
        &self.pipeline
    }

    /// Runs the full staged screen.
    ///
    /// Per-symbol failures surface in the report's soft-fail counters;
    /// cancellation surfaces as the `cancelled` flag on a partial report.
    pub async fn run(&self, universe: &[Symbol], cancel: &CancelToken) -> ScreenReport {
        let universe = Self::dedupe_and_cap(universe, self.pipeline.config().universe_cap);
        let universe_size = universe.len();

        let snapshot_run = self.pipeline.fetch_snapshots(&universe, cancel).await;
        let snapshot_stats = snapshot_run.stats.clone();
        let snapshots = snapshot_run.into_ok_map();

        let mut tallies = CoarseTallies::default();
        let mut coarse: Vec<Candidate> = Vec::new();
        for symbol in &universe {
            let Some(snapshot) = snapshots.get(symbol) else {
                continue;
            };
            match self.coarse_verdict(symbol, snapshot) {
                CoarseVerdict::Keep => coarse.push(Candidate {
                    symbol: symbol.clone(),
                    snapshot: snapshot.clone(),
                    series: None,
                    score: None,
                }),
                CoarseVerdict::Price => tallies.price += 1,
                CoarseVerdict::Volume => tallies.volume += 1,
                CoarseVerdict::MarketCap => tallies.market_cap += 1,
                CoarseVerdict::ChangeRate => tallies.change_rate += 1,
                CoarseVerdict::Suspended => tallies.suspended += 1,
                CoarseVerdict::Derivative => tallies.derivative += 1,
            }
        }
        let coarse_survivors = coarse.len();

        let coarse_symbols: Vec<Symbol> = coarse.iter().map(|c| c.symbol.clone()).collect();
        let series_run = self.pipeline.fetch_series(&coarse_symbols, cancel).await;
        let series_stats = series_run.stats.clone();
        let mut series_map = series_run.into_ok_map();

        let mut detailed: Vec<Candidate> = Vec::new();
        for mut candidate in coarse {
            let Some(series) = series_map.remove(&candidate.symbol) else {
                continue;
            };
            if !self.detail_passes(&candidate.snapshot, &series) {
                continue;
            }
            candidate.series = Some(series);
            detailed.push(candidate);
        }
        let detail_survivors = detailed.len();

        let mut ranked: Vec<Candidate> = detailed
            .into_iter()
            .map(|mut candidate| {
                let series = candidate
                    .series
                    .as_ref()
                    .expect("detail survivors carry a series");
                candidate.score = Some(self.scorer.score(&candidate.snapshot, series));
                candidate
            })
            .collect();
        // Descending by score, ties by symbol for a deterministic order.
        ranked.sort_by(|a, b| {
            let a_score = a.score.as_ref().expect("ranked candidates are scored");
            let b_score = b.score.as_ref().expect("ranked candidates are scored");
            b_score
                .value
                .total_cmp(&a_score.value)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        ranked.truncate(self.filter.max_selected);

        let selected = ranked
            .into_iter()
            .map(|candidate| {
                let score = candidate.score.expect("ranked candidates are scored");
                Selection {
                    symbol: candidate.symbol,
                    score: score.value,
                    reason: score.reason,
                    last_price: candidate.snapshot.last_price,
                    change_rate: candidate.snapshot.change_rate,
                }
            })
            .collect();

        ScreenReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            universe_size,
            coarse_survivors,
            detail_survivors,
            selected,
            cache_hits: snapshot_stats.cache_hits + series_stats.cache_hits,
            cache_misses: snapshot_stats.cache_misses + series_stats.cache_misses,
            soft_fails: merge_soft_fails(&snapshot_stats, &series_stats),
            coarse_rejections: tallies,
            cancelled: snapshot_stats.cancelled || series_stats.cancelled,
        }
    }

    fn dedupe_and_cap(universe: &[Symbol], cap: usize) -> Vec<Symbol> {
        let mut seen = HashSet::new();
        let mut deduped: Vec<Symbol> = universe
            .iter()
            .filter(|symbol| seen.insert((*symbol).clone()))
            .cloned()
            .collect();
        deduped.truncate(cap);
        deduped
    }

    /// Snapshot-only predicates; every floor/ceiling retains the exact
    /// boundary value.
    fn coarse_verdict(&self, symbol: &Symbol, snapshot: &Snapshot) -> CoarseVerdict {
        if snapshot.suspended {
            return CoarseVerdict::Suspended;
        }
        if symbol.is_derivative() {
            return CoarseVerdict::Derivative;
        }
        if snapshot.last_price <= 0.0 || snapshot.last_price < self.filter.min_price {
            return CoarseVerdict::Price;
        }
        if snapshot.volume < self.filter.min_volume {
            return CoarseVerdict::Volume;
        }
        if snapshot.market_cap < self.filter.min_market_cap {
            return CoarseVerdict::MarketCap;
        }
        if snapshot.change_rate.abs() > self.filter.max_change_rate {
            return CoarseVerdict::ChangeRate;
        }
        CoarseVerdict::Keep
    }

    /// Series-derived predicates applied to coarse survivors.
    fn detail_passes(&self, _snapshot: &Snapshot, series: &Series) -> bool {
        if series.len() < self.filter.min_bars {
            return false;
        }
        if let Some(window) = self.filter.momentum_window {
            let above_sma = match (series.last_close(), series.sma_close(window)) {
                (Some(close), Some(sma)) => close > sma,
                _ => false,
            };
            if !above_sma {
                return false;
            }
        }
        if let Some(ceiling) = self.filter.max_volatility {
            match series.return_volatility() {
                Some(volatility) if volatility <= ceiling => {}
                _ => return false,
            }
        }
        true
    }
}

fn merge_soft_fails(a: &FetchStats, b: &FetchStats) -> BTreeMap<FailCategory, u64> {
    let mut merged = a.soft_fails.clone();
    for (category, count) in &b.soft_fails {
        *merged.entry(*category).or_insert(0) += count;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UtcDateTime;

    fn filter() -> FilterConfig {
        FilterConfig::default()
    }

    fn snapshot(volume: u64, price: f64, market_cap: f64, change_rate: f64) -> Snapshot {
        Snapshot::new(
            Symbol::parse("HK.00700").expect("valid"),
            price,
            price,
            price,
            price,
            price,
            volume,
            1.0e7,
            change_rate,
            market_cap,
            false,
            UtcDateTime::parse("2026-03-02T09:30:00Z").expect("valid"),
        )
        .expect("valid snapshot")
    }

    fn screener_with(filter: FilterConfig) -> Screener {
        // The data source is never exercised by the predicate tests.
        struct NeverSource;
        impl DataSource for NeverSource {
            fn fetch_snapshots<'a>(
                &'a self,
                _symbols: &'a [Symbol],
            ) -> std::pin::Pin<
                Box<
                    dyn std::future::Future<
                            Output = Result<
                                std::collections::HashMap<Symbol, Snapshot>,
                                crate::data_source::FetchError,
                            >,
                        > + Send
                        + 'a,
                >,
            > {
                Box::pin(async { Ok(std::collections::HashMap::new()) })
            }

            fn fetch_series<'a>(
                &'a self,
                symbol: &'a Symbol,
                _bar_count: usize,
            ) -> std::pin::Pin<
                Box<
                    dyn std::future::Future<Output = Result<Series, crate::data_source::FetchError>>
                        + Send
                        + 'a,
                >,
            > {
                let symbol = symbol.clone();
                Box::pin(async move { Ok(Series::new(symbol, Vec::new())) })
            }
        }

        let config = ScreenerConfig {
            filter,
            ..ScreenerConfig::default()
        };
        let scorer = Arc::new(|_: &Snapshot, _: &Series| Score {
            value: 0.0,
            reason: String::from("flat"),
        });
        Screener::new(config, Arc::new(NeverSource), scorer).expect("valid config")
    }

    #[test]
    fn volume_floor_is_inclusive() {
        let screener = screener_with(filter());
        let symbol = Symbol::parse("HK.00700").expect("valid");

        let below = snapshot(1_999_999, 5.0, 1.0e9, 0.01);
        assert!(matches!(
            screener.coarse_verdict(&symbol, &below),
            CoarseVerdict::Volume
        ));

        let boundary = snapshot(2_000_000, 5.0, 1.0e9, 0.01);
        assert!(matches!(
            screener.coarse_verdict(&symbol, &boundary),
            CoarseVerdict::Keep
        ));

        let above = snapshot(2_000_001, 5.0, 1.0e9, 0.01);
        assert!(matches!(
            screener.coarse_verdict(&symbol, &above),
            CoarseVerdict::Keep
        ));
    }

    #[test]
    fn price_and_market_cap_floors_are_inclusive() {
        let screener = screener_with(FilterConfig {
            min_price: 1.0,
            min_market_cap: 2.0e8,
            ..filter()
        });
        let symbol = Symbol::parse("HK.00700").expect("valid");

        assert!(matches!(
            screener.coarse_verdict(&symbol, &snapshot(3_000_000, 0.99, 1.0e9, 0.0)),
            CoarseVerdict::Price
        ));
        assert!(matches!(
            screener.coarse_verdict(&symbol, &snapshot(3_000_000, 1.0, 1.0e9, 0.0)),
            CoarseVerdict::Keep
        ));

        assert!(matches!(
            screener.coarse_verdict(&symbol, &snapshot(3_000_000, 5.0, 1.9999e8, 0.0)),
            CoarseVerdict::MarketCap
        ));
        assert!(matches!(
            screener.coarse_verdict(&symbol, &snapshot(3_000_000, 5.0, 2.0e8, 0.0)),
            CoarseVerdict::Keep
        ));
    }

    #[test]
    fn change_rate_ceiling_is_inclusive_and_two_sided() {
        let screener = screener_with(filter());
        let symbol = Symbol::parse("HK.00700").expect("valid");

        assert!(matches!(
            screener.coarse_verdict(&symbol, &snapshot(3_000_000, 5.0, 1.0e9, 0.15)),
            CoarseVerdict::Keep
        ));
        assert!(matches!(
            screener.coarse_verdict(&symbol, &snapshot(3_000_000, 5.0, 1.0e9, 0.151)),
            CoarseVerdict::ChangeRate
        ));
        assert!(matches!(
            screener.coarse_verdict(&symbol, &snapshot(3_000_000, 5.0, 1.0e9, -0.2)),
            CoarseVerdict::ChangeRate
        ));
    }

    #[test]
    fn suspended_and_derivative_are_excluded() {
        let screener = screener_with(filter());

        let mut halted = snapshot(3_000_000, 5.0, 1.0e9, 0.0);
        halted.suspended = true;
        assert!(matches!(
            screener.coarse_verdict(&Symbol::parse("HK.00700").expect("valid"), &halted),
            CoarseVerdict::Suspended
        ));

        let warrant = Symbol::parse("HK.81055").expect("valid");
        assert!(matches!(
            screener.coarse_verdict(&warrant, &snapshot(3_000_000, 5.0, 1.0e9, 0.0)),
            CoarseVerdict::Derivative
        ));
    }

    #[test]
    fn dedupe_preserves_order_and_caps() {
        let a = Symbol::parse("HK.00700").expect("valid");
        let b = Symbol::parse("HK.00005").expect("valid");
        let c = Symbol::parse("HK.00941").expect("valid");

        let deduped = Screener::dedupe_and_cap(
            &[a.clone(), b.clone(), a.clone(), c.clone()],
            2,
        );
        assert_eq!(deduped, vec![a, b]);
    }
}
