//! Immutable run configuration.
//!
//! Every recognized knob is an explicit struct field with a default;
//! validation runs once at construction and fails fast as [`ConfigError`]
//! before any fetch begins. The core never loads or parses config files.

use std::time::Duration;

use thiserror::Error;

/// Conservative per-call wall-time allowance used to derive the useful
/// worker-pool ceiling from the rate budget: with budget/window calls per
/// second sustained, at most `rate * allowance` calls are usefully in
/// flight at once.
const CALL_TIME_ALLOWANCE_SECS: f64 = 5.0;

/// Invalid limiter/pool/filter parameters. Fatal at startup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("window must be greater than zero")]
    ZeroWindow,
    #[error("max_calls_per_window must be greater than zero")]
    ZeroCallBudget,
    #[error("worker_count must be greater than zero")]
    ZeroWorkers,
    #[error("batch_size must be greater than zero")]
    ZeroBatchSize,
    #[error("bar_count must be greater than zero")]
    ZeroBarCount,
    #[error("universe_cap must be greater than zero")]
    ZeroUniverseCap,
    #[error("{which} TTL must be greater than zero")]
    ZeroTtl { which: &'static str },
    #[error("max_selected must be greater than zero")]
    ZeroMaxSelected,
    #[error("filter threshold '{field}' must be finite and non-negative, got {value}")]
    InvalidThreshold { field: &'static str, value: f64 },
    #[error("momentum_window {window} exceeds bar_count {bar_count}")]
    MomentumWindowTooLarge { window: usize, bar_count: usize },
}

/// Limiter, pool, cache and retry parameters for the fetch pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Call budget enforced over any trailing `window`. Pick a value below
    /// the provider's advertised ceiling to leave a safety margin (the
    /// default keeps 2 of 60 slots in reserve).
    pub max_calls_per_window: u32,
    pub window: Duration,
    /// Hard ceiling on pool size; the effective pool is additionally capped
    /// by the rate budget, see [`FetchConfig::effective_worker_count`].
    pub worker_count: usize,
    /// Symbols per upstream snapshot call.
    pub batch_size: usize,
    pub snapshot_ttl: Duration,
    pub series_ttl: Duration,
    /// Retry budget for retryable (network/throttle) failures before a
    /// symbol is downgraded to a soft failure.
    pub max_retries: u32,
    /// Bars requested per series fetch.
    pub bar_count: usize,
    /// Universe truncation bound applied before any fetch.
    pub universe_cap: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_calls_per_window: 58,
            window: Duration::from_secs(30),
            worker_count: 10,
            batch_size: 50,
            snapshot_ttl: Duration::from_secs(300),
            series_ttl: Duration::from_secs(900),
            max_retries: 3,
            bar_count: 60,
            universe_cap: 5_000,
        }
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        if self.max_calls_per_window == 0 {
            return Err(ConfigError::ZeroCallBudget);
        }
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.bar_count == 0 {
            return Err(ConfigError::ZeroBarCount);
        }
        if self.universe_cap == 0 {
            return Err(ConfigError::ZeroUniverseCap);
        }
        if self.snapshot_ttl.is_zero() {
            return Err(ConfigError::ZeroTtl { which: "snapshot" });
        }
        if self.series_ttl.is_zero() {
            return Err(ConfigError::ZeroTtl { which: "series" });
        }
        Ok(())
    }

    /// Pool size actually used by the pipeline.
    ///
    /// Concurrency beyond the budget-derived bound cannot increase
    /// throughput past the rate limit, it only raises wait variance, so the
    /// configured `worker_count` acts as a hard ceiling on that bound.
    pub fn effective_worker_count(&self) -> usize {
        let per_second = f64::from(self.max_calls_per_window) / self.window.as_secs_f64();
        let derived = (per_second * CALL_TIME_ALLOWANCE_SECS).ceil() as usize;
        self.worker_count.min(derived.max(1))
    }
}

/// Stage predicates for the screener.
///
/// All floors/ceilings are inclusive on the retain side: a snapshot with
/// `volume == min_volume` survives the volume floor.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    pub min_price: f64,
    pub min_volume: u64,
    pub min_market_cap: f64,
    /// Ceiling on the absolute day change rate (0.15 = ±15 %).
    pub max_change_rate: f64,
    /// Minimum bars a series must carry to enter the detail stage.
    pub min_bars: usize,
    /// When set, require the last close above the SMA over this window.
    pub momentum_window: Option<usize>,
    /// When set, ceiling on the return volatility of the series.
    pub max_volatility: Option<f64>,
    /// Final shortlist length.
    pub max_selected: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_price: 0.1,
            min_volume: 2_000_000,
            min_market_cap: 2e8,
            max_change_rate: 0.15,
            min_bars: 30,
            momentum_window: Some(20),
            max_volatility: None,
            max_selected: 10,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self, bar_count: usize) -> Result<(), ConfigError> {
        for (field, value) in [
            ("min_price", self.min_price),
            ("min_market_cap", self.min_market_cap),
            ("max_change_rate", self.max_change_rate),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold { field, value });
            }
        }
        if let Some(value) = self.max_volatility {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold {
                    field: "max_volatility",
                    value,
                });
            }
        }
        if self.max_selected == 0 {
            return Err(ConfigError::ZeroMaxSelected);
        }
        if let Some(window) = self.momentum_window {
            if window > bar_count {
                return Err(ConfigError::MomentumWindowTooLarge {
                    window,
                    bar_count,
                });
            }
        }
        Ok(())
    }
}

/// Complete validated screener configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScreenerConfig {
    pub fetch: FetchConfig,
    pub filter: FilterConfig,
}

impl ScreenerConfig {
    pub fn new(fetch: FetchConfig, filter: FilterConfig) -> Result<Self, ConfigError> {
        fetch.validate()?;
        filter.validate(fetch.bar_count)?;
        Ok(Self { fetch, filter })
    }
}
