//! Shared fakes and helpers for behavior tests.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use marketsieve_core::{Bar, DataSource, FetchError, Series, Snapshot, Symbol, UtcDateTime};

pub fn sym(value: &str) -> Symbol {
    Symbol::parse(value).expect("valid test symbol")
}

/// Deterministic bar timestamp: day `index` of a fixed epoch.
pub fn bar_ts(index: usize) -> UtcDateTime {
    let base = time::OffsetDateTime::from_unix_timestamp(1_700_000_000 + index as i64 * 86_400)
        .expect("valid unix timestamp");
    UtcDateTime::from_offset_datetime(base).expect("unix timestamps are UTC")
}

struct ErrorScript {
    error: FetchError,
    /// `None` fails forever; `Some(n)` fails the next `n` calls.
    remaining: Option<u32>,
}

impl ErrorScript {
    fn next_error(&mut self) -> Option<FetchError> {
        match &mut self.remaining {
            None => Some(self.error.clone()),
            Some(0) => None,
            Some(remaining) => {
                *remaining -= 1;
                Some(self.error.clone())
            }
        }
    }
}

/// Scriptable [`DataSource`] fake.
///
/// Defaults produce coarse-filter-passing snapshots (volume 3M, price 10,
/// market cap 1e9, change +1 %) and gently rising series that pass the
/// momentum predicate. Individual symbols can be overridden to fail, go
/// missing, fall, or carry short histories.
#[derive(Default)]
pub struct ScriptedSource {
    snapshot_calls: AtomicU32,
    series_calls: AtomicU32,
    series_call_times: Mutex<Vec<tokio::time::Instant>>,
    volumes: HashMap<Symbol, u64>,
    prices: HashMap<Symbol, f64>,
    market_caps: HashMap<Symbol, f64>,
    change_rates: HashMap<Symbol, f64>,
    suspended: HashSet<Symbol>,
    omitted_from_snapshot: HashSet<Symbol>,
    falling: HashSet<Symbol>,
    short_series: HashMap<Symbol, usize>,
    series_errors: Mutex<HashMap<Symbol, ErrorScript>>,
    snapshot_failures: Mutex<Option<ErrorScript>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(mut self, symbol: &Symbol, volume: u64) -> Self {
        self.volumes.insert(symbol.clone(), volume);
        self
    }

    pub fn with_price(mut self, symbol: &Symbol, price: f64) -> Self {
        self.prices.insert(symbol.clone(), price);
        self
    }

    pub fn with_market_cap(mut self, symbol: &Symbol, market_cap: f64) -> Self {
        self.market_caps.insert(symbol.clone(), market_cap);
        self
    }

    pub fn with_change_rate(mut self, symbol: &Symbol, change_rate: f64) -> Self {
        self.change_rates.insert(symbol.clone(), change_rate);
        self
    }

    pub fn with_suspended(mut self, symbol: &Symbol) -> Self {
        self.suspended.insert(symbol.clone());
        self
    }

    /// Symbol silently missing from every snapshot response.
    pub fn with_omitted(mut self, symbol: &Symbol) -> Self {
        self.omitted_from_snapshot.insert(symbol.clone());
        self
    }

    /// Series closes fall instead of rise, so the momentum predicate drops
    /// the symbol.
    pub fn with_falling(mut self, symbol: &Symbol) -> Self {
        self.falling.insert(symbol.clone());
        self
    }

    pub fn with_short_series(mut self, symbol: &Symbol, bars: usize) -> Self {
        self.short_series.insert(symbol.clone(), bars);
        self
    }

    /// Series fetches for `symbol` fail with `error`; `times` bounds how
    /// many calls fail (`None` = every call).
    pub fn with_series_error(self, symbol: &Symbol, error: FetchError, times: Option<u32>) -> Self {
        self.series_errors
            .lock()
            .expect("series error script lock")
            .insert(
                symbol.clone(),
                ErrorScript {
                    error,
                    remaining: times,
                },
            );
        self
    }

    /// The next `times` snapshot batch calls fail with `error`.
    pub fn with_snapshot_failures(self, error: FetchError, times: u32) -> Self {
        *self
            .snapshot_failures
            .lock()
            .expect("snapshot failure script lock") = Some(ErrorScript {
            error,
            remaining: Some(times),
        });
        self
    }

    /// Upstream snapshot batch calls made so far.
    pub fn snapshot_calls(&self) -> u32 {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    /// Upstream series calls made so far.
    pub fn series_calls(&self) -> u32 {
        self.series_calls.load(Ordering::SeqCst)
    }

    /// Instants at which series calls reached the upstream.
    pub fn series_call_times(&self) -> Vec<tokio::time::Instant> {
        self.series_call_times
            .lock()
            .expect("series call log lock")
            .clone()
    }

    fn snapshot_for(&self, symbol: &Symbol) -> Snapshot {
        let price = self.prices.get(symbol).copied().unwrap_or(10.0);
        Snapshot::new(
            symbol.clone(),
            price,
            price * 0.99,
            price * 1.02,
            price * 0.98,
            price * 0.99,
            self.volumes.get(symbol).copied().unwrap_or(3_000_000),
            5.0e7,
            self.change_rates.get(symbol).copied().unwrap_or(0.01),
            self.market_caps.get(symbol).copied().unwrap_or(1.0e9),
            self.suspended.contains(symbol),
            UtcDateTime::now(),
        )
        .expect("scripted snapshot is valid")
    }

    fn series_for(&self, symbol: &Symbol, bar_count: usize) -> Series {
        let len = self.short_series.get(symbol).copied().unwrap_or(bar_count);
        let step: f64 = if self.falling.contains(symbol) {
            -0.01
        } else {
            0.01
        };
        let bars = (0..len)
            .map(|i| {
                let close = 10.0 * (1.0 + step).powi(i as i32);
                let open = close * 0.995;
                let high = close * 1.011;
                let low = close * 0.99;
                Bar::new(bar_ts(i), open, high, low, close, 1_000_000)
                    .expect("scripted bar is valid")
            })
            .collect();
        Series::new(symbol.clone(), bars)
    }
}

impl DataSource for ScriptedSource {
    fn fetch_snapshots<'a>(
        &'a self,
        symbols: &'a [Symbol],
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<Symbol, Snapshot>, FetchError>> + Send + 'a>>
    {
        Box::pin(async move {
            self.snapshot_calls.fetch_add(1, Ordering::SeqCst);

            let scripted = self
                .snapshot_failures
                .lock()
                .expect("snapshot failure script lock")
                .as_mut()
                .and_then(ErrorScript::next_error);
            if let Some(error) = scripted {
                return Err(error);
            }

            Ok(symbols
                .iter()
                .filter(|symbol| !self.omitted_from_snapshot.contains(symbol))
                .map(|symbol| (symbol.clone(), self.snapshot_for(symbol)))
                .collect())
        })
    }

    fn fetch_series<'a>(
        &'a self,
        symbol: &'a Symbol,
        bar_count: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Series, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            self.series_calls.fetch_add(1, Ordering::SeqCst);
            self.series_call_times
                .lock()
                .expect("series call log lock")
                .push(tokio::time::Instant::now());

            let scripted = self
                .series_errors
                .lock()
                .expect("series error script lock")
                .get_mut(symbol)
                .and_then(ErrorScript::next_error);
            if let Some(error) = scripted {
                return Err(error);
            }

            Ok(self.series_for(symbol, bar_count))
        })
    }
}
