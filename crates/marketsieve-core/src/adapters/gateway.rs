//! Broker gateway adapter.
//!
//! Speaks JSON over HTTP to a local quote gateway (the daemon that owns the
//! broker session). This is the only place upstream failure text is
//! interpreted; everything above the [`DataSource`] boundary sees structured
//! [`FetchError`] kinds.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;

use crate::data_source::{DataSource, FetchError};
use crate::http_client::{HttpClient, HttpRequest, NoopHttpClient};
use crate::{Bar, Series, Snapshot, Symbol, UtcDateTime};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11111";

/// Maps an upstream status/message pair to a structured error.
///
/// The gateway forwards broker error text verbatim, so phrase matching is
/// unavoidable; it is confined to this one function.
pub fn classify_upstream(status: u16, message: &str) -> FetchError {
    if status == 429 {
        return FetchError::throttled(format!("upstream throttled: {message}"));
    }
    if status >= 500 {
        return FetchError::network(format!("upstream unavailable ({status}): {message}"));
    }

    let lowered = message.to_lowercase();
    if lowered.contains("quota") || message.contains("额度") {
        return FetchError::quota_exhausted(message.to_owned());
    }
    if lowered.contains("frequency") || lowered.contains("too many requests")
        || message.contains("频率")
    {
        return FetchError::throttled(message.to_owned());
    }

    FetchError::protocol(format!("unexpected upstream reply ({status}): {message}"))
}

#[derive(Debug, Deserialize)]
struct GatewayEnvelope<T> {
    ret: i32,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SnapshotPayload {
    code: String,
    last_price: f64,
    open_price: f64,
    high_price: f64,
    low_price: f64,
    prev_close: f64,
    volume: u64,
    turnover: f64,
    change_rate: f64,
    market_cap: f64,
    #[serde(default)]
    suspended: bool,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    code: String,
    bars: Vec<BarPayload>,
}

#[derive(Debug, Deserialize)]
struct BarPayload {
    ts: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

/// [`DataSource`] implementation backed by the quote gateway.
pub struct GatewayAdapter {
    base_url: String,
    http: Arc<dyn HttpClient>,
    timeout_ms: u64,
}

impl Default for GatewayAdapter {
    fn default() -> Self {
        Self {
            base_url: String::from(DEFAULT_BASE_URL),
            http: Arc::new(NoopHttpClient),
            timeout_ms: 3_000,
        }
    }
}

impl GatewayAdapter {
    pub fn new(base_url: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        Self {
            base_url: base_url.into(),
            http,
            timeout_ms: 3_000,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    async fn call<T>(&self, url: String) -> Result<T, FetchError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let request = HttpRequest::get(url).with_timeout_ms(self.timeout_ms);
        let response = self.http.execute(request).await.map_err(|error| {
            if error.retryable() {
                FetchError::network(format!("gateway transport: {}", error.message()))
            } else {
                FetchError::protocol(format!("gateway transport: {}", error.message()))
            }
        })?;

        if !response.is_success() {
            return Err(classify_upstream(response.status, &response.body));
        }

        let envelope: GatewayEnvelope<T> = serde_json::from_str(&response.body)
            .map_err(|error| FetchError::protocol(format!("malformed gateway reply: {error}")))?;

        if envelope.ret != 0 {
            return Err(classify_upstream(response.status, &envelope.msg));
        }

        envelope
            .data
            .ok_or_else(|| FetchError::protocol("gateway reply carries no data"))
    }

    fn normalize_snapshot(payload: SnapshotPayload) -> Result<(Symbol, Snapshot), FetchError> {
        let symbol = Symbol::parse(&payload.code)
            .map_err(|error| FetchError::protocol(format!("bad symbol in reply: {error}")))?;
        let snapshot = Snapshot::new(
            symbol.clone(),
            payload.last_price,
            payload.open_price,
            payload.high_price,
            payload.low_price,
            payload.prev_close,
            payload.volume,
            payload.turnover,
            payload.change_rate,
            payload.market_cap,
            payload.suspended,
            UtcDateTime::now(),
        )
        .map_err(|error| FetchError::protocol(format!("bad snapshot for {symbol}: {error}")))?;
        Ok((symbol, snapshot))
    }

    fn normalize_series(payload: KlinePayload, bar_count: usize) -> Result<Series, FetchError> {
        let symbol = Symbol::parse(&payload.code)
            .map_err(|error| FetchError::protocol(format!("bad symbol in reply: {error}")))?;

        let mut bars = Vec::with_capacity(payload.bars.len().min(bar_count));
        for bar in payload.bars {
            let ts = UtcDateTime::parse(&bar.ts)
                .map_err(|error| FetchError::protocol(format!("bad bar timestamp: {error}")))?;
            let bar = Bar::new(ts, bar.open, bar.high, bar.low, bar.close, bar.volume)
                .map_err(|error| FetchError::protocol(format!("bad bar for {symbol}: {error}")))?;
            bars.push(bar);
        }
        // The gateway may return a longer history; keep the trailing window.
        if bars.len() > bar_count {
            bars.drain(..bars.len() - bar_count);
        }

        Ok(Series::new(symbol, bars))
    }
}

impl DataSource for GatewayAdapter {
    fn fetch_snapshots<'a>(
        &'a self,
        symbols: &'a [Symbol],
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<Symbol, Snapshot>, FetchError>> + Send + 'a>>
    {
        Box::pin(async move {
            if symbols.is_empty() {
                return Ok(HashMap::new());
            }

            let joined = symbols
                .iter()
                .map(Symbol::as_str)
                .collect::<Vec<_>>()
                .join(",");
            let url = format!(
                "{}/v1/snapshot?symbols={}",
                self.base_url,
                urlencoding::encode(&joined)
            );

            let payloads: Vec<SnapshotPayload> = self.call(url).await?;
            let mut snapshots = HashMap::with_capacity(payloads.len());
            for payload in payloads {
                match Self::normalize_snapshot(payload) {
                    Ok((symbol, snapshot)) => {
                        snapshots.insert(symbol, snapshot);
                    }
                    // One bad row is not a reason to drop the whole batch;
                    // the pipeline resolves absent symbols per key.
                    Err(error) => log::warn!("skipping malformed snapshot row: {error}"),
                }
            }
            Ok(snapshots)
        })
    }

    fn fetch_series<'a>(
        &'a self,
        symbol: &'a Symbol,
        bar_count: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Series, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!(
                "{}/v1/kline?symbol={}&count={}",
                self.base_url,
                urlencoding::encode(symbol.as_str()),
                bar_count
            );
            let payload: KlinePayload = self.call(url).await?;
            Self::normalize_series(payload, bar_count)
        })
    }
}
