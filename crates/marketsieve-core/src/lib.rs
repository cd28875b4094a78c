//! # Marketsieve Core
//!
//! Rate-limited market data acquisition and staged screening.
//!
//! ## Overview
//!
//! The crate turns a large symbol universe into a short ranked candidate
//! list. The interesting part is not the filtering arithmetic but the
//! acquisition machinery between the universe and the scorer:
//!
//! - a **sliding-window rate limiter** shared by every upstream call,
//! - **TTL caches** with request collapsing (one in-flight fill per key),
//! - a **bounded worker pipeline** that degrades per-symbol failures into
//!   soft exclusions instead of aborting the run.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Upstream gateway adapter |
//! | [`cache`] | TTL cache with request collapsing |
//! | [`cancel`] | Run-scoped cancellation token |
//! | [`config`] | Immutable validated configuration |
//! | [`data_source`] | Provider contract and failure taxonomy |
//! | [`domain`] | Symbol, Snapshot, Bar, Series |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`limiter`] | Sliding-window rate limiter |
//! | [`pipeline`] | Bounded-concurrency fetch pipeline |
//! | [`retry`] | Backoff schedule for retryable failures |
//! | [`screener`] | Staged universe reduction and ranking |
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use marketsieve_core::{
//!     CancelToken, GatewayAdapter, Score, ScreenerConfig, Screener, Symbol,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScreenerConfig::default();
//!     let source = Arc::new(GatewayAdapter::default());
//!     let scorer = Arc::new(|snapshot: &_, series: &_| Score {
//!         value: 50.0,
//!         reason: String::from("baseline"),
//!     });
//!
//!     let screener = Screener::new(config, source, scorer)?;
//!     let universe = vec![Symbol::parse("HK.00700")?, Symbol::parse("HK.00005")?];
//!     let report = screener.run(&universe, &CancelToken::new()).await;
//!
//!     println!("{} selected of {}", report.selected_count(), report.universe_size);
//!     Ok(())
//! }
//! ```
//!
//! ## Failure model
//!
//! Per-symbol upstream failures (quota, throttle, network, protocol) are
//! soft: the symbol is excluded and counted, the run continues. Only invalid
//! configuration and cancellation are run-level outcomes.

pub mod adapters;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod limiter;
pub mod pipeline;
pub mod retry;
pub mod screener;

pub use adapters::{classify_upstream, GatewayAdapter};
pub use cache::{CacheMetrics, TtlCache};
pub use cancel::CancelToken;
pub use config::{ConfigError, FetchConfig, FilterConfig, ScreenerConfig};
pub use data_source::{
    DataSource, FailCategory, FetchError, FetchErrorKind, FetchOutcome, SoftFailure,
};
pub use domain::{Bar, Series, Snapshot, Symbol, UtcDateTime};
pub use error::{CoreError, ValidationError};
pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, NoopHttpClient, ReqwestHttpClient};
pub use limiter::SlidingWindowLimiter;
pub use pipeline::{FetchPipeline, FetchStats, PipelineRun};
pub use retry::Backoff;
pub use screener::{
    Candidate, CoarseTallies, Score, Scorer, ScreenReport, Screener, Selection,
};
