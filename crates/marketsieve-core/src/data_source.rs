//! Data source contract and the fetch failure taxonomy.
//!
//! The trait is the seam between the acquisition core and whatever talks to
//! the broker. Implementations classify upstream failures into the structured
//! [`FetchError`] kinds at this boundary; nothing downstream inspects error
//! text.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::{Series, Snapshot, Symbol};

/// Failure classification for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Upstream rejected the call rate despite local limiting; retryable
    /// after a delay.
    Throttled,
    /// Hard quota exhaustion; the symbol is excluded for the rest of the run.
    QuotaExhausted,
    /// Transient transport failure; retryable with backoff.
    Network,
    /// Malformed or unexpected response; a per-symbol soft failure.
    Protocol,
    /// The run's cancellation signal fired while this call was waiting.
    /// Internal: never counted as a soft-failure category.
    Cancelled,
}

/// Structured upstream error returned by [`DataSource`] implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
}

impl FetchError {
    pub fn throttled(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Throttled,
            message: message.into(),
        }
    }

    pub fn quota_exhausted(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::QuotaExhausted,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Network,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Protocol,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FetchErrorKind::Cancelled,
            message: String::from("run cancelled"),
        }
    }

    pub const fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the pipeline may retry this failure.
    pub const fn retryable(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::Throttled | FetchErrorKind::Network
        )
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, FetchErrorKind::Cancelled)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            FetchErrorKind::Throttled => "fetch.throttled",
            FetchErrorKind::QuotaExhausted => "fetch.quota_exhausted",
            FetchErrorKind::Network => "fetch.network",
            FetchErrorKind::Protocol => "fetch.protocol",
            FetchErrorKind::Cancelled => "fetch.cancelled",
        }
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for FetchError {}

/// Soft-failure category recorded in run statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailCategory {
    Throttled,
    QuotaExhausted,
    Network,
    Protocol,
}

impl FailCategory {
    /// Maps a terminal fetch error to its statistics bucket.
    ///
    /// `Cancelled` has no bucket: cancellation is a run-level outcome.
    pub fn from_error(error: &FetchError) -> Option<Self> {
        match error.kind() {
            FetchErrorKind::Throttled => Some(Self::Throttled),
            FetchErrorKind::QuotaExhausted => Some(Self::QuotaExhausted),
            FetchErrorKind::Network => Some(Self::Network),
            FetchErrorKind::Protocol => Some(Self::Protocol),
            FetchErrorKind::Cancelled => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Throttled => "throttled",
            Self::QuotaExhausted => "quota_exhausted",
            Self::Network => "network",
            Self::Protocol => "protocol",
        }
    }
}

impl Display for FailCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-symbol soft failure: the symbol is excluded from this run, the run
/// itself continues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftFailure {
    pub category: FailCategory,
    pub message: String,
}

impl SoftFailure {
    pub fn from_error(error: &FetchError) -> Option<Self> {
        FailCategory::from_error(error).map(|category| Self {
            category,
            message: error.message().to_owned(),
        })
    }
}

/// Final per-symbol outcome emitted by the fetch pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Ok(T),
    Soft(SoftFailure),
}

impl<T> FetchOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Soft(_) => None,
        }
    }

    pub fn as_soft(&self) -> Option<&SoftFailure> {
        match self {
            Self::Ok(_) => None,
            Self::Soft(failure) => Some(failure),
        }
    }
}

/// Upstream market data provider contract.
///
/// Implementations must be `Send + Sync`; the pipeline shares one instance
/// across its worker pool. Snapshot fetches are batched (one upstream call
/// per symbol set), series fetches are per symbol.
pub trait DataSource: Send + Sync {
    /// Fetches snapshots for a set of symbols in one upstream call.
    ///
    /// Symbols absent from the returned map are resolved by the caller as
    /// protocol-level soft failures, so partial responses are permitted.
    fn fetch_snapshots<'a>(
        &'a self,
        symbols: &'a [Symbol],
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<Symbol, Snapshot>, FetchError>> + Send + 'a>>;

    /// Fetches the trailing `bar_count` bars for one symbol.
    fn fetch_series<'a>(
        &'a self,
        symbol: &'a Symbol,
        bar_count: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Series, FetchError>> + Send + 'a>>;
}
