use serde::{Deserialize, Serialize};

use crate::{Symbol, UtcDateTime, ValidationError};

/// Point-in-time market snapshot for one symbol.
///
/// Immutable after construction; `fetched_at` records when the upstream
/// produced it, which the cache uses only indirectly (the cache keeps its own
/// expiry clock).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: Symbol,
    pub last_price: f64,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub prev_close: f64,
    pub volume: u64,
    pub turnover: f64,
    /// Day change as a signed fraction (0.03 = +3 %).
    pub change_rate: f64,
    pub market_cap: f64,
    pub suspended: bool,
    pub fetched_at: UtcDateTime,
}

impl Snapshot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        last_price: f64,
        open_price: f64,
        high_price: f64,
        low_price: f64,
        prev_close: f64,
        volume: u64,
        turnover: f64,
        change_rate: f64,
        market_cap: f64,
        suspended: bool,
        fetched_at: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("last_price", last_price)?;
        validate_non_negative("open_price", open_price)?;
        validate_non_negative("high_price", high_price)?;
        validate_non_negative("low_price", low_price)?;
        validate_non_negative("prev_close", prev_close)?;
        validate_non_negative("turnover", turnover)?;
        validate_non_negative("market_cap", market_cap)?;
        validate_finite("change_rate", change_rate)?;

        Ok(Self {
            symbol,
            last_price,
            open_price,
            high_price,
            low_price,
            prev_close,
            volume,
            turnover,
            change_rate,
            market_cap,
            suspended,
            fetched_at,
        })
    }

    /// Absolute price move against the previous close.
    pub fn price_change(&self) -> f64 {
        self.last_price - self.prev_close
    }
}

/// OHLCV bar record for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: UtcDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    pub fn new(
        ts: UtcDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("open", open)?;
        validate_non_negative("high", high)?;
        validate_non_negative("low", low)?;
        validate_non_negative("close", close)?;

        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }

        if open < low || open > high || close < low || close > high {
            return Err(ValidationError::InvalidBarBounds);
        }

        Ok(Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

/// Ordered bar history for a symbol; immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub symbol: Symbol,
    pub bars: Vec<Bar>,
}

impl Series {
    pub fn new(symbol: Symbol, bars: Vec<Bar>) -> Self {
        Self { symbol, bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Simple moving average of the last `window` closes.
    ///
    /// Returns `None` when fewer than `window` bars are available or the
    /// window is zero.
    pub fn sma_close(&self, window: usize) -> Option<f64> {
        if window == 0 || self.bars.len() < window {
            return None;
        }
        let tail = &self.bars[self.bars.len() - window..];
        Some(tail.iter().map(|bar| bar.close).sum::<f64>() / window as f64)
    }

    /// Sample standard deviation of bar-over-bar close returns.
    pub fn return_volatility(&self) -> Option<f64> {
        if self.bars.len() < 3 {
            return None;
        }

        let returns: Vec<f64> = self
            .bars
            .windows(2)
            .filter(|pair| pair[0].close > 0.0)
            .map(|pair| pair[1].close / pair[0].close - 1.0)
            .collect();
        if returns.len() < 2 {
            return None;
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / (returns.len() - 1) as f64;
        Some(variance.sqrt())
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|bar| bar.close)
    }
}

pub(crate) fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    validate_finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

pub(crate) fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> UtcDateTime {
        UtcDateTime::parse("2026-03-02T09:30:00Z").expect("valid timestamp")
    }

    fn bar(close: f64) -> Bar {
        Bar::new(ts(), close, close, close, close, 1_000).expect("valid bar")
    }

    #[test]
    fn bar_rejects_inverted_range() {
        let err = Bar::new(ts(), 100.0, 95.0, 105.0, 102.0, 10).expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidBarRange));
    }

    #[test]
    fn bar_rejects_open_outside_bounds() {
        let err = Bar::new(ts(), 110.0, 105.0, 95.0, 102.0, 10).expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidBarBounds));
    }

    #[test]
    fn snapshot_rejects_negative_price() {
        let err = Snapshot::new(
            Symbol::parse("HK.00700").expect("valid"),
            -1.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0,
            0.0,
            0.0,
            0.0,
            false,
            ts(),
        )
        .expect_err("must fail");
        assert!(matches!(err, ValidationError::NegativeValue { field: "last_price" }));
    }

    #[test]
    fn sma_requires_full_window() {
        let series = Series::new(
            Symbol::parse("HK.00700").expect("valid"),
            vec![bar(10.0), bar(20.0), bar(30.0)],
        );
        assert_eq!(series.sma_close(3), Some(20.0));
        assert_eq!(series.sma_close(2), Some(25.0));
        assert_eq!(series.sma_close(4), None);
        assert_eq!(series.sma_close(0), None);
    }

    #[test]
    fn volatility_of_constant_closes_is_zero() {
        let series = Series::new(
            Symbol::parse("HK.00700").expect("valid"),
            vec![bar(10.0), bar(10.0), bar(10.0), bar(10.0)],
        );
        let vol = series.return_volatility().expect("enough bars");
        assert!(vol.abs() < 1e-12);
    }
}
