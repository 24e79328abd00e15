//! OHLCV candle type and the validated window the pipeline operates on.
//!
//! A `CandleWindow` is the single input every detection engine consumes:
//! an ordered, timestamp-unique OHLCV series. Ordering problems are adapter
//! errors caught at construction, never detection-time fallbacks.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Candle body closed above its open
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Upper wick length (high above the body)
    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    /// Lower wick length (body above the low)
    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    /// Full bar range
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Ordered, timestamp-unique OHLCV series.
///
/// Construction validates ordering and uniqueness; everything downstream can
/// rely on both without re-checking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleWindow {
    candles: Vec<Candle>,
}

impl CandleWindow {
    /// Build a window from raw candles, rejecting malformed series.
    pub fn new(candles: Vec<Candle>) -> Result<Self> {
        if candles.is_empty() {
            bail!("candle window is empty");
        }
        for pair in candles.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                bail!(
                    "candles out of order or duplicated at {} -> {}",
                    pair[0].timestamp,
                    pair[1].timestamp
                );
            }
        }
        for c in &candles {
            if !(c.open.is_finite() && c.high.is_finite() && c.low.is_finite() && c.close.is_finite()) {
                bail!("non-finite price in candle at {}", c.timestamp);
            }
            if c.high < c.low {
                bail!("candle high below low at {}", c.timestamp);
            }
        }
        Ok(Self { candles })
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Latest (most recent) candle. The window is never empty.
    pub fn last(&self) -> &Candle {
        self.candles.last().expect("window is never empty")
    }

    /// Last close, the pipeline's working definition of current price
    pub fn current_price(&self) -> f64 {
        self.last().close
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    /// Sub-window without the most recent candle, for previous-bar readings.
    /// Returns `None` when only one candle is present.
    pub fn without_last(&self) -> Option<CandleWindow> {
        if self.candles.len() < 2 {
            return None;
        }
        Some(CandleWindow {
            candles: self.candles[..self.candles.len() - 1].to_vec(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rejects_out_of_order() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mk = |t| Candle {
            timestamp: t,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        };
        assert!(CandleWindow::new(vec![mk(t0), mk(t1)]).is_err());
        assert!(CandleWindow::new(vec![mk(t0), mk(t0)]).is_err());
    }

    #[test]
    fn test_rejects_empty() {
        assert!(CandleWindow::new(vec![]).is_err());
    }

    #[test]
    fn test_wick_math() {
        let w = window_from_bars(&[(10.0, 12.0, 9.0, 11.0, 1.0)]);
        let c = w.last();
        assert!(c.is_bullish());
        assert!((c.upper_wick() - 1.0).abs() < 1e-9);
        assert!((c.lower_wick() - 1.0).abs() < 1e-9);
        assert!((c.range() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_without_last() {
        let w = rising_window(100.0, 1.0, 5);
        let prev = w.without_last().unwrap();
        assert_eq!(prev.len(), 4);
        assert!(prev.current_price() < w.current_price());
    }
}
