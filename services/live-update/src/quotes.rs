//! Rolling 24h quote summaries
//!
//! A pair's quote is derived from the newest hourly candles rather than
//! accumulated on its own. Pairs without candles track only the latest
//! close.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::{PairId, PairKey};
use types::numeric::{round_to, Price, Quantity};
use types::pair::PairRef;

use crate::candles::{Candle, Timeframe};
use crate::error::BootstrapError;

/// Hourly candles summarised into a quote.
pub const QUOTE_WINDOW: usize = 25;

/// Hourly candles a series must hold for a full day's summary.
pub const MIN_HOURLY_LENGTH: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSummary {
    pub pair: PairKey,
    pub open: Price,
    pub close: Price,
    pub high: Price,
    pub low: Price,
    pub volume: Quantity,
    pub is_book: bool,
    pub is_show: bool,
}

/// Open of the oldest, close of the newest, extremes and total volume of
/// the last [`QUOTE_WINDOW`] candles. `None` for an empty slice.
pub fn summarize(candles: &[Candle]) -> Option<(Price, Price, Price, Price, Quantity)> {
    let window = &candles[candles.len().saturating_sub(QUOTE_WINDOW)..];
    let (first, last) = (window.first()?, window.last()?);

    let (mut high, mut low, mut volume) = (first.high, first.low, Decimal::ZERO);
    for candle in window {
        high = high.max(candle.high);
        low = low.min(candle.low);
        volume += candle.volume;
    }
    Some((first.open, last.close, high, low, volume))
}

/// Quote of one pair plus its pending-change flag.
#[derive(Debug)]
pub struct QuoteState {
    pair_id: PairId,
    decimals: u32,
    summary: QuoteSummary,
    pending: bool,
}

impl QuoteState {
    /// Build the initial quote from the hourly candles, if the pair has any,
    /// otherwise from the reference price.
    pub fn bootstrap(pair: &PairRef, hourly: Option<&[Candle]>) -> Result<Self, BootstrapError> {
        if Timeframe::H1.length() < MIN_HOURLY_LENGTH {
            return Err(BootstrapError::InvalidConfig(format!(
                "hourly series holds {} candles, need {MIN_HOURLY_LENGTH}",
                Timeframe::H1.length()
            )));
        }

        let summary = match hourly.and_then(summarize) {
            Some((open, close, high, low, volume)) => QuoteSummary {
                pair: pair.key.clone(),
                open,
                close,
                high,
                low,
                volume,
                is_book: pair.quotes_book(),
                is_show: pair.is_show,
            },
            None => {
                let price = pair
                    .price
                    .ok_or_else(|| BootstrapError::MissingStartingPrice { pair: pair.key.clone() })?;
                QuoteSummary {
                    pair: pair.key.clone(),
                    open: Decimal::ZERO,
                    close: price,
                    high: Decimal::ZERO,
                    low: Decimal::ZERO,
                    volume: Decimal::ZERO,
                    is_book: pair.quotes_book(),
                    is_show: pair.is_show,
                }
            }
        };

        Ok(Self {
            pair_id: pair.id,
            decimals: pair.decimals,
            summary,
            pending: false,
        })
    }

    pub fn pair_id(&self) -> PairId {
        self.pair_id
    }

    pub fn summary(&self) -> &QuoteSummary {
        &self.summary
    }

    /// Refresh after a fill. `hourly` is the pair's current hourly window,
    /// or `None` for a pair without candles, which only tracks `price`.
    /// Returns whether the quote changed.
    pub fn record_fill(&mut self, price: Price, hourly: Option<&[Candle]>) -> bool {
        let Some((open, close, high, low, volume)) = hourly.and_then(summarize) else {
            let price = round_to(price, self.decimals);
            let changed = self.summary.close != price;
            self.summary.close = price;
            self.pending |= changed;
            return changed;
        };

        let s = &mut self.summary;
        let changed = s.open != open || s.close != close || s.high != high || s.low != low || s.volume != volume;
        if changed {
            s.open = open;
            s.close = close;
            s.high = high;
            s.low = low;
            s.volume = volume;
            self.pending = true;
        }
        changed
    }

    /// Take the quote if it changed since the last call.
    pub fn take_update(&mut self) -> Option<QuoteSummary> {
        if !std::mem::take(&mut self.pending) {
            return None;
        }
        Some(self.summary.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::time::NANOS_PER_HOUR;

    fn candle(i: i64, open: i64, close: i64, high: i64, low: i64, volume: i64) -> Candle {
        Candle {
            time_start: i * NANOS_PER_HOUR,
            time_finish: (i + 1) * NANOS_PER_HOUR,
            open: Decimal::from(open),
            close: Decimal::from(close),
            high: Decimal::from(high),
            low: Decimal::from(low),
            volume: Decimal::from(volume),
        }
    }

    fn pair() -> PairRef {
        PairRef::internal(1, PairKey::parse("BTC-EUR").unwrap(), 2).with_price(Decimal::from(100))
    }

    #[test]
    fn test_summarize_uses_last_window() {
        let mut candles: Vec<Candle> = (0..30).map(|i| candle(i, 10, 10, 10, 10, 1)).collect();
        candles[0] = candle(0, 1, 1, 1000, 1, 50);
        candles[5] = candle(5, 7, 8, 12, 6, 1);
        candles[29] = candle(29, 10, 11, 15, 9, 2);

        let (open, close, high, low, volume) = summarize(&candles).unwrap();
        assert_eq!(open, Decimal::from(7));
        assert_eq!(close, Decimal::from(11));
        assert_eq!(high, Decimal::from(15));
        assert_eq!(low, Decimal::from(6));
        assert_eq!(volume, Decimal::from(26));
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn test_bootstrap_without_candles_needs_price() {
        let quote = QuoteState::bootstrap(&pair(), None).unwrap();
        assert_eq!(quote.summary().close, Decimal::from(100));

        let unpriced = PairRef::internal(2, PairKey::parse("ETH-EUR").unwrap(), 2);
        assert!(matches!(
            QuoteState::bootstrap(&unpriced, Some(&[])),
            Err(BootstrapError::MissingStartingPrice { .. })
        ));
    }

    #[test]
    fn test_fill_marks_change_only_when_summary_moves() {
        let mut quote = QuoteState::bootstrap(&pair(), Some(&[candle(0, 100, 100, 100, 100, 0)])).unwrap();
        assert!(quote.take_update().is_none());

        let window = [candle(0, 100, 101, 101, 100, 1)];
        assert!(quote.record_fill(Decimal::from(101), Some(&window)));
        assert!(!quote.record_fill(Decimal::from(101), Some(&window)));

        let update = quote.take_update().unwrap();
        assert_eq!(update.close, Decimal::from(101));
        assert_eq!(update.volume, Decimal::ONE);
        assert!(quote.take_update().is_none());
    }

    #[test]
    fn test_pair_without_candles_tracks_close() {
        let mut quote = QuoteState::bootstrap(&pair(), None).unwrap();
        assert!(quote.record_fill(Decimal::new(105_123, 3), None));
        assert_eq!(quote.take_update().unwrap().close, Decimal::new(10512, 2));
    }
}
