//! Trade tape for public fill events
//!
//! Keeps the most recent fills per pair in a bounded buffer. New fills
//! are pending until the next harvest, which returns them newest first and
//! then trims the buffer to capacity.
//!
//! The tape also serves as the fill source for external pairs when their
//! candles are rebuilt at bootstrap.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::PairKey;
use types::numeric::{Price, Quantity};

/// A public fill. Contains no account information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Execution timestamp (Unix nanos).
    pub time_executed: i64,
    pub price: Price,
    pub quantity: Quantity,
}

/// Close/high/low/volume of the fills inside a time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillAggregate {
    /// Price of the latest fill in the range.
    pub close: Price,
    pub high: Price,
    pub low: Price,
    pub volume: Quantity,
}

impl FillAggregate {
    /// Aggregate fills given in execution order. `None` if empty.
    pub fn from_fills<'a>(fills: impl IntoIterator<Item = &'a Fill>) -> Option<Self> {
        let mut iter = fills.into_iter();
        let first = iter.next()?;
        let mut agg = FillAggregate {
            close: first.price,
            high: first.price,
            low: first.price,
            volume: first.quantity,
        };
        for fill in iter {
            agg.close = fill.price;
            agg.high = agg.high.max(fill.price);
            agg.low = agg.low.min(fill.price);
            agg.volume += fill.quantity;
        }
        Some(agg)
    }
}

/// Bounded recent-fill tape for one pair.
#[derive(Debug)]
pub struct TradeTape {
    pair: PairKey,
    /// Oldest first.
    fills: VecDeque<Fill>,
    /// Number of newest fills not yet harvested.
    pending: usize,
    capacity: usize,
}

impl TradeTape {
    pub fn new(pair: PairKey, capacity: usize) -> Self {
        Self {
            pair,
            fills: VecDeque::with_capacity(capacity),
            pending: 0,
            capacity,
        }
    }

    pub fn pair(&self) -> &PairKey {
        &self.pair
    }

    /// Append a fill. It stays pending until the next harvest.
    pub fn record(&mut self, fill: Fill) {
        self.fills.push_back(fill);
        self.pending += 1;
    }

    /// Return pending fills (newest first), then trim to capacity.
    pub fn harvest(&mut self) -> Vec<Fill> {
        let result: Vec<Fill> = self.fills.iter().rev().take(self.pending).cloned().collect();
        self.pending = 0;

        while self.fills.len() > self.capacity {
            self.fills.pop_front();
        }
        result
    }

    /// Most recent fills, newest first. Does not clear pending state.
    pub fn recent(&self, limit: usize) -> Vec<Fill> {
        self.fills.iter().rev().take(limit).cloned().collect()
    }

    /// Aggregate fills executed in `[from, to)`, ordered by execution time.
    pub fn aggregate(&self, from: i64, to: i64) -> Option<FillAggregate> {
        let mut inside: Vec<&Fill> = self
            .fills
            .iter()
            .filter(|f| from <= f.time_executed && f.time_executed < to)
            .collect();
        inside.sort_by_key(|f| f.time_executed);
        FillAggregate::from_fills(inside)
    }

    /// Price of the latest fill executed strictly before `before`.
    pub fn last_price_before(&self, before: i64) -> Option<Price> {
        self.fills
            .iter()
            .rev()
            .filter(|f| f.time_executed < before)
            .max_by_key(|f| f.time_executed)
            .map(|f| f.price)
    }

    pub fn len(&self) -> usize {
        self.fills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Sum of quantities currently on the tape.
    pub fn total_quantity(&self) -> Quantity {
        self.fills.iter().map(|f| f.quantity).sum::<Decimal>()
    }
}
