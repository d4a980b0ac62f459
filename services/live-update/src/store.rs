//! Storage collaborator boundary
//!
//! The engine reads resting orders, persisted candles and fill history
//! through [`MarketStore`] at bootstrap, and writes candles and the latest
//! quote price back during harvest. Calls are synchronous; implementations
//! backed by a remote database are expected to keep them short.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use types::ids::PairId;
use types::numeric::{Price, Quantity};
use types::order::Side;

use crate::candles::{Candle, Timeframe};
use crate::trades::{Fill, FillAggregate};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store query failed: {0}")]
    Query(String),
}

pub trait MarketStore: Send + Sync {
    /// Resting order quantity grouped by price for one side.
    fn resting_depth(&self, pair: PairId, side: Side) -> Result<Vec<(Price, Quantity)>, StoreError>;

    /// Persisted candles with `time_start >= from`, oldest first.
    fn persisted_candles(&self, pair: PairId, timeframe: Timeframe, from: i64) -> Result<Vec<Candle>, StoreError>;

    /// Start of the newest persisted candle.
    fn last_persisted_start(&self, pair: PairId, timeframe: Timeframe) -> Result<Option<i64>, StoreError>;

    /// Aggregate of the venue's own fills executed in `[from, to)`.
    fn fill_aggregate(&self, pair: PairId, from: i64, to: i64) -> Result<Option<FillAggregate>, StoreError>;

    /// Price of the venue's latest fill executed before `before`.
    fn previous_fill_price(&self, pair: PairId, before: i64) -> Result<Option<Price>, StoreError>;

    /// Write the latest quote close back to the pair record.
    fn update_price(&self, pair: PairId, price: Price) -> Result<(), StoreError>;

    /// Upsert candles keyed by `time_start`.
    fn save_candles(&self, pair: PairId, timeframe: Timeframe, candles: &[Candle]) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct StoreState {
    resting: BTreeMap<(PairId, Side), BTreeMap<Price, Quantity>>,
    candles: BTreeMap<(PairId, Timeframe), BTreeMap<i64, Candle>>,
    fills: BTreeMap<PairId, Vec<Fill>>,
    prices: BTreeMap<PairId, Price>,
}

/// Map-backed store for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store poisoned".into()))
    }

    pub fn add_resting(&self, pair: PairId, side: Side, price: Price, quantity: Quantity) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        *state.resting.entry((pair, side)).or_default().entry(price).or_default() += quantity;
        Ok(())
    }

    pub fn add_fill(&self, pair: PairId, fill: Fill) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let fills = state.fills.entry(pair).or_default();
        fills.push(fill);
        fills.sort_by_key(|f| f.time_executed);
        Ok(())
    }

    pub fn candles(&self, pair: PairId, timeframe: Timeframe) -> Result<Vec<Candle>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .candles
            .get(&(pair, timeframe))
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    pub fn price(&self, pair: PairId) -> Result<Option<Price>, StoreError> {
        Ok(self.lock()?.prices.get(&pair).copied())
    }
}

impl MarketStore for InMemoryStore {
    fn resting_depth(&self, pair: PairId, side: Side) -> Result<Vec<(Price, Quantity)>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .resting
            .get(&(pair, side))
            .map(|levels| levels.iter().map(|(p, q)| (*p, *q)).collect())
            .unwrap_or_default())
    }

    fn persisted_candles(&self, pair: PairId, timeframe: Timeframe, from: i64) -> Result<Vec<Candle>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .candles
            .get(&(pair, timeframe))
            .map(|rows| rows.range(from..).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    fn last_persisted_start(&self, pair: PairId, timeframe: Timeframe) -> Result<Option<i64>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .candles
            .get(&(pair, timeframe))
            .and_then(|rows| rows.keys().next_back().copied()))
    }

    fn fill_aggregate(&self, pair: PairId, from: i64, to: i64) -> Result<Option<FillAggregate>, StoreError> {
        let state = self.lock()?;
        Ok(state.fills.get(&pair).and_then(|fills| {
            FillAggregate::from_fills(
                fills
                    .iter()
                    .filter(|f| from <= f.time_executed && f.time_executed < to),
            )
        }))
    }

    fn previous_fill_price(&self, pair: PairId, before: i64) -> Result<Option<Price>, StoreError> {
        let state = self.lock()?;
        Ok(state.fills.get(&pair).and_then(|fills| {
            fills
                .iter()
                .rev()
                .find(|f| f.time_executed < before)
                .map(|f| f.price)
        }))
    }

    fn update_price(&self, pair: PairId, price: Price) -> Result<(), StoreError> {
        self.lock()?.prices.insert(pair, price);
        Ok(())
    }

    fn save_candles(&self, pair: PairId, timeframe: Timeframe, candles: &[Candle]) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let rows = state.candles.entry((pair, timeframe)).or_default();
        for candle in candles {
            rows.insert(candle.time_start, candle.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn fill(t: i64, price: i64) -> Fill {
        Fill {
            time_executed: t,
            price: Decimal::from(price),
            quantity: Decimal::ONE,
        }
    }

    #[test]
    fn test_fill_queries() {
        let store = InMemoryStore::new();
        let pair = PairId::new(1);
        store.add_fill(pair, fill(30, 103)).unwrap();
        store.add_fill(pair, fill(10, 100)).unwrap();
        store.add_fill(pair, fill(20, 99)).unwrap();

        let agg = store.fill_aggregate(pair, 10, 30).unwrap().unwrap();
        assert_eq!(agg.close, Decimal::from(99));
        assert_eq!(agg.high, Decimal::from(100));
        assert_eq!(agg.volume, Decimal::from(2));

        assert_eq!(store.previous_fill_price(pair, 30).unwrap(), Some(Decimal::from(99)));
        assert_eq!(store.previous_fill_price(pair, 10).unwrap(), None);
        assert_eq!(store.fill_aggregate(PairId::new(2), 0, 100).unwrap(), None);
    }

    #[test]
    fn test_resting_depth_groups_by_price() {
        let store = InMemoryStore::new();
        let pair = PairId::new(1);
        store.add_resting(pair, Side::BUY, Decimal::from(100), Decimal::from(2)).unwrap();
        store.add_resting(pair, Side::BUY, Decimal::from(100), Decimal::from(3)).unwrap();
        store.add_resting(pair, Side::SELL, Decimal::from(101), Decimal::from(1)).unwrap();

        let bids = store.resting_depth(pair, Side::BUY).unwrap();
        assert_eq!(bids, vec![(Decimal::from(100), Decimal::from(5))]);
        assert_eq!(store.resting_depth(pair, Side::SELL).unwrap().len(), 1);
    }

    #[test]
    fn test_save_candles_upserts() {
        let store = InMemoryStore::new();
        let pair = PairId::new(1);
        let mut candle = Candle::flat(0, 10, Decimal::from(100));
        store.save_candles(pair, Timeframe::H1, &[candle.clone()]).unwrap();
        candle.close = Decimal::from(105);
        store.save_candles(pair, Timeframe::H1, &[candle.clone()]).unwrap();

        assert_eq!(store.candles(pair, Timeframe::H1).unwrap(), vec![candle]);
        assert_eq!(store.last_persisted_start(pair, Timeframe::H1).unwrap(), Some(0));
        assert_eq!(store.last_persisted_start(pair, Timeframe::D1).unwrap(), None);
    }
}
