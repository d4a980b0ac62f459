//! OHLCV candle series
//!
//! One fixed-length, gap-free series per (pair, timeframe). Fills fold into
//! the newest candle that started at or before their execution time; time
//! passing without fills appends flat continuation candles carrying the
//! previous close. The oldest candles are trimmed to keep the length fixed.
//!
//! Candle boundaries are aligned to the UTC hour (hourly) or UTC day
//! (daily and weekly).

use std::collections::{BTreeMap, VecDeque};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use types::ids::PairKey;
use types::numeric::{round_to, Price, Quantity};
use types::pair::PairRef;
use types::time::{round_start, NANOS_PER_SECOND};

use crate::changes::ChangeTracker;
use crate::error::BootstrapError;
use crate::store::MarketStore;
use crate::trades::{FillAggregate, TradeTape};

/// Supported candle timeframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1 hour, one day and one hour of history
    H1,
    /// 1 day, 30 days of history
    D1,
    /// 1 week, one year of history
    W1,
}

impl Timeframe {
    /// All timeframes, in interval-id order.
    pub fn all() -> &'static [Timeframe] {
        &[Timeframe::H1, Timeframe::D1, Timeframe::W1]
    }

    /// Numeric interval id used in subscriber group names.
    pub fn id(&self) -> u8 {
        match self {
            Timeframe::H1 => 0,
            Timeframe::D1 => 1,
            Timeframe::W1 => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::all().get(id as usize).copied()
    }

    pub fn step_seconds(&self) -> i64 {
        match self {
            Timeframe::H1 => 3600,
            Timeframe::D1 => 86_400,
            Timeframe::W1 => 604_800,
        }
    }

    pub fn step_nanos(&self) -> i64 {
        self.step_seconds() * NANOS_PER_SECOND
    }

    /// Number of candles kept.
    pub fn length(&self) -> usize {
        match self {
            Timeframe::H1 => 25,
            Timeframe::D1 => 30,
            Timeframe::W1 => 52,
        }
    }
}

/// One OHLCV candle covering `[time_start, time_finish)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub time_start: i64,
    pub time_finish: i64,
    pub open: Price,
    pub close: Price,
    pub high: Price,
    pub low: Price,
    pub volume: Quantity,
}

impl Candle {
    /// A candle with no trading: every price equal, zero volume.
    pub fn flat(time_start: i64, time_finish: i64, price: Price) -> Self {
        Self {
            time_start,
            time_finish,
            open: price,
            close: price,
            high: price,
            low: price,
            volume: Decimal::ZERO,
        }
    }

    /// Fold a trade into this candle. Returns whether anything changed.
    fn fold(&mut self, price: Price, volume: Quantity) -> bool {
        let mut changed = false;
        if !volume.is_zero() {
            self.volume += volume;
            changed = true;
        }
        if self.close != price {
            self.close = price;
            changed = true;
        }
        if price < self.low {
            self.low = price;
            changed = true;
        }
        if price > self.high {
            self.high = price;
            changed = true;
        }
        changed
    }

    /// Fold an aggregate of later fills into this candle.
    fn absorb(&mut self, agg: &FillAggregate, volume_factor: Decimal) {
        self.close = agg.close;
        self.low = self.low.min(agg.low);
        self.high = self.high.max(agg.high);
        self.volume += agg.volume * volume_factor;
    }
}

/// Candle series for one pair and timeframe.
#[derive(Debug)]
pub struct CandleSeries {
    pair: PairKey,
    timeframe: Timeframe,
    decimals: u32,
    volume_factor: Decimal,
    /// Oldest first.
    candles: VecDeque<Candle>,
    /// Keyed by `time_start`.
    updated: ChangeTracker<i64>,
}

impl CandleSeries {
    pub fn new(pair: PairKey, timeframe: Timeframe, decimals: u32, volume_factor: Decimal) -> Self {
        Self {
            pair,
            timeframe,
            decimals,
            volume_factor,
            candles: VecDeque::with_capacity(timeframe.length() + 1),
            updated: ChangeTracker::new(),
        }
    }

    /// Rebuild the trailing window from persisted candles and fill history.
    ///
    /// Persisted candles are reused; a persisted candle whose finish falls
    /// short of its step is topped up with the fills that followed. Missing
    /// candles are computed from fills (the venue ledger for internal pairs,
    /// `tape` for external ones) and opened at the previous close. Computed
    /// and topped-up candles are saved back through `store`.
    ///
    /// A pair without a reference price starts with an empty series.
    pub fn bootstrap(
        pair: &PairRef,
        timeframe: Timeframe,
        volume_factor: Decimal,
        store: &dyn MarketStore,
        tape: Option<&TradeTape>,
        now: i64,
    ) -> Result<Self, BootstrapError> {
        let mut series = Self::new(pair.key.clone(), timeframe, pair.decimals, volume_factor);
        if pair.price.is_none() {
            return Ok(series);
        }

        let last_start = store.last_persisted_start(pair.id, timeframe)?;
        let starts = interval_starts(timeframe, last_start, now);
        let Some(&first_start) = starts.first() else {
            return Ok(series);
        };

        let aggregate = |from: i64, to: i64| -> Result<Option<FillAggregate>, BootstrapError> {
            if pair.is_internal {
                Ok(store.fill_aggregate(pair.id, from, to)?)
            } else {
                Ok(tape.and_then(|t| t.aggregate(from, to)))
            }
        };
        let previous_price = |before: i64| -> Result<Option<Price>, BootstrapError> {
            if pair.is_internal {
                Ok(store.previous_fill_price(pair.id, before)?)
            } else {
                Ok(tape.and_then(|t| t.last_price_before(before)))
            }
        };

        let persisted: BTreeMap<i64, Candle> = store
            .persisted_candles(pair.id, timeframe, first_start)?
            .into_iter()
            .map(|c| (c.time_start, c))
            .collect();

        let step = timeframe.step_nanos();
        let mut previous_close: Option<Price> = None;
        let mut computed = Vec::new();

        for start in starts {
            let finish = start + step;
            let candle = match persisted.get(&start) {
                Some(saved) => {
                    let mut candle = saved.clone();
                    if saved.time_finish < finish {
                        if let Some(agg) = aggregate(saved.time_finish, finish)? {
                            candle.absorb(&agg, volume_factor);
                        }
                        candle.time_finish = finish;
                        computed.push(candle.clone());
                    }
                    candle.time_finish = finish;
                    candle
                }
                None => {
                    let open = match previous_close {
                        Some(price) => price,
                        None => previous_price(first_start)?
                            .or(previous_price(first_start + step)?)
                            .or(pair.price)
                            .ok_or_else(|| BootstrapError::MissingStartingPrice { pair: pair.key.clone() })?,
                    };
                    let candle = match aggregate(start, finish)? {
                        Some(agg) => Candle {
                            time_start: start,
                            time_finish: finish,
                            open,
                            close: agg.close,
                            high: agg.high,
                            low: agg.low,
                            volume: agg.volume * volume_factor,
                        },
                        None => Candle::flat(start, finish, open),
                    };
                    computed.push(candle.clone());
                    candle
                }
            };
            previous_close = Some(candle.close);
            series.candles.push_back(candle);
        }

        if !computed.is_empty() {
            for candle in &mut computed {
                candle.time_finish = candle.time_finish.min(now);
            }
            store.save_candles(pair.id, timeframe, &computed)?;
        }

        debug!(
            pair = %pair.key,
            ?timeframe,
            candles = series.len(),
            computed = computed.len(),
            "Candle series bootstrapped"
        );
        Ok(series)
    }

    pub fn pair(&self) -> &PairKey {
        &self.pair
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Fold a fill into the series.
    ///
    /// The price is rounded to the pair's precision and the quantity scaled
    /// by the series' volume factor. Returns whether any candle changed.
    pub fn record_fill(&mut self, time_executed: i64, price: Price, quantity: Quantity) -> bool {
        let price = round_to(price, self.decimals);
        let volume = quantity * self.volume_factor;

        if self.candles.is_empty() {
            let start = round_start(time_executed, self.timeframe.step_seconds());
            self.candles
                .push_back(Candle::flat(start, start + self.timeframe.step_nanos(), price));
            self.updated.mark(start);
        }

        self.roll_forward(time_executed);

        let Some(candle) = self
            .candles
            .iter_mut()
            .rev()
            .find(|c| c.time_start <= time_executed)
        else {
            return false;
        };

        let changed = candle.fold(price, volume);
        if changed {
            self.updated.mark(candle.time_start);
        }
        changed
    }

    /// Append flat candles until the tail covers `now`, then trim the oldest.
    pub fn roll_forward(&mut self, now: i64) {
        let step = self.timeframe.step_nanos();

        while let Some(last) = self.candles.back() {
            if last.time_finish > now {
                break;
            }
            let next = Candle::flat(last.time_finish, last.time_finish + step, last.close);
            self.updated.mark(next.time_start);
            self.candles.push_back(next);
        }

        while self.candles.len() > self.timeframe.length() {
            if let Some(old) = self.candles.pop_front() {
                self.updated.unmark(&old.time_start);
            }
        }
    }

    /// Roll forward to `now`, then return and clear changed candles,
    /// oldest first.
    pub fn harvest(&mut self, now: i64) -> Vec<Candle> {
        self.roll_forward(now);

        let updated = self.updated.drain();
        self.candles
            .iter()
            .filter(|c| updated.contains(&c.time_start))
            .cloned()
            .collect()
    }

    /// Every candle, oldest first.
    pub fn candles(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    /// The newest `count` candles, oldest first.
    pub fn tail(&self, count: usize) -> Vec<Candle> {
        let skip = self.candles.len().saturating_sub(count);
        self.candles.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Whether candles are contiguous and exactly one step wide.
    pub fn is_contiguous(&self) -> bool {
        let step = self.timeframe.step_nanos();
        self.candles.iter().all(|c| c.time_finish - c.time_start == step)
            && self
                .candles
                .iter()
                .zip(self.candles.iter().skip(1))
                .all(|(a, b)| a.time_finish == b.time_start)
    }
}

/// Candle starts to rebuild: `length` steps ending at the newest persisted
/// candle (or now), stopping once a start would lie in the future.
fn interval_starts(timeframe: Timeframe, last_start: Option<i64>, now: i64) -> Vec<i64> {
    let step = timeframe.step_nanos();
    let length = timeframe.length();
    let reference = last_start.unwrap_or(now);
    let mut start = round_start(
        reference - step * (length as i64 - 1),
        timeframe.step_seconds(),
    );

    let mut starts = Vec::with_capacity(length);
    for _ in 0..length {
        starts.push(start);
        start += step;
        if now < start {
            break;
        }
    }
    starts
}
