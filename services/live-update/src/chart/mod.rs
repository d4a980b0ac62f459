//! Bounded depth chart
//!
//! Approximates a pair's depth book with at most `bucket_limit` contiguous
//! price buckets per side, for display. Buckets follow the book through
//! the net level changes forwarded by [`DepthBook::add_depth`], and are
//! reshaped by:
//!
//! - insertion of a new bucket when a price falls outside every bucket
//! - greedy merging of the narrowest adjacent pair on overflow
//! - greedy splitting of the heaviest bucket after a removal
//! - a sliding visible range of `±visible_range` around the mid price
//! - a crossed-spread correction at the best buckets
//!
//! Layout invariant: bids run downward (`price_start > price_finish`),
//! asks upward (`price_finish > price_start`), and every bucket's finish
//! equals the next bucket's start.
//!
//! Removed buckets are reported once by the next harvest with zero quantity.

pub mod strategy;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use types::ids::PairKey;
use types::numeric::{round_to, rounded_mid, tick, Price, Quantity};
use types::order::Side;

use crate::changes::ChangeTracker;
use crate::config::ChartConfig;
use crate::order_book::DepthBook;

/// Chart layout faults. These indicate a logic error, not bad input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChartError {
    #[error("Collapsed {side:?} bucket at price {price}")]
    CollapsedBucket { side: Side, price: Price },

    #[error("Price {price} falls on the open edge of a new {side:?} bucket")]
    PriceOnEdge { side: Side, price: Price },

    #[error("Price {price} is inside the {side:?} range but no bucket holds it")]
    Uncovered { side: Side, price: Price },

    #[error("{side:?} buckets broken at index {index}")]
    Layout { side: Side, index: usize },

    #[error("{side:?} side holds {count} buckets, limit {limit}")]
    Overflow {
        side: Side,
        count: usize,
        limit: usize,
    },
}

/// One display bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartBucket {
    /// Edge nearest the spread (inclusive).
    pub price_start: Price,
    /// Edge away from the spread (exclusive).
    pub price_finish: Price,
    pub quantity: Quantity,
}

impl ChartBucket {
    pub fn span(&self) -> Decimal {
        (self.price_start - self.price_finish).abs()
    }

    /// Bids hold `finish < price <= start`, asks `start <= price < finish`.
    pub fn contains(&self, side: Side, price: Price) -> bool {
        match side {
            Side::BUY => self.price_finish < price && price <= self.price_start,
            Side::SELL => self.price_start <= price && price < self.price_finish,
        }
    }
}

/// Buckets changed or removed since the previous harvest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartDelta {
    pub bids: Vec<ChartBucket>,
    pub asks: Vec<ChartBucket>,
}

impl ChartDelta {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }
}

/// Price window outside which depth changes are not charted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleRange {
    pub price_start: Price,
    pub price_finish: Price,
}

impl Default for VisibleRange {
    fn default() -> Self {
        Self {
            price_start: Decimal::ZERO,
            price_finish: Decimal::from(1_000_000_000u64),
        }
    }
}

enum SplitOutcome {
    Split,
    Removed,
    Skipped,
}

/// Buckets of one side plus the bookkeeping harvest needs.
///
/// `ids` runs parallel to `buckets`; ids are never reused, so a pending
/// change survives index shifts.
#[derive(Debug, Clone, Default)]
struct ChartSide {
    buckets: Vec<ChartBucket>,
    ids: Vec<u64>,
    next_id: u64,
    updated: ChangeTracker<u64>,
    removed: Vec<ChartBucket>,
}

impl ChartSide {
    fn len(&self) -> usize {
        self.buckets.len()
    }

    fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn insert(&mut self, index: usize, bucket: ChartBucket) {
        let id = self.next_id;
        self.next_id += 1;
        self.buckets.insert(index, bucket);
        self.ids.insert(index, id);
        self.updated.mark(id);
    }

    fn push(&mut self, bucket: ChartBucket) {
        self.insert(self.len(), bucket);
    }

    fn mark(&mut self, index: usize) {
        self.updated.mark(self.ids[index]);
    }

    fn remove(&mut self, index: usize) {
        let mut bucket = self.buckets.remove(index);
        let id = self.ids.remove(index);
        self.updated.unmark(&id);
        bucket.quantity = Decimal::ZERO;
        self.removed.push(bucket);
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.ids.clear();
        self.updated = ChangeTracker::new();
        self.removed.clear();
    }

    fn position(&self, side: Side, price: Price) -> Option<usize> {
        self.buckets.iter().position(|b| b.contains(side, price))
    }

    fn harvest(&mut self) -> Vec<ChartBucket> {
        let updated = self.updated.drain();
        let mut out: Vec<ChartBucket> = self
            .ids
            .iter()
            .zip(&self.buckets)
            .filter(|(id, _)| updated.contains(id))
            .map(|(_, bucket)| bucket.clone())
            .collect();
        out.append(&mut self.removed);
        out
    }
}

/// Depth chart for a single pair.
#[derive(Debug, Clone)]
pub struct ChartBook {
    pair: PairKey,
    decimals: u32,
    config: ChartConfig,
    bids: ChartSide,
    asks: ChartSide,
    limits: VisibleRange,
}

impl ChartBook {
    pub fn new(pair: PairKey, decimals: u32, config: ChartConfig) -> Self {
        Self {
            pair,
            decimals,
            config,
            bids: ChartSide::default(),
            asks: ChartSide::default(),
            limits: VisibleRange::default(),
        }
    }

    pub fn pair(&self) -> &PairKey {
        &self.pair
    }

    fn side(&self, side: Side) -> &ChartSide {
        match side {
            Side::BUY => &self.bids,
            Side::SELL => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut ChartSide {
        match side {
            Side::BUY => &mut self.bids,
            Side::SELL => &mut self.asks,
        }
    }

    /// Buckets of one side, best first.
    pub fn buckets(&self, side: Side) -> &[ChartBucket] {
        &self.side(side).buckets
    }

    pub fn visible_range(&self) -> VisibleRange {
        self.limits
    }

    /// Mirror a net level change from the depth book.
    ///
    /// `depth` must already include the change; it is queried when buckets
    /// are split or the visible range moves.
    pub fn add_depth(
        &mut self,
        depth: &DepthBook,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Result<(), ChartError> {
        if quantity.is_zero() {
            return Ok(());
        }
        // The tail bucket may straddle a window edge; changes past the edge
        // are not mirrored into it until the window next moves.
        if price <= self.limits.price_start || self.limits.price_finish <= price {
            return Ok(());
        }

        match self.side(side).position(side, price) {
            Some(index) => {
                let chart_side = self.side_mut(side);
                let bucket = &mut chart_side.buckets[index];
                bucket.quantity = (bucket.quantity + quantity).max(Decimal::ZERO);
                let emptied = bucket.quantity.is_zero();
                chart_side.mark(index);

                if emptied {
                    self.remove_bucket(side, index);
                    if self.side(side).len() <= self.config.bucket_limit {
                        self.split_one(depth, side);
                    }
                }
            }
            None => {
                if let Err(err) = self.add_new_bucket(side, price, quantity) {
                    error!(pair = %self.pair, ?side, %price, error = %err, "Depth chart insert failed");
                    return Err(err);
                }
            }
        }

        self.balance(depth);
        Ok(())
    }

    /// Return and clear changed buckets, followed by removed ones.
    pub fn harvest(&mut self) -> ChartDelta {
        ChartDelta {
            bids: self.bids.harvest(),
            asks: self.asks.harvest(),
        }
    }

    /// Every current bucket on both sides.
    pub fn snapshot(&self) -> ChartDelta {
        ChartDelta {
            bids: self.bids.buckets.clone(),
            asks: self.asks.buckets.clone(),
        }
    }

    /// Rebuild both sides as evenly spaced buckets spanning the book.
    ///
    /// Used once at bootstrap. Every rebuilt bucket is marked changed, so a
    /// caller treating the result as its baseline harvests right after.
    pub fn rebuild(&mut self, depth: &DepthBook) {
        let limit = self.config.bucket_limit;
        let tick = tick(self.decimals);

        for side in [Side::BUY, Side::SELL] {
            let decimals = self.decimals;
            let chart_side = self.side_mut(side);
            chart_side.clear();

            let Some((low, high)) = depth.price_bounds(side) else {
                continue;
            };

            let mut step = round_to((high - low) / Decimal::from(limit - 1), decimals);
            if step <= Decimal::ZERO {
                step = tick;
            }
            let half = step / Decimal::TWO;

            let mut start = match side {
                Side::BUY => high + half,
                Side::SELL => low - half,
            };
            for _ in 0..limit {
                let finish = match side {
                    Side::BUY => start - step,
                    Side::SELL => start + step,
                };
                let quantity = depth.quantity_sum(side, start, finish);
                chart_side.push(ChartBucket {
                    price_start: start,
                    price_finish: finish,
                    quantity,
                });
                start = finish;
            }
        }

        debug!(
            pair = %self.pair,
            bids = self.bids.len(),
            asks = self.asks.len(),
            "Depth chart rebuilt"
        );
    }

    /// Verify ordering, contiguity and the bucket limit on both sides.
    pub fn check_layout(&self) -> Result<(), ChartError> {
        for side in [Side::BUY, Side::SELL] {
            let buckets = self.buckets(side);
            if buckets.len() > self.config.bucket_limit {
                return Err(ChartError::Overflow {
                    side,
                    count: buckets.len(),
                    limit: self.config.bucket_limit,
                });
            }
            for (index, bucket) in buckets.iter().enumerate() {
                let ordered = match side {
                    Side::BUY => bucket.price_start > bucket.price_finish,
                    Side::SELL => bucket.price_finish > bucket.price_start,
                };
                let contiguous = buckets
                    .get(index + 1)
                    .map_or(true, |next| next.price_start == bucket.price_finish);
                if !ordered || !contiguous || bucket.quantity < Decimal::ZERO {
                    return Err(ChartError::Layout { side, index });
                }
            }
        }
        Ok(())
    }

    fn add_new_bucket(&mut self, side: Side, price: Price, quantity: Quantity) -> Result<(), ChartError> {
        if quantity <= Decimal::ZERO {
            return Ok(());
        }

        let (price_start, price_finish) = self.new_bucket_range(side, price)?;
        let bucket = ChartBucket {
            price_start,
            price_finish,
            quantity,
        };

        let chart_side = self.side_mut(side);
        let front = match chart_side.buckets.first() {
            None => false,
            Some(best) => match side {
                Side::BUY => price_finish >= best.price_finish,
                Side::SELL => price_start < best.price_start,
            },
        };
        if front {
            chart_side.insert(0, bucket);
        } else {
            chart_side.push(bucket);
        }

        self.merge_overflow(side);
        Ok(())
    }

    /// Range for a bucket holding `price`, which lies outside every bucket.
    ///
    /// Past the best bucket the new bucket's start leans toward the other
    /// side's best bucket; past the worst bucket it extends the tail. Widths
    /// follow the side's current span divided into `bucket_limit - 1` steps.
    fn new_bucket_range(&self, side: Side, price: Price) -> Result<(Price, Price), ChartError> {
        let tick = tick(self.decimals);
        let own = self.side(side);

        let (Some(best), Some(worst)) = (own.buckets.first(), own.buckets.last()) else {
            let finish = match side {
                Side::BUY => price - tick,
                Side::SELL => price + tick,
            };
            return Ok((price, finish));
        };

        let (low, high) = match side {
            Side::BUY => (worst.price_finish, best.price_start),
            Side::SELL => (best.price_start, worst.price_finish),
        };
        let low = low.min(price);
        let high = high.max(price);
        let step = round_to(
            (high - low) / Decimal::from(self.config.bucket_limit - 1),
            self.decimals,
        );
        let half = step / Decimal::TWO;
        let opposite_best = self
            .side(side.opposite())
            .buckets
            .first()
            .map(|b| b.price_start);

        let (start, finish) = match side {
            Side::BUY if best.price_start < price => {
                let start = match opposite_best {
                    None => price + half,
                    Some(ask) if ask >= price + half => price + half,
                    Some(ask) if ask >= price => ask,
                    Some(_) => price,
                };
                (start, best.price_start)
            }
            Side::BUY if price <= worst.price_finish => {
                let start = worst.price_finish;
                let mut finish = price - half;
                if start == finish || price == finish {
                    finish -= tick;
                }
                (start, finish)
            }
            Side::SELL if price < best.price_start => {
                let start = match opposite_best {
                    None => price - half,
                    Some(bid) if bid <= price - half => price - half,
                    Some(bid) if bid <= price => bid,
                    Some(_) => price,
                };
                (start, best.price_start)
            }
            Side::SELL if worst.price_finish <= price => {
                let start = worst.price_finish;
                let mut finish = price + half;
                if start == finish || price == finish {
                    finish += tick;
                }
                (start, finish)
            }
            _ => return Err(ChartError::Uncovered { side, price }),
        };

        if start == finish {
            return Err(ChartError::CollapsedBucket { side, price });
        }
        if price == finish {
            return Err(ChartError::PriceOnEdge { side, price });
        }
        Ok((start, finish))
    }

    /// Drop a bucket, giving its range to its neighbours.
    ///
    /// An inner bucket is split between both neighbours at its rounded
    /// midpoint; an edge bucket simply shrinks the side.
    fn remove_bucket(&mut self, side: Side, index: usize) {
        let decimals = self.decimals;
        let chart_side = self.side_mut(side);
        let last = chart_side.len() - 1;

        if index != 0 && index != last {
            let bucket = &chart_side.buckets[index];
            let mid = rounded_mid(bucket.price_start, bucket.price_finish, decimals);
            chart_side.buckets[index - 1].price_finish = mid;
            chart_side.buckets[index + 1].price_start = mid;
            chart_side.mark(index - 1);
            chart_side.mark(index + 1);
        }

        chart_side.remove(index);
    }

    fn merge_overflow(&mut self, side: Side) {
        let limit = self.config.bucket_limit;
        let chart_side = self.side_mut(side);

        while chart_side.len() > limit {
            let Some(index) = strategy::merge_candidate(&chart_side.buckets) else {
                break;
            };
            let absorbed = chart_side.buckets[index + 1].clone();
            let target = &mut chart_side.buckets[index];
            target.price_finish = absorbed.price_finish;
            target.quantity += absorbed.quantity;
            chart_side.mark(index);
            chart_side.remove(index + 1);
        }
    }

    /// Try the ranked split candidates until one split or removal happens.
    fn split_one(&mut self, depth: &DepthBook, side: Side) {
        let candidates = strategy::split_candidates(self.buckets(side), strategy::MAX_SPLIT_ATTEMPTS);
        for index in candidates {
            match self.try_split(depth, side, index) {
                SplitOutcome::Split | SplitOutcome::Removed => return,
                SplitOutcome::Skipped => {}
            }
        }
    }

    /// Split bucket `index` at its rounded midpoint using the depth book's
    /// quantity on each half.
    ///
    /// A bucket with no depth at all is removed instead. An empty half at
    /// the outer edge of the side trims the bucket rather than splitting it.
    fn try_split(&mut self, depth: &DepthBook, side: Side, index: usize) -> SplitOutcome {
        let decimals = self.decimals;
        let chart_side = self.side(side);
        let Some(bucket) = chart_side.buckets.get(index) else {
            return SplitOutcome::Skipped;
        };
        let (start, finish) = (bucket.price_start, bucket.price_finish);
        let last = chart_side.len() - 1;
        let mid = rounded_mid(start, finish, decimals);

        if mid == start || mid == finish {
            if depth.quantity_sum(side, start, finish).is_zero() {
                self.remove_bucket(side, index);
                return SplitOutcome::Removed;
            }
            return SplitOutcome::Skipped;
        }

        let near = depth.quantity_sum(side, start, mid);
        let far = depth.quantity_sum(side, mid, finish);
        let chart_side = self.side_mut(side);

        match (near.is_zero(), far.is_zero()) {
            (true, true) => {
                self.remove_bucket(side, index);
                SplitOutcome::Removed
            }
            (true, false) if index == 0 => {
                chart_side.buckets[index].price_start = mid;
                chart_side.mark(index);
                SplitOutcome::Skipped
            }
            (false, true) if index == last => {
                chart_side.buckets[index].price_finish = mid;
                chart_side.mark(index);
                SplitOutcome::Skipped
            }
            (true, false) | (false, true) => SplitOutcome::Skipped,
            (false, false) => {
                let bucket = &mut chart_side.buckets[index];
                bucket.price_finish = mid;
                bucket.quantity = near;
                chart_side.mark(index);
                chart_side.insert(
                    index + 1,
                    ChartBucket {
                        price_start: mid,
                        price_finish: finish,
                        quantity: far,
                    },
                );
                SplitOutcome::Split
            }
        }
    }

    /// Keep the visible range current and undo a stale crossed spread.
    fn balance(&mut self, depth: &DepthBook) {
        if self.bids.is_empty() || self.asks.is_empty() {
            return;
        }

        self.adjust_visible_range(depth);

        let (Some(bid), Some(ask)) = (self.bids.buckets.first(), self.asks.buckets.first()) else {
            return;
        };
        let spread = ask.price_start - bid.price_start;
        if spread < Decimal::ZERO && spread < depth.depth_spread() - self.config.crossed_spread_tolerance {
            debug!(pair = %self.pair, %spread, "Crossed depth chart, splitting best buckets");
            self.try_split(depth, Side::BUY, 0);
            self.try_split(depth, Side::SELL, 0);
            self.merge_overflow(Side::BUY);
            self.merge_overflow(Side::SELL);
        }
    }

    /// Recentre the visible range on the best buckets' midpoint once it has
    /// drifted past `range_change`, dropping buckets that fell outside and
    /// summarising the uncovered remainder in one bucket per side.
    fn adjust_visible_range(&mut self, depth: &DepthBook) {
        let (Some(bid), Some(ask)) = (self.bids.buckets.first(), self.asks.buckets.first()) else {
            return;
        };

        let mid = (bid.price_start + ask.price_start) / Decimal::TWO;
        let low = round_to(mid * (Decimal::ONE - self.config.visible_range), self.decimals);
        let high = round_to(mid * (Decimal::ONE + self.config.visible_range), self.decimals);
        if low <= Decimal::ZERO || high <= Decimal::ZERO {
            return;
        }

        let change_start = (low - self.limits.price_start).abs() / low;
        let change_finish = (high - self.limits.price_finish).abs() / high;
        if change_start <= self.config.range_change && change_finish <= self.config.range_change {
            return;
        }

        while self.bids.buckets.last().is_some_and(|b| b.price_start < low) {
            let last = self.bids.len() - 1;
            self.remove_bucket(Side::BUY, last);
        }
        if let Some(tail) = self.bids.buckets.last() {
            let edge = tail.price_finish;
            if low < edge {
                let quantity = depth.quantity_sum(Side::BUY, edge, low);
                if quantity > Decimal::ZERO {
                    self.bids.push(ChartBucket {
                        price_start: edge,
                        price_finish: low,
                        quantity,
                    });
                }
            }
        }

        while self.asks.buckets.last().is_some_and(|b| b.price_start > high) {
            let last = self.asks.len() - 1;
            self.remove_bucket(Side::SELL, last);
        }
        if let Some(tail) = self.asks.buckets.last() {
            let edge = tail.price_finish;
            if edge < high {
                let quantity = depth.quantity_sum(Side::SELL, edge, high);
                if quantity > Decimal::ZERO {
                    self.asks.push(ChartBucket {
                        price_start: edge,
                        price_finish: high,
                        quantity,
                    });
                }
            }
        }

        debug!(pair = %self.pair, %low, %high, "Depth chart visible range moved");
        self.limits = VisibleRange {
            price_start: low,
            price_finish: high,
        };

        self.merge_overflow(Side::BUY);
        self.merge_overflow(Side::SELL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn make_chart(limit: usize) -> (DepthBook, ChartBook) {
        let pair = PairKey::parse("BTC-EUR").unwrap();
        let config = ChartConfig {
            bucket_limit: limit,
            ..ChartConfig::default()
        };
        (DepthBook::new(pair.clone()), ChartBook::new(pair, 0, config))
    }

    /// Apply an absolute level update to the book and forward its change.
    fn set(depth: &mut DepthBook, chart: &mut ChartBook, side: Side, price: &str, qty: &str) {
        if let Some(change) = depth.add_depth(side, d(price), d(qty), false, None) {
            chart.add_depth(depth, side, change.price, change.change).unwrap();
        }
    }

    fn bucket(start: i64, finish: i64, quantity: i64) -> ChartBucket {
        ChartBucket {
            price_start: Decimal::from(start),
            price_finish: Decimal::from(finish),
            quantity: Decimal::from(quantity),
        }
    }

    /// Place buckets on a side directly, bypassing the insert heuristics.
    fn seed(chart: &mut ChartBook, side: Side, buckets: &[(i64, i64, i64)]) {
        for &(start, finish, quantity) in buckets {
            chart.side_mut(side).push(bucket(start, finish, quantity));
        }
        chart.harvest();
    }

    fn level(depth: &mut DepthBook, side: Side, price: i64, quantity: i64) {
        depth.add_depth(side, Decimal::from(price), Decimal::from(quantity), false, None);
    }

    #[test]
    fn test_first_bucket_is_one_tick_wide() {
        let (mut depth, mut chart) = make_chart(100);
        set(&mut depth, &mut chart, Side::BUY, "100", "5");
        set(&mut depth, &mut chart, Side::SELL, "110", "2");

        assert_eq!(
            chart.buckets(Side::BUY),
            &[ChartBucket {
                price_start: d("100"),
                price_finish: d("99"),
                quantity: d("5")
            }]
        );
        assert_eq!(chart.buckets(Side::SELL)[0].price_start, d("110"));
        assert_eq!(chart.buckets(Side::SELL)[0].price_finish, d("111"));
        chart.check_layout().unwrap();
    }

    #[test]
    fn test_change_inside_bucket_accumulates() {
        let (mut depth, mut chart) = make_chart(100);
        set(&mut depth, &mut chart, Side::BUY, "100", "5");
        set(&mut depth, &mut chart, Side::BUY, "100", "3");
        assert_eq!(chart.buckets(Side::BUY)[0].quantity, d("3"));
        assert_eq!(chart.buckets(Side::BUY).len(), 1);
    }

    #[test]
    fn test_tail_extension_is_contiguous() {
        let (mut depth, mut chart) = make_chart(100);
        set(&mut depth, &mut chart, Side::BUY, "100", "1");
        set(&mut depth, &mut chart, Side::BUY, "95", "1");
        set(&mut depth, &mut chart, Side::BUY, "102", "1");

        let bids = chart.buckets(Side::BUY);
        assert_eq!(bids.len(), 3);
        assert!(bids[0].contains(Side::BUY, d("102")));
        assert!(bids[1].contains(Side::BUY, d("100")));
        assert!(bids[2].contains(Side::BUY, d("95")));
        chart.check_layout().unwrap();
    }

    #[test]
    fn test_ask_extension_both_ends() {
        let (mut depth, mut chart) = make_chart(100);
        set(&mut depth, &mut chart, Side::SELL, "100", "1");
        set(&mut depth, &mut chart, Side::SELL, "120", "1");
        set(&mut depth, &mut chart, Side::SELL, "90", "1");

        let asks = chart.buckets(Side::SELL);
        assert_eq!(asks.len(), 3);
        assert!(asks[0].contains(Side::SELL, d("90")));
        assert!(asks[2].contains(Side::SELL, d("120")));
        chart.check_layout().unwrap();
    }

    #[test]
    fn test_emptied_bucket_is_removed_and_reported() {
        let (mut depth, mut chart) = make_chart(100);
        set(&mut depth, &mut chart, Side::SELL, "100", "1");
        set(&mut depth, &mut chart, Side::SELL, "105", "1");
        chart.harvest();

        set(&mut depth, &mut chart, Side::SELL, "105", "0");
        assert_eq!(chart.buckets(Side::SELL).len(), 1);

        let delta = chart.harvest();
        let removed: Vec<_> = delta.asks.iter().filter(|b| b.quantity.is_zero()).collect();
        assert_eq!(removed.len(), 1);
        assert!(removed[0].contains(Side::SELL, d("105")));
        assert!(chart.harvest().is_empty());
    }

    #[test]
    fn test_inner_removal_stitches_neighbours() {
        let (mut depth, mut chart) = make_chart(100);
        for p in ["100", "104", "110"] {
            set(&mut depth, &mut chart, Side::SELL, p, "1");
        }
        set(&mut depth, &mut chart, Side::SELL, "104", "0");
        chart.check_layout().unwrap();
        let total: Decimal = chart.buckets(Side::SELL).iter().map(|b| b.quantity).sum();
        assert_eq!(total, d("2"));
    }

    #[test]
    fn test_overflow_merges_down_to_limit() {
        let (mut depth, mut chart) = make_chart(5);
        for p in 100..112 {
            set(&mut depth, &mut chart, Side::SELL, &p.to_string(), "1");
        }
        assert_eq!(chart.buckets(Side::SELL).len(), 5);
        chart.check_layout().unwrap();
        let total: Decimal = chart.buckets(Side::SELL).iter().map(|b| b.quantity).sum();
        assert_eq!(total, d("12"));
    }

    #[test]
    fn test_visible_range_drops_far_buckets() {
        let (mut depth, mut chart) = make_chart(100);
        set(&mut depth, &mut chart, Side::BUY, "100", "1");
        set(&mut depth, &mut chart, Side::BUY, "50", "1");
        set(&mut depth, &mut chart, Side::SELL, "101", "1");

        let range = chart.visible_range();
        assert_eq!(range.price_start, d("90"));
        assert_eq!(range.price_finish, d("111"));
        assert!(chart.buckets(Side::BUY).iter().all(|b| b.price_start >= d("90")));
        chart.check_layout().unwrap();

        // Outside the window: ignored.
        set(&mut depth, &mut chart, Side::SELL, "500", "1");
        assert_eq!(chart.buckets(Side::SELL).len(), 1);
    }

    #[test]
    fn test_rebuild_spreads_book_over_limit() {
        let (mut depth, mut chart) = make_chart(10);
        for p in 91..=100 {
            depth.add_depth(Side::BUY, Decimal::from(p), d("1"), false, None);
        }
        for p in 101..=110 {
            depth.add_depth(Side::SELL, Decimal::from(p), d("2"), false, None);
        }

        chart.rebuild(&depth);

        assert_eq!(chart.buckets(Side::BUY).len(), 10);
        assert_eq!(chart.buckets(Side::SELL).len(), 10);
        chart.check_layout().unwrap();
        let bids: Decimal = chart.buckets(Side::BUY).iter().map(|b| b.quantity).sum();
        let asks: Decimal = chart.buckets(Side::SELL).iter().map(|b| b.quantity).sum();
        assert_eq!(bids, depth.total_quantity(Side::BUY));
        assert_eq!(asks, depth.total_quantity(Side::SELL));
        assert_eq!(chart.harvest().len(), 20);
    }

    #[test]
    fn test_removal_splits_heaviest_bucket_by_depth() {
        let (mut depth, mut chart) = make_chart(100);
        level(&mut depth, Side::SELL, 100, 1);
        level(&mut depth, Side::SELL, 107, 2);
        level(&mut depth, Side::SELL, 111, 1);
        seed(&mut chart, Side::SELL, &[(100, 110, 3), (110, 112, 1)]);

        set(&mut depth, &mut chart, Side::SELL, "111", "0");

        assert_eq!(chart.buckets(Side::SELL), &[bucket(100, 105, 1), bucket(105, 110, 2)]);
        chart.check_layout().unwrap();
        let delta = chart.harvest();
        assert_eq!(delta.asks.len(), 3);
        assert!(delta.asks.contains(&bucket(110, 112, 0)));
    }

    #[test]
    fn test_empty_near_half_trims_best_bucket() {
        let (mut depth, mut chart) = make_chart(100);
        level(&mut depth, Side::SELL, 107, 2);
        seed(&mut chart, Side::SELL, &[(100, 110, 2)]);

        let outcome = chart.try_split(&depth, Side::SELL, 0);

        assert!(matches!(outcome, SplitOutcome::Skipped));
        assert_eq!(chart.buckets(Side::SELL), &[bucket(105, 110, 2)]);
        assert_eq!(chart.harvest().asks, vec![bucket(105, 110, 2)]);
    }

    #[test]
    fn test_empty_far_half_trims_worst_bucket() {
        let (mut depth, mut chart) = make_chart(100);
        level(&mut depth, Side::BUY, 105, 1);
        level(&mut depth, Side::BUY, 98, 2);
        seed(&mut chart, Side::BUY, &[(110, 100, 1), (100, 90, 2)]);

        let outcome = chart.try_split(&depth, Side::BUY, 1);

        assert!(matches!(outcome, SplitOutcome::Skipped));
        assert_eq!(chart.buckets(Side::BUY), &[bucket(110, 100, 1), bucket(100, 95, 2)]);
        chart.check_layout().unwrap();
    }

    #[test]
    fn test_empty_half_of_inner_bucket_is_left_alone() {
        let (mut depth, mut chart) = make_chart(100);
        level(&mut depth, Side::SELL, 100, 1);
        level(&mut depth, Side::SELL, 117, 1);
        level(&mut depth, Side::SELL, 120, 1);
        seed(&mut chart, Side::SELL, &[(100, 110, 1), (110, 120, 1), (120, 130, 1)]);

        let outcome = chart.try_split(&depth, Side::SELL, 1);

        assert!(matches!(outcome, SplitOutcome::Skipped));
        assert_eq!(chart.buckets(Side::SELL)[1], bucket(110, 120, 1));
        assert!(chart.harvest().is_empty());
    }

    #[test]
    fn test_split_moves_past_collapsed_midpoint() {
        let (mut depth, mut chart) = make_chart(100);
        level(&mut depth, Side::SELL, 100, 5);
        level(&mut depth, Side::SELL, 103, 1);
        level(&mut depth, Side::SELL, 108, 2);
        seed(&mut chart, Side::SELL, &[(100, 101, 5), (101, 111, 3)]);

        chart.split_one(&depth, Side::SELL);

        assert_eq!(
            chart.buckets(Side::SELL),
            &[bucket(100, 101, 5), bucket(101, 106, 1), bucket(106, 111, 2)]
        );
        chart.check_layout().unwrap();
    }

    #[test]
    fn test_collapsed_bucket_without_depth_is_removed() {
        let (mut depth, mut chart) = make_chart(100);
        level(&mut depth, Side::SELL, 105, 1);
        seed(&mut chart, Side::SELL, &[(100, 101, 1), (101, 110, 1)]);

        let outcome = chart.try_split(&depth, Side::SELL, 0);

        assert!(matches!(outcome, SplitOutcome::Removed));
        assert_eq!(chart.buckets(Side::SELL), &[bucket(101, 110, 1)]);
    }

    #[test]
    fn test_crossed_best_buckets_are_split() {
        let (mut depth, mut chart) = make_chart(100);
        level(&mut depth, Side::BUY, 99, 1);
        level(&mut depth, Side::BUY, 97, 1);
        level(&mut depth, Side::SELL, 102, 1);
        seed(&mut chart, Side::BUY, &[(106, 96, 2)]);
        seed(&mut chart, Side::SELL, &[(100, 110, 1)]);

        set(&mut depth, &mut chart, Side::SELL, "108", "1");

        assert_eq!(chart.buckets(Side::BUY), &[bucket(101, 96, 2)]);
        assert_eq!(chart.buckets(Side::SELL), &[bucket(100, 105, 1), bucket(105, 110, 1)]);
        chart.check_layout().unwrap();
    }

    #[test]
    fn test_crossed_buckets_within_tolerance_are_kept() {
        let (mut depth, mut chart) = make_chart(100);
        chart.config.crossed_spread_tolerance = Decimal::from(10);
        level(&mut depth, Side::BUY, 99, 1);
        level(&mut depth, Side::BUY, 97, 1);
        level(&mut depth, Side::SELL, 102, 1);
        seed(&mut chart, Side::BUY, &[(106, 96, 2)]);
        seed(&mut chart, Side::SELL, &[(100, 110, 1)]);

        set(&mut depth, &mut chart, Side::SELL, "108", "1");

        assert_eq!(chart.buckets(Side::BUY), &[bucket(106, 96, 2)]);
        assert_eq!(chart.buckets(Side::SELL), &[bucket(100, 110, 2)]);
    }

    #[test]
    fn test_snapshot_does_not_clear_changes() {
        let (mut depth, mut chart) = make_chart(100);
        set(&mut depth, &mut chart, Side::BUY, "100", "1");
        assert_eq!(chart.snapshot().bids.len(), 1);
        assert_eq!(chart.harvest().bids.len(), 1);
    }

    #[test]
    fn test_chart_delta_serialization() {
        let (mut depth, mut chart) = make_chart(100);
        set(&mut depth, &mut chart, Side::SELL, "101", "1");
        let delta = chart.harvest();
        let json = serde_json::to_string(&delta).unwrap();
        let back: ChartDelta = serde_json::from_str(&json).unwrap();
        assert_eq!(delta, back);
    }
}
