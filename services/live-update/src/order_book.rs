//! Raw per-pair order book depth
//!
//! Maintains one sorted sequence of price levels per side, absorbing
//! absolute snapshots and signed deltas from the event feed.
//! Uses `BTreeMap` for deterministic sorted iteration; all arithmetic
//! uses `Decimal`.
//!
//! Every mutation reports the net quantity change at the touched level so
//! the caller can forward it to the depth chart. Levels that drop to zero
//! stay in place until the next harvest has reported them, then are pruned.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::PairKey;
use types::numeric::{Price, Quantity};
use types::order::Side;

use crate::changes::ChangeTracker;

/// A single aggregated price level in the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    /// Total resting quantity, never negative.
    pub quantity: Quantity,
    /// Id of the last feed update applied to this level (0 if none).
    pub update_id: i64,
}

/// Net change applied to one level, to be mirrored by the depth chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub side: Side,
    pub price: Price,
    pub change: Quantity,
}

/// Levels changed since the previous harvest, best price first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthDelta {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl DepthDelta {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }
}

/// Result of walking the book to fill an amount of base asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillEstimate {
    /// Base asset that the visible book can absorb.
    pub base_filled: Quantity,
    /// Quote asset exchanged for `base_filled`.
    pub quote_amount: Decimal,
}

#[derive(Debug, Clone, Default)]
struct BookSide {
    levels: BTreeMap<Price, PriceLevel>,
    updated: ChangeTracker<Price>,
}

/// In-memory depth book for a single pair.
///
/// Bids are reported in descending price order (best bid first),
/// asks in ascending price order (best ask first).
#[derive(Debug, Clone)]
pub struct DepthBook {
    pair: PairKey,
    bids: BookSide,
    asks: BookSide,
}

impl DepthBook {
    /// Create an empty book for the given pair.
    pub fn new(pair: PairKey) -> Self {
        Self {
            pair,
            bids: BookSide::default(),
            asks: BookSide::default(),
        }
    }

    pub fn pair(&self) -> &PairKey {
        &self.pair
    }

    fn side(&self, side: Side) -> &BookSide {
        match side {
            Side::BUY => &self.bids,
            Side::SELL => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BookSide {
        match side {
            Side::BUY => &mut self.bids,
            Side::SELL => &mut self.asks,
        }
    }

    /// Apply one depth notification.
    ///
    /// With `update_id` present, an existing level is only touched when the
    /// id is newer than the one it last saw. `is_delta` adds `quantity`
    /// (clamped at zero); otherwise `quantity` replaces the level. A missing
    /// level is created only for a positive quantity.
    ///
    /// Returns the net change when the level quantity actually moved.
    pub fn add_depth(
        &mut self,
        side: Side,
        price: Price,
        quantity: Quantity,
        is_delta: bool,
        update_id: Option<i64>,
    ) -> Option<LevelChange> {
        let book_side = self.side_mut(side);

        let change = match book_side.levels.get_mut(&price) {
            Some(level) => {
                if let Some(id) = update_id {
                    if level.update_id >= id {
                        return None;
                    }
                    level.update_id = id;
                }

                let old = level.quantity;
                let new = if is_delta {
                    (old + quantity).max(Decimal::ZERO)
                } else {
                    quantity.max(Decimal::ZERO)
                };
                level.quantity = new;
                book_side.updated.mark(price);
                new - old
            }
            None => {
                if quantity <= Decimal::ZERO {
                    return None;
                }
                book_side.levels.insert(
                    price,
                    PriceLevel {
                        price,
                        quantity,
                        update_id: update_id.unwrap_or(0),
                    },
                );
                book_side.updated.mark(price);
                quantity
            }
        };

        (!change.is_zero()).then_some(LevelChange {
            side,
            price,
            change,
        })
    }

    /// Zero every level older than `update_id` (all levels if `None`).
    ///
    /// Returns the negative change of each zeroed level.
    pub fn delete_depths(&mut self, update_id: Option<i64>) -> Vec<LevelChange> {
        let mut changes = Vec::new();

        for side in [Side::BUY, Side::SELL] {
            let book_side = self.side_mut(side);
            for level in book_side.levels.values_mut() {
                let stale = update_id.map_or(true, |id| level.update_id < id);
                if level.quantity.is_zero() || !stale {
                    continue;
                }
                changes.push(LevelChange {
                    side,
                    price: level.price,
                    change: -level.quantity,
                });
                level.quantity = Decimal::ZERO;
                book_side.updated.mark(level.price);
            }
        }

        changes
    }

    /// Sum quantity over a half-open price range.
    ///
    /// Bids: `finish < price <= start`. Asks: `start <= price < finish`.
    /// An empty or inverted range sums to zero.
    pub fn quantity_sum(&self, side: Side, start: Price, finish: Price) -> Quantity {
        let levels = &self.side(side).levels;
        match side {
            Side::BUY if finish < start => levels
                .range((Excluded(finish), Included(start)))
                .map(|(_, l)| l.quantity)
                .sum(),
            Side::SELL if start < finish => levels
                .range((Included(start), Excluded(finish)))
                .map(|(_, l)| l.quantity)
                .sum(),
            _ => Decimal::ZERO,
        }
    }

    /// Return and clear every level changed since the last harvest, then
    /// prune levels left at zero.
    pub fn harvest(&mut self) -> DepthDelta {
        let bids = Self::harvest_side(&mut self.bids, true);
        let asks = Self::harvest_side(&mut self.asks, false);
        DepthDelta { bids, asks }
    }

    fn harvest_side(book_side: &mut BookSide, descending: bool) -> Vec<PriceLevel> {
        let updated = book_side.updated.drain();
        let mut out: Vec<PriceLevel> = updated
            .iter()
            .filter_map(|price| book_side.levels.get(price).cloned())
            .collect();
        if descending {
            out.reverse();
        }
        book_side.levels.retain(|_, level| !level.quantity.is_zero());
        out
    }

    /// Seed one side from resting orders grouped by price.
    ///
    /// Seeded levels are not reported by the next harvest.
    pub fn load_resting(&mut self, side: Side, levels: impl IntoIterator<Item = (Price, Quantity)>) {
        let book_side = self.side_mut(side);
        for (price, quantity) in levels {
            if quantity <= Decimal::ZERO {
                continue;
            }
            book_side
                .levels
                .entry(price)
                .and_modify(|level| level.quantity += quantity)
                .or_insert(PriceLevel {
                    price,
                    quantity,
                    update_id: 0,
                });
        }
    }

    /// Best level on a side, even if it is waiting to be pruned at zero.
    pub fn best_level(&self, side: Side) -> Option<&PriceLevel> {
        let levels = &self.side(side).levels;
        match side {
            Side::BUY => levels.values().next_back(),
            Side::SELL => levels.values().next(),
        }
    }

    /// Best ask minus best bid; zero when either best level is missing or empty.
    pub fn depth_spread(&self) -> Decimal {
        match (self.best_level(Side::BUY), self.best_level(Side::SELL)) {
            (Some(bid), Some(ask)) if !bid.quantity.is_zero() && !ask.quantity.is_zero() => {
                ask.price - bid.price
            }
            _ => Decimal::ZERO,
        }
    }

    /// Lowest and highest price holding quantity on a side.
    pub fn price_bounds(&self, side: Side) -> Option<(Price, Price)> {
        let mut prices = self
            .side(side)
            .levels
            .values()
            .filter(|l| l.quantity > Decimal::ZERO)
            .map(|l| l.price);
        let first = prices.next()?;
        let last = prices.last().unwrap_or(first);
        Some((first, last))
    }

    /// Walk the opposite side to estimate filling `amount` of base asset.
    ///
    /// A buyer consumes asks, a seller consumes bids, best price first.
    pub fn estimate_fill(&self, taker: Side, amount: Quantity) -> FillEstimate {
        let mut left = amount.max(Decimal::ZERO);
        let mut quote_amount = Decimal::ZERO;

        for level in self.levels(taker.opposite()) {
            if left.is_zero() {
                break;
            }
            let filled = left.min(level.quantity);
            quote_amount += filled * level.price;
            left -= filled;
        }

        FillEstimate {
            base_filled: amount.max(Decimal::ZERO) - left,
            quote_amount,
        }
    }

    /// All levels on a side, best price first.
    pub fn levels(&self, side: Side) -> Vec<PriceLevel> {
        let levels = self.side(side).levels.values();
        match side {
            Side::BUY => levels.rev().cloned().collect(),
            Side::SELL => levels.cloned().collect(),
        }
    }

    /// Get all bid levels (descending price order).
    pub fn bid_levels(&self) -> Vec<PriceLevel> {
        self.levels(Side::BUY)
    }

    /// Get all ask levels (ascending price order).
    pub fn ask_levels(&self) -> Vec<PriceLevel> {
        self.levels(Side::SELL)
    }

    /// Number of price levels on a side, including zero levels awaiting harvest.
    pub fn level_count(&self, side: Side) -> usize {
        self.side(side).levels.len()
    }

    pub fn total_quantity(&self, side: Side) -> Quantity {
        self.side(side).levels.values().map(|l| l.quantity).sum()
    }

    /// Number of levels waiting to be harvested.
    pub fn pending_changes(&self) -> usize {
        self.bids.updated.len() + self.asks.updated.len()
    }
}
