//! Cross-rate composition
//!
//! Prices an arbitrary asset pair by walking the graph of quoted pairs.
//! Each quoted pair is an edge usable in both directions; the route with
//! the fewest hops wins, and ties resolve to the lexicographically first
//! asset codes so results are stable.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::PairKey;
use types::numeric::{round_to, Price};

use crate::quotes::QuoteSummary;

/// One step of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    /// Pair in traversal direction, `from-to`.
    pub route: PairKey,
    /// Price in traversal direction.
    pub price: Price,
    /// The quoted pair is `to-from`.
    pub reversed: bool,
}

/// Read-only view over a set of quotes.
#[derive(Debug, Clone)]
pub struct AssetQuoter {
    quotes: BTreeMap<PairKey, QuoteSummary>,
    /// asset -> (neighbour, quoted pair, traversed against its orientation)
    edges: BTreeMap<String, BTreeMap<String, (PairKey, bool)>>,
}

impl AssetQuoter {
    /// Index `quotes` as a graph. Pairs with a non-positive close are left
    /// out, since they cannot be inverted.
    pub fn new(quotes: impl IntoIterator<Item = QuoteSummary>) -> Self {
        let quotes: BTreeMap<PairKey, QuoteSummary> = quotes
            .into_iter()
            .filter(|q| q.close > Decimal::ZERO)
            .map(|q| (q.pair.clone(), q))
            .collect();

        let mut edges: BTreeMap<String, BTreeMap<String, (PairKey, bool)>> = BTreeMap::new();
        for key in quotes.keys() {
            let (base, quote) = key.split();
            if base == quote {
                continue;
            }
            edges
                .entry(base.to_string())
                .or_default()
                .insert(quote.to_string(), (key.clone(), false));
            // A directly quoted pair always beats the inverted opposite.
            edges
                .entry(quote.to_string())
                .or_default()
                .entry(base.to_string())
                .or_insert((key.clone(), true));
        }

        Self { quotes, edges }
    }

    /// Fewest-hop route from `pair.base()` to `pair.quote()`.
    ///
    /// An identity pair yields an empty route; `None` means the assets are
    /// not connected.
    pub fn route(&self, pair: &PairKey) -> Option<Vec<Hop>> {
        let (from, to) = pair.split();
        if from == to {
            return Some(Vec::new());
        }

        let mut parent: BTreeMap<&str, (&str, &PairKey, bool)> = BTreeMap::new();
        let mut seen: BTreeSet<&str> = BTreeSet::from([from]);
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(asset) = queue.pop_front() {
            if asset == to {
                break;
            }
            let Some(neighbours) = self.edges.get(asset) else {
                continue;
            };
            for (next, (key, reversed)) in neighbours {
                if seen.insert(next.as_str()) {
                    parent.insert(next.as_str(), (asset, key, *reversed));
                    queue.push_back(next.as_str());
                }
            }
        }

        let mut hops = Vec::new();
        let mut cursor = to;
        while cursor != from {
            let (prev, key, reversed) = parent.get(cursor)?;
            let close = self.quotes.get(*key)?.close;
            let price = if *reversed { Decimal::ONE.checked_div(close)? } else { close };
            hops.push(Hop {
                route: PairKey::new(prev, cursor).ok()?,
                price,
                reversed: *reversed,
            });
            cursor = *prev;
        }
        hops.reverse();
        Some(hops)
    }

    /// Implied price of one unit of the base asset in the quote asset.
    ///
    /// `None` when no route exists or the product leaves the decimal range.
    pub fn price(&self, pair: &PairKey) -> Option<Price> {
        let route = self.route(pair)?;
        route
            .iter()
            .try_fold(Decimal::ONE, |acc, hop| acc.checked_mul(hop.price))
    }

    /// Implied fractional change over the quote window, rounded to two
    /// decimals.
    ///
    /// Each hop contributes `(close - open) / open` of its quoted pair,
    /// negated when traversed against the pair's orientation; hops compose
    /// as `prod(1 + c) - 1`.
    pub fn change(&self, pair: &PairKey) -> Option<Decimal> {
        let route = self.route(pair)?;
        let mut change = Decimal::ONE;
        for hop in &route {
            let key = if hop.reversed { hop.route.reversed() } else { hop.route.clone() };
            let quote = self.quotes.get(&key)?;
            let mut hop_change = if quote.open.is_zero() {
                Decimal::ZERO
            } else {
                (quote.close - quote.open).checked_div(quote.open)?
            };
            if hop.reversed {
                hop_change = -hop_change;
            }
            change = change.checked_mul(Decimal::ONE.checked_add(hop_change)?)?;
        }
        Some(round_to(change - Decimal::ONE, 2))
    }
}
