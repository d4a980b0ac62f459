//! Full snapshots for (re)connecting subscribers
//!
//! Deltas only make sense on top of a known state, so a new subscriber
//! first receives the whole book or chart. Each snapshot carries a SHA-256
//! checksum over its content so clients can verify what they rebuilt.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::ids::PairKey;

use crate::chart::{ChartBook, ChartBucket};
use crate::order_book::{DepthBook, PriceLevel};

/// Every level of a depth book, best first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub pair: PairKey,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    /// Unix nanoseconds timestamp when snapshot was created.
    pub timestamp: i64,
    pub checksum: String,
}

/// Every bucket of a depth chart, best first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSnapshot {
    pub pair: PairKey,
    pub bids: Vec<ChartBucket>,
    pub asks: Vec<ChartBucket>,
    pub timestamp: i64,
    pub checksum: String,
}

pub fn depth_snapshot(book: &DepthBook, timestamp: i64) -> DepthSnapshot {
    let bids = book.bid_levels();
    let asks = book.ask_levels();
    let checksum = checksum(
        bids.iter().map(|l| (l.price, l.quantity)),
        asks.iter().map(|l| (l.price, l.quantity)),
    );
    DepthSnapshot {
        pair: book.pair().clone(),
        bids,
        asks,
        timestamp,
        checksum,
    }
}

pub fn chart_snapshot(chart: &ChartBook, timestamp: i64) -> ChartSnapshot {
    let full = chart.snapshot();
    let checksum = checksum(
        full.bids.iter().map(|b| (b.price_start, b.quantity)),
        full.asks.iter().map(|b| (b.price_start, b.quantity)),
    );
    ChartSnapshot {
        pair: chart.pair().clone(),
        bids: full.bids,
        asks: full.asks,
        timestamp,
        checksum,
    }
}

/// Hash `price:quantity|` entries per side, sides separated by `---`.
fn checksum(
    bids: impl Iterator<Item = (rust_decimal::Decimal, rust_decimal::Decimal)>,
    asks: impl Iterator<Item = (rust_decimal::Decimal, rust_decimal::Decimal)>,
) -> String {
    let mut hasher = Sha256::new();

    for (price, quantity) in bids {
        hasher.update(price.normalize().to_string().as_bytes());
        hasher.update(b":");
        hasher.update(quantity.normalize().to_string().as_bytes());
        hasher.update(b"|");
    }
    hasher.update(b"---");

    for (price, quantity) in asks {
        hasher.update(price.normalize().to_string().as_bytes());
        hasher.update(b":");
        hasher.update(quantity.normalize().to_string().as_bytes());
        hasher.update(b"|");
    }
    hasher.update(b"---");

    format!("{:x}", hasher.finalize())
}

/// Verify that a depth snapshot's checksum matches its content.
pub fn verify_depth_snapshot(snapshot: &DepthSnapshot) -> bool {
    let expected = checksum(
        snapshot.bids.iter().map(|l| (l.price, l.quantity)),
        snapshot.asks.iter().map(|l| (l.price, l.quantity)),
    );
    snapshot.checksum == expected
}

pub fn verify_chart_snapshot(snapshot: &ChartSnapshot) -> bool {
    let expected = checksum(
        snapshot.bids.iter().map(|b| (b.price_start, b.quantity)),
        snapshot.asks.iter().map(|b| (b.price_start, b.quantity)),
    );
    snapshot.checksum == expected
}
