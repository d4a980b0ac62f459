//! Per-pair state registry
//!
//! Built once at bootstrap and never resized. Each component of a pair
//! sits behind its own async mutex, so operations on different pairs, or
//! on different components of one pair, never wait on each other.
//!
//! Lock order within a pair: depth before chart. The chart is only ever
//! locked while holding the depth lock, or on its own.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use types::ids::PairKey;
use types::pair::PairRef;

use crate::candles::{CandleSeries, Timeframe};
use crate::chart::ChartBook;
use crate::order_book::DepthBook;
use crate::quotes::QuoteState;
use crate::trades::TradeTape;

pub struct BookState {
    pub depth: Mutex<DepthBook>,
    pub chart: Mutex<ChartBook>,
}

/// Everything the engine tracks for one pair. Components the pair is not
/// eligible for are `None`.
pub struct PairState {
    pub pair: PairRef,
    pub book: Option<BookState>,
    pub tape: Option<Mutex<TradeTape>>,
    /// Indexed by [`Timeframe::id`].
    pub candles: Option<[Mutex<CandleSeries>; 3]>,
    pub quote: Option<Mutex<QuoteState>>,
}

impl PairState {
    pub fn key(&self) -> &PairKey {
        &self.pair.key
    }

    pub fn series(&self, timeframe: Timeframe) -> Option<&Mutex<CandleSeries>> {
        self.candles
            .as_ref()
            .map(|series| &series[timeframe.id() as usize])
    }
}

#[derive(Default)]
pub struct Registry {
    pairs: BTreeMap<PairKey, Arc<PairState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: PairState) {
        self.pairs.insert(state.key().clone(), Arc::new(state));
    }

    pub fn get(&self, pair: &PairKey) -> Option<&Arc<PairState>> {
        self.pairs.get(pair)
    }

    /// All pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PairState>> {
        self.pairs.values()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Keys of pairs holding a depth book.
    pub fn book_pairs(&self) -> Vec<PairKey> {
        self.keys_where(|s| s.book.is_some())
    }

    pub fn tape_pairs(&self) -> Vec<PairKey> {
        self.keys_where(|s| s.tape.is_some())
    }

    pub fn candle_pairs(&self) -> Vec<PairKey> {
        self.keys_where(|s| s.candles.is_some())
    }

    /// Keys of pairs holding both candles and a depth book. The candle
    /// loop only harvests these.
    pub fn candle_book_pairs(&self) -> Vec<PairKey> {
        self.keys_where(|s| s.candles.is_some() && s.book.is_some())
    }

    fn keys_where(&self, keep: impl Fn(&PairState) -> bool) -> Vec<PairKey> {
        self.pairs
            .iter()
            .filter(|(_, state)| keep(state))
            .map(|(key, _)| key.clone())
            .collect()
    }
}
