//! Live update engine
//!
//! Owns the per-pair registry. Event handlers mutate the components under
//! their locks and mark what changed; harvests read-and-clear those marks
//! for the processor loops. Read-only views serve full state to
//! subscribers that just (re)connected.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use types::ids::PairKey;
use types::numeric::{Price, Quantity};
use types::order::Side;
use types::pair::PairRef;

use crate::candles::{Candle, CandleSeries, Timeframe};
use crate::chart::{ChartBook, ChartDelta};
use crate::config::LiveUpdateConfig;
use crate::error::{LiveUpdateError, Result};
use crate::events::{MarketEvent, MarketEventPayload};
use crate::order_book::{DepthBook, DepthDelta, FillEstimate, LevelChange};
use crate::quoter::AssetQuoter;
use crate::quotes::{QuoteState, QuoteSummary, QUOTE_WINDOW};
use crate::registry::{BookState, PairState, Registry};
use crate::snapshot::{chart_snapshot, depth_snapshot, ChartSnapshot, DepthSnapshot};
use crate::store::MarketStore;
use crate::trades::{Fill, TradeTape};

pub struct LiveUpdateEngine {
    registry: Registry,
    store: Arc<dyn MarketStore>,
    config: LiveUpdateConfig,
}

impl LiveUpdateEngine {
    /// Build state for every pair from the store.
    ///
    /// Per pair: depth book and chart, trade tape, the three candle series,
    /// then the quote from the hourly window. Any pair failing to bootstrap
    /// fails the whole engine.
    pub fn bootstrap(
        pairs: impl IntoIterator<Item = PairRef>,
        store: Arc<dyn MarketStore>,
        config: LiveUpdateConfig,
        now: i64,
    ) -> Result<Self> {
        config.validate()?;

        let mut registry = Registry::new();
        for pair in pairs {
            pair.validate()?;
            let state = bootstrap_pair(pair, store.as_ref(), &config, now)?;
            registry.insert(state);
        }

        info!(
            pairs = registry.len(),
            books = registry.book_pairs().len(),
            tapes = registry.tape_pairs().len(),
            candles = registry.candle_pairs().len(),
            "Live update engine bootstrapped"
        );

        Ok(Self {
            registry,
            store,
            config,
        })
    }

    pub fn config(&self) -> &LiveUpdateConfig {
        &self.config
    }

    pub fn pairs(&self) -> impl Iterator<Item = &PairRef> {
        self.registry.iter().map(|state| &state.pair)
    }

    pub fn pair(&self, pair: &PairKey) -> Option<&PairRef> {
        self.registry.get(pair).map(|state| &state.pair)
    }

    pub fn book_pairs(&self) -> Vec<PairKey> {
        self.registry.book_pairs()
    }

    pub fn tape_pairs(&self) -> Vec<PairKey> {
        self.registry.tape_pairs()
    }

    pub fn candle_pairs(&self) -> Vec<PairKey> {
        self.registry.candle_pairs()
    }

    pub fn candle_book_pairs(&self) -> Vec<PairKey> {
        self.registry.candle_book_pairs()
    }

    fn state(&self, pair: &PairKey) -> Result<&Arc<PairState>> {
        self.registry
            .get(pair)
            .ok_or_else(|| LiveUpdateError::UnknownPair { pair: pair.clone() })
    }

    // ── Event handlers ──────────────────────────────────────────────

    /// Dispatch one inbound event.
    pub async fn apply(&self, event: MarketEvent) -> Result<()> {
        debug!(
            event_id = %event.event_id,
            event_type = event.event_type_label(),
            pair = %event.pair(),
            source = %event.source,
            "Applying market event"
        );
        match event.payload {
            MarketEventPayload::TradeFilled {
                pair,
                price,
                quantity,
                executed_at,
            } => {
                self.on_fill(&pair, price, quantity, executed_at).await;
                Ok(())
            }
            MarketEventPayload::DepthChanged {
                pair,
                side,
                price,
                quantity,
                is_delta,
                update_id,
            } => self.on_depth(&pair, side, price, quantity, is_delta, update_id).await,
            MarketEventPayload::DepthCleared { pair, update_id } => {
                self.on_depth_cleared(&pair, update_id).await
            }
        }
    }

    /// Record a fill on the tape, every candle series and the quote.
    ///
    /// Fills for pairs outside the registry are dropped with a warning.
    pub async fn on_fill(&self, pair: &PairKey, price: Price, quantity: Quantity, executed_at: i64) {
        let Some(state) = self.registry.get(pair) else {
            warn!(pair = %pair, %price, %quantity, "Fill for unknown pair ignored");
            return;
        };

        if let Some(tape) = &state.tape {
            tape.lock().await.record(Fill {
                time_executed: executed_at,
                price,
                quantity,
            });
        }

        let mut hourly = None;
        for &timeframe in Timeframe::all() {
            let Some(series) = state.series(timeframe) else {
                break;
            };
            let mut series = series.lock().await;
            series.record_fill(executed_at, price, quantity);
            if timeframe == Timeframe::H1 {
                hourly = Some(series.tail(QUOTE_WINDOW));
            }
        }

        if let Some(quote) = &state.quote {
            quote.lock().await.record_fill(price, hourly.as_deref());
        }
    }

    /// Apply a depth level change and mirror it onto the chart.
    pub async fn on_depth(
        &self,
        pair: &PairKey,
        side: Side,
        price: Price,
        quantity: Quantity,
        is_delta: bool,
        update_id: Option<i64>,
    ) -> Result<()> {
        let Some(book) = self.book(pair) else {
            return Ok(());
        };

        let mut depth = book.depth.lock().await;
        let Some(change) = depth.add_depth(side, price, quantity, is_delta, update_id) else {
            return Ok(());
        };

        let mut chart = book.chart.lock().await;
        apply_to_chart(&mut chart, &depth, change)
    }

    /// Remove levels older than `update_id` (every level when absent).
    pub async fn on_depth_cleared(&self, pair: &PairKey, update_id: Option<i64>) -> Result<()> {
        let Some(book) = self.book(pair) else {
            return Ok(());
        };

        let mut depth = book.depth.lock().await;
        let changes = depth.delete_depths(update_id);
        if changes.is_empty() {
            return Ok(());
        }

        let mut chart = book.chart.lock().await;
        for change in changes {
            apply_to_chart(&mut chart, &depth, change)?;
        }
        debug!(pair = %pair, ?update_id, "Depth levels cleared");
        Ok(())
    }

    fn book(&self, pair: &PairKey) -> Option<&BookState> {
        match self.registry.get(pair) {
            Some(state) => state.book.as_ref(),
            None => {
                warn!(pair = %pair, "Depth update for unknown pair ignored");
                None
            }
        }
    }

    // ── Harvests ────────────────────────────────────────────────────

    /// Depth levels changed since the previous harvest. `None` for pairs
    /// without a book.
    pub async fn harvest_depth(&self, pair: &PairKey) -> Result<Option<DepthDelta>> {
        let state = self.state(pair)?;
        match &state.book {
            Some(book) => Ok(Some(book.depth.lock().await.harvest())),
            None => Ok(None),
        }
    }

    pub async fn harvest_chart(&self, pair: &PairKey) -> Result<Option<ChartDelta>> {
        let state = self.state(pair)?;
        match &state.book {
            Some(book) => Ok(Some(book.chart.lock().await.harvest())),
            None => Ok(None),
        }
    }

    /// Fills recorded since the previous harvest, newest first.
    pub async fn harvest_tape(&self, pair: &PairKey) -> Result<Option<Vec<Fill>>> {
        let state = self.state(pair)?;
        match &state.tape {
            Some(tape) => Ok(Some(tape.lock().await.harvest())),
            None => Ok(None),
        }
    }

    /// Candles changed since the previous harvest, after rolling the series
    /// forward to `now`.
    ///
    /// Harvested candles are persisted with their finish clamped to `now`.
    /// A failed save is logged; the candles are still returned.
    pub async fn harvest_candles(&self, pair: &PairKey, timeframe: Timeframe, now: i64) -> Result<Option<Vec<Candle>>> {
        let state = self.state(pair)?;
        let Some(series) = state.series(timeframe) else {
            return Ok(None);
        };

        let candles = series.lock().await.harvest(now);
        if !candles.is_empty() {
            let persisted: Vec<Candle> = candles
                .iter()
                .cloned()
                .map(|mut candle| {
                    candle.time_finish = candle.time_finish.min(now);
                    candle
                })
                .collect();
            if let Err(e) = self.store.save_candles(state.pair.id, timeframe, &persisted) {
                warn!(pair = %pair, ?timeframe, error = %e, "Candle persistence failed");
            }
        }
        Ok(Some(candles))
    }

    /// Quotes changed since the previous harvest, visible pairs only.
    ///
    /// Every changed close is written back to the pair record, hidden pairs
    /// included.
    pub async fn harvest_quotes(&self) -> Vec<QuoteSummary> {
        let mut visible = Vec::new();
        for state in self.registry.iter() {
            let Some(quote) = &state.quote else {
                continue;
            };
            let Some(summary) = quote.lock().await.take_update() else {
                continue;
            };

            if let Err(e) = self.store.update_price(state.pair.id, summary.close) {
                warn!(pair = %state.pair.key, error = %e, "Quote price write-back failed");
            }
            if summary.is_show {
                visible.push(summary);
            }
        }
        visible
    }

    // ── Full state views ────────────────────────────────────────────

    pub async fn depth_snapshot(&self, pair: &PairKey, now: i64) -> Result<Option<DepthSnapshot>> {
        let state = self.state(pair)?;
        match &state.book {
            Some(book) => Ok(Some(depth_snapshot(&*book.depth.lock().await, now))),
            None => Ok(None),
        }
    }

    pub async fn chart_snapshot(&self, pair: &PairKey, now: i64) -> Result<Option<ChartSnapshot>> {
        let state = self.state(pair)?;
        match &state.book {
            Some(book) => Ok(Some(chart_snapshot(&*book.chart.lock().await, now))),
            None => Ok(None),
        }
    }

    /// Every candle of the series, oldest first.
    pub async fn full_candles(&self, pair: &PairKey, timeframe: Timeframe) -> Result<Option<Vec<Candle>>> {
        let state = self.state(pair)?;
        match state.series(timeframe) {
            Some(series) => Ok(Some(series.lock().await.candles())),
            None => Ok(None),
        }
    }

    /// Up to `limit` most recent fills, newest first.
    pub async fn recent_fills(&self, pair: &PairKey, limit: usize) -> Result<Option<Vec<Fill>>> {
        let state = self.state(pair)?;
        match &state.tape {
            Some(tape) => Ok(Some(tape.lock().await.recent(limit))),
            None => Ok(None),
        }
    }

    /// Current quote of every pair, hidden ones included, in key order.
    pub async fn all_quotes(&self) -> Vec<QuoteSummary> {
        let mut quotes = Vec::new();
        for state in self.registry.iter() {
            if let Some(quote) = &state.quote {
                quotes.push(quote.lock().await.summary().clone());
            }
        }
        quotes
    }

    /// Walk the book as a taker of `side` for `amount` of base asset.
    pub async fn estimate_fill(&self, pair: &PairKey, taker: Side, amount: Quantity) -> Result<Option<FillEstimate>> {
        let state = self.state(pair)?;
        match &state.book {
            Some(book) => Ok(Some(book.depth.lock().await.estimate_fill(taker, amount))),
            None => Ok(None),
        }
    }

    /// Quote graph over the current quotes.
    pub async fn quoter(&self) -> AssetQuoter {
        AssetQuoter::new(self.all_quotes().await)
    }

    /// Price of `pair`, routed through intermediate assets when no direct
    /// quote exists.
    pub async fn cross_rate(&self, pair: &PairKey) -> Option<Price> {
        self.quoter().await.price(pair)
    }

    /// 24h change of `pair` as a fraction, composed along the same route
    /// as [`cross_rate`](Self::cross_rate).
    pub async fn cross_change(&self, pair: &PairKey) -> Option<Decimal> {
        self.quoter().await.change(pair)
    }
}

fn apply_to_chart(chart: &mut ChartBook, depth: &DepthBook, change: LevelChange) -> Result<()> {
    Ok(chart.add_depth(depth, change.side, change.price, change.change)?)
}

fn bootstrap_pair(pair: PairRef, store: &dyn MarketStore, config: &LiveUpdateConfig, now: i64) -> Result<PairState> {
    let book = if pair.has_book() {
        let mut depth = DepthBook::new(pair.key.clone());
        for side in [Side::BUY, Side::SELL] {
            depth.load_resting(side, store.resting_depth(pair.id, side)?);
        }
        let mut chart = ChartBook::new(pair.key.clone(), pair.decimals, config.chart);
        chart.rebuild(&depth);
        // Bootstrap state is the baseline, not a change.
        depth.harvest();
        chart.harvest();
        Some(BookState {
            depth: Mutex::new(depth),
            chart: Mutex::new(chart),
        })
    } else {
        None
    };

    let tape = pair
        .has_tape()
        .then(|| TradeTape::new(pair.key.clone(), config.tape_capacity));

    let candles = if pair.has_candles() {
        let factor = config.volume_factor(pair.is_internal);
        let external_tape = tape.as_ref().filter(|_| !pair.is_internal);
        let build = |timeframe| CandleSeries::bootstrap(&pair, timeframe, factor, store, external_tape, now);
        Some([build(Timeframe::H1)?, build(Timeframe::D1)?, build(Timeframe::W1)?])
    } else {
        None
    };

    let quote = if pair.has_quote() {
        let hourly = candles
            .as_ref()
            .map(|series| series[Timeframe::H1.id() as usize].tail(QUOTE_WINDOW));
        Some(QuoteState::bootstrap(&pair, hourly.as_deref())?)
    } else {
        None
    };

    debug!(
        pair = %pair.key,
        book = book.is_some(),
        tape = tape.is_some(),
        candles = candles.is_some(),
        quote = quote.is_some(),
        "Pair bootstrapped"
    );

    Ok(PairState {
        pair,
        book,
        tape: tape.map(Mutex::new),
        candles: candles.map(|series| series.map(Mutex::new)),
        quote: quote.map(Mutex::new),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::str::FromStr;
    use types::time::NANOS_PER_HOUR;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn key(s: &str) -> PairKey {
        PairKey::parse(s).unwrap()
    }

    const NOW: i64 = 1_700_000_000 * 1_000_000_000;

    fn engine(pairs: Vec<PairRef>) -> (LiveUpdateEngine, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let engine = LiveUpdateEngine::bootstrap(pairs, store.clone(), LiveUpdateConfig::default(), NOW).unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn test_bootstrap_respects_eligibility() {
        let pairs = vec![
            PairRef::internal(1, key("BTC-EUR"), 2).with_price(d("50000")),
            PairRef::external(2, key("ETH-USD"), 2, false).with_price(d("3000")),
            PairRef::internal(3, key("XRP-EUR"), 4).with_price(d("0.5")).hidden(),
        ];
        let (engine, _) = engine(pairs);

        assert_eq!(engine.book_pairs(), vec![key("BTC-EUR"), key("XRP-EUR")]);
        assert_eq!(engine.tape_pairs(), vec![key("BTC-EUR")]);
        assert_eq!(engine.candle_pairs(), vec![key("BTC-EUR"), key("ETH-USD")]);
        assert_eq!(engine.candle_book_pairs(), vec![key("BTC-EUR")]);
        assert_eq!(engine.all_quotes().await.len(), 3);
    }

    #[tokio::test]
    async fn test_bootstrap_loads_resting_depth_without_pending_changes() {
        let store = Arc::new(InMemoryStore::new());
        let pair = PairRef::internal(1, key("BTC-EUR"), 2).with_price(d("100"));
        store.add_resting(pair.id, Side::BUY, d("99"), d("3")).unwrap();
        store.add_resting(pair.id, Side::SELL, d("101"), d("2")).unwrap();

        let engine = LiveUpdateEngine::bootstrap(vec![pair], store, LiveUpdateConfig::default(), NOW).unwrap();
        let btc = key("BTC-EUR");

        let snapshot = engine.depth_snapshot(&btc, NOW).await.unwrap().unwrap();
        assert_eq!(snapshot.bids.len(), 1);
        assert_eq!(snapshot.asks[0].quantity, d("2"));
        assert!(engine.harvest_depth(&btc).await.unwrap().unwrap().is_empty());
        assert!(engine.harvest_chart(&btc).await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_depth_flows_into_chart() {
        let (engine, _) = engine(vec![PairRef::internal(1, key("BTC-EUR"), 2).with_price(d("100"))]);
        let btc = key("BTC-EUR");

        engine.on_depth(&btc, Side::BUY, d("99"), d("4"), false, None).await.unwrap();
        engine.on_depth(&btc, Side::SELL, d("101"), d("1"), false, None).await.unwrap();

        let depth = engine.harvest_depth(&btc).await.unwrap().unwrap();
        assert_eq!(depth.len(), 2);

        let chart = engine.chart_snapshot(&btc, NOW).await.unwrap().unwrap();
        let bid_total: Decimal = chart.bids.iter().map(|b| b.quantity).sum();
        let ask_total: Decimal = chart.asks.iter().map(|b| b.quantity).sum();
        assert_eq!(bid_total, d("4"));
        assert_eq!(ask_total, d("1"));

        engine.on_depth_cleared(&btc, None).await.unwrap();
        let depth = engine.harvest_depth(&btc).await.unwrap().unwrap();
        assert!(depth.bids.iter().chain(depth.asks.iter()).all(|l| l.quantity.is_zero()));
    }

    #[tokio::test]
    async fn test_fill_updates_tape_candles_and_quote() {
        let (engine, store) = engine(vec![PairRef::internal(1, key("BTC-EUR"), 2).with_price(d("100"))]);
        let btc = key("BTC-EUR");

        engine.on_fill(&btc, d("105"), d("2"), NOW + NANOS_PER_HOUR / 2).await;

        let fills = engine.harvest_tape(&btc).await.unwrap().unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, d("105"));

        let quotes = engine.harvest_quotes().await;
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].close, d("105"));
        assert_eq!(store.price(PairRef::internal(1, key("BTC-EUR"), 2).id).unwrap(), Some(d("105")));
        assert!(engine.harvest_quotes().await.is_empty());

        let hourly = engine.full_candles(&btc, Timeframe::H1).await.unwrap().unwrap();
        assert_eq!(hourly.last().unwrap().close, d("105"));
    }

    #[tokio::test]
    async fn test_hidden_quote_is_written_back_but_not_returned() {
        let pair = PairRef::internal(1, key("XRP-EUR"), 4).with_price(d("0.5")).hidden();
        let id = pair.id;
        let (engine, store) = engine(vec![pair]);

        engine.on_fill(&key("XRP-EUR"), d("0.55"), d("10"), NOW).await;
        assert!(engine.harvest_quotes().await.is_empty());
        assert_eq!(store.price(id).unwrap(), Some(d("0.55")));
    }

    #[tokio::test]
    async fn test_unknown_pair() {
        let (engine, _) = engine(vec![PairRef::internal(1, key("BTC-EUR"), 2).with_price(d("100"))]);
        let eth = key("ETH-EUR");

        engine.on_fill(&eth, d("1"), d("1"), NOW).await;
        engine.on_depth(&eth, Side::BUY, d("1"), d("1"), false, None).await.unwrap();
        assert_eq!(
            engine.harvest_depth(&eth).await,
            Err(LiveUpdateError::UnknownPair { pair: eth })
        );
    }

    #[tokio::test]
    async fn test_cross_rate_routes_through_quotes() {
        let (engine, _) = engine(vec![
            PairRef::internal(1, key("BTC-EUR"), 2).with_price(d("50000")),
            PairRef::internal(2, key("EUR-USD"), 4).with_price(d("1.1")),
        ]);

        assert_eq!(engine.cross_rate(&key("BTC-USD")).await, Some(d("55000")));
        assert_eq!(engine.cross_rate(&key("BTC-EUR")).await, Some(d("50000")));
        assert_eq!(engine.cross_rate(&key("BTC-JPY")).await, None);
    }

    #[test]
    fn test_bootstrap_rejects_invalid_config() {
        let mut config = LiveUpdateConfig::default();
        config.tape_capacity = 0;
        let result = LiveUpdateEngine::bootstrap(Vec::new(), Arc::new(InMemoryStore::new()), config, NOW);
        assert!(matches!(result, Err(LiveUpdateError::Bootstrap(_))));
    }
}
