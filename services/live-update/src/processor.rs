//! Harvest loops
//!
//! Five background tasks, one per domain, each waking on its own period
//! after a shared initial pause. A tick harvests every eligible pair and
//! pushes non-empty payloads to the matching subscriber group. A failure
//! on one pair is logged and counted; the tick moves on to the next pair
//! and the loop keeps running.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use types::time::now_nanos;

use crate::candles::Timeframe;
use crate::engine::LiveUpdateEngine;
use crate::metrics::{Domain, ProcessorMetrics};
use crate::push::{PushGroup, PushOutcome, PushPayload, Pusher};

pub struct UpdateProcessor {
    engine: Arc<LiveUpdateEngine>,
    pusher: Arc<dyn Pusher>,
    metrics: Arc<ProcessorMetrics>,
}

/// Running loops. Dropping the handle leaves them running; call
/// [`stop`](Self::stop) to end them.
pub struct ProcessorHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl ProcessorHandle {
    pub fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }
}

impl UpdateProcessor {
    pub fn new(engine: Arc<LiveUpdateEngine>, pusher: Arc<dyn Pusher>) -> Self {
        Self {
            engine,
            pusher,
            metrics: Arc::new(ProcessorMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<ProcessorMetrics> {
        Arc::clone(&self.metrics)
    }

    fn period(&self, domain: Domain) -> Duration {
        let periods = &self.engine.config().periods;
        match domain {
            Domain::Depth => periods.depth,
            Domain::Chart => periods.chart,
            Domain::Tape => periods.tape,
            Domain::Candles => periods.candles,
            Domain::Quotes => periods.quotes,
        }
    }

    /// Spawn one loop per domain on the current runtime.
    pub fn start(self: Arc<Self>) -> ProcessorHandle {
        let initial_pause = self.engine.config().initial_pause;
        let tasks = Domain::all()
            .iter()
            .map(|&domain| {
                let processor = Arc::clone(&self);
                let period = self.period(domain);
                tokio::spawn(async move {
                    sleep(initial_pause).await;
                    info!(%domain, period_ms = period.as_millis() as u64, "Harvest loop started");

                    let mut ticker = interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        processor.tick(domain).await;
                    }
                })
            })
            .collect();
        ProcessorHandle { tasks }
    }

    /// Run one harvest pass for `domain`.
    pub async fn tick(&self, domain: Domain) {
        let started = Instant::now();
        match domain {
            Domain::Depth => self.tick_depth().await,
            Domain::Chart => self.tick_chart().await,
            Domain::Tape => self.tick_tape().await,
            Domain::Candles => self.tick_candles(now_nanos()).await,
            Domain::Quotes => self.tick_quotes().await,
        }
        self.metrics
            .record_tick(domain, started.elapsed().as_nanos() as u64);
    }

    async fn tick_depth(&self) {
        for pair in self.engine.book_pairs() {
            match self.engine.harvest_depth(&pair).await {
                Ok(Some(delta)) => self.push(Domain::Depth, PushGroup::OrderBook(pair), PushPayload::OrderBook(delta)),
                Ok(None) => {}
                Err(e) => self.fail(Domain::Depth, &pair.to_string(), &e),
            }
        }
    }

    async fn tick_chart(&self) {
        for pair in self.engine.book_pairs() {
            match self.engine.harvest_chart(&pair).await {
                Ok(Some(delta)) => self.push(
                    Domain::Chart,
                    PushGroup::OrderBookChart(pair),
                    PushPayload::OrderBookChart(delta),
                ),
                Ok(None) => {}
                Err(e) => self.fail(Domain::Chart, &pair.to_string(), &e),
            }
        }
    }

    async fn tick_tape(&self) {
        for pair in self.engine.tape_pairs() {
            match self.engine.harvest_tape(&pair).await {
                Ok(Some(fills)) => self.push(Domain::Tape, PushGroup::TradeHistory(pair), PushPayload::TradeHistory(fills)),
                Ok(None) => {}
                Err(e) => self.fail(Domain::Tape, &pair.to_string(), &e),
            }
        }
    }

    async fn tick_candles(&self, now: i64) {
        for pair in self.engine.candle_book_pairs() {
            for &timeframe in Timeframe::all() {
                match self.engine.harvest_candles(&pair, timeframe, now).await {
                    Ok(Some(candles)) => self.push(
                        Domain::Candles,
                        PushGroup::TradeHistoryChart(pair.clone(), timeframe),
                        PushPayload::TradeHistoryChart(candles),
                    ),
                    Ok(None) => {}
                    Err(e) => self.fail(Domain::Candles, &pair.to_string(), &e),
                }
            }
        }
    }

    async fn tick_quotes(&self) {
        let quotes = self.engine.harvest_quotes().await;
        self.push(Domain::Quotes, PushGroup::Quotes, PushPayload::Quotes(quotes));
    }

    fn push(&self, domain: Domain, group: PushGroup, payload: PushPayload) {
        if payload.is_empty() {
            return;
        }
        self.metrics.record_harvested(domain, payload.len());

        match self.pusher.push(&group, payload) {
            Ok(PushOutcome::Delivered(_)) => self.metrics.record_push(domain, true),
            Ok(PushOutcome::Skipped) => self.metrics.record_push(domain, false),
            Err(e) => {
                self.metrics.record_failure(domain);
                warn!(%domain, %group, error = %e, "Push failed");
            }
        }
    }

    fn fail(&self, domain: Domain, pair: &str, error: &dyn std::error::Error) {
        self.metrics.record_failure(domain);
        error!(%domain, pair, %error, "Harvest failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LiveUpdateConfig;
    use crate::error::PushError;
    use crate::store::InMemoryStore;
    use rust_decimal::Decimal;
    use std::sync::Mutex;
    use types::ids::PairKey;
    use types::order::Side;
    use types::pair::PairRef;

    #[derive(Default)]
    struct RecordingPusher {
        sent: Mutex<Vec<(String, PushPayload)>>,
        fail: bool,
    }

    impl RecordingPusher {
        fn groups(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(g, _)| g.clone()).collect()
        }
    }

    impl Pusher for RecordingPusher {
        fn push(&self, group: &PushGroup, payload: PushPayload) -> Result<PushOutcome, PushError> {
            if self.fail {
                return Err(PushError::Closed);
            }
            self.sent.lock().unwrap().push((group.to_string(), payload));
            Ok(PushOutcome::Delivered(1))
        }
    }

    fn btc() -> PairKey {
        PairKey::parse("BTC-EUR").unwrap()
    }

    fn engine() -> Arc<LiveUpdateEngine> {
        let pairs = vec![PairRef::internal(1, btc(), 2).with_price(Decimal::from(100))];
        Arc::new(
            LiveUpdateEngine::bootstrap(pairs, Arc::new(InMemoryStore::new()), LiveUpdateConfig::default(), now_nanos())
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_tick_pushes_only_non_empty_payloads() {
        let engine = engine();
        let pusher = Arc::new(RecordingPusher::default());
        let processor = UpdateProcessor::new(engine.clone(), pusher.clone());

        processor.tick(Domain::Depth).await;
        processor.tick(Domain::Tape).await;
        processor.tick(Domain::Quotes).await;
        assert!(pusher.groups().is_empty());

        engine
            .on_depth(&btc(), Side::BUY, Decimal::from(99), Decimal::from(3), false, None)
            .await
            .unwrap();
        processor.tick(Domain::Depth).await;
        processor.tick(Domain::Depth).await;
        assert_eq!(pusher.groups(), vec!["orderbook_BTC-EUR"]);
        assert_eq!(processor.metrics().ticks(Domain::Depth), 3);
    }

    #[tokio::test]
    async fn test_push_failure_is_counted() {
        let engine = engine();
        let pusher = Arc::new(RecordingPusher {
            fail: true,
            ..Default::default()
        });
        let processor = UpdateProcessor::new(engine.clone(), pusher);

        engine.on_fill(&btc(), Decimal::from(101), Decimal::ONE, now_nanos()).await;
        processor.tick(Domain::Tape).await;
        assert_eq!(processor.metrics().failures(Domain::Tape), 1);
    }

    #[tokio::test]
    async fn test_candle_tick_skips_pairs_without_book() {
        let eth = PairKey::parse("ETH-USD").unwrap();
        let pairs = vec![PairRef::external(2, eth.clone(), 2, false).with_price(Decimal::from(3000))];
        let engine = Arc::new(
            LiveUpdateEngine::bootstrap(pairs, Arc::new(InMemoryStore::new()), LiveUpdateConfig::default(), now_nanos())
                .unwrap(),
        );
        assert_eq!(engine.candle_pairs(), vec![eth.clone()]);
        assert!(engine.candle_book_pairs().is_empty());

        let pusher = Arc::new(RecordingPusher::default());
        let processor = UpdateProcessor::new(engine.clone(), pusher.clone());
        engine.on_fill(&eth, Decimal::from(3010), Decimal::ONE, now_nanos()).await;

        processor.tick(Domain::Candles).await;
        assert!(pusher.groups().is_empty());
        assert_eq!(processor.metrics().ticks(Domain::Candles), 1);
    }

    #[tokio::test]
    async fn test_candle_tick_pushes_book_pairs() {
        let engine = engine();
        let pusher = Arc::new(RecordingPusher::default());
        let processor = UpdateProcessor::new(engine.clone(), pusher.clone());

        engine.on_fill(&btc(), Decimal::from(101), Decimal::ONE, now_nanos()).await;
        processor.tick(Domain::Candles).await;
        let groups = pusher.groups();
        assert!(groups.contains(&"tradehistorychart_BTC-EUR_0".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_start_after_initial_pause() {
        let engine = engine();
        let pusher = Arc::new(RecordingPusher::default());
        let processor = Arc::new(UpdateProcessor::new(engine.clone(), pusher.clone()));
        let metrics = processor.metrics();
        let handle = processor.start();

        engine.on_fill(&btc(), Decimal::from(105), Decimal::ONE, now_nanos()).await;

        sleep(Duration::from_secs(5)).await;
        assert_eq!(metrics.ticks(Domain::Tape), 0);
        assert!(pusher.groups().is_empty());

        sleep(Duration::from_secs(6)).await;
        assert!(metrics.ticks(Domain::Tape) > 0);
        let groups = pusher.groups();
        assert!(groups.contains(&"tradehistory_BTC-EUR".to_string()));
        assert!(groups.contains(&"quotes".to_string()));
        assert!(groups.contains(&"tradehistorychart_BTC-EUR_0".to_string()));

        assert!(handle.is_running());
        handle.stop();
    }
}
