//! Push layer boundary
//!
//! Harvested changes are addressed to subscriber groups:
//! - `orderbook_{pair}`
//! - `orderbookchart_{pair}`
//! - `tradehistory_{pair}`
//! - `tradehistorychart_{pair}_{intervalId}`
//! - `quotes`
//!
//! [`BroadcastPusher`] fans messages out over one tokio broadcast channel
//! per group and drops messages for groups nobody listens to.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use types::ids::PairKey;

use crate::candles::{Candle, Timeframe};
use crate::chart::ChartDelta;
use crate::error::PushError;
use crate::order_book::DepthDelta;
use crate::quotes::QuoteSummary;
use crate::trades::Fill;

/// Subscriber group a message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PushGroup {
    OrderBook(PairKey),
    OrderBookChart(PairKey),
    TradeHistory(PairKey),
    TradeHistoryChart(PairKey, Timeframe),
    Quotes,
}

impl PushGroup {
    /// Parse a group name.
    ///
    /// Formats:
    /// - `orderbook_BTC-EUR`
    /// - `orderbookchart_BTC-EUR`
    /// - `tradehistory_BTC-EUR`
    /// - `tradehistorychart_BTC-EUR_0`
    /// - `quotes`
    pub fn parse(s: &str) -> Option<Self> {
        if s == "quotes" {
            return Some(PushGroup::Quotes);
        }
        let (kind, rest) = s.split_once('_')?;
        match kind {
            "orderbook" => PairKey::parse(rest).ok().map(PushGroup::OrderBook),
            "orderbookchart" => PairKey::parse(rest).ok().map(PushGroup::OrderBookChart),
            "tradehistory" => PairKey::parse(rest).ok().map(PushGroup::TradeHistory),
            "tradehistorychart" => {
                let (pair, id) = rest.rsplit_once('_')?;
                let timeframe = Timeframe::from_id(id.parse().ok()?)?;
                Some(PushGroup::TradeHistoryChart(PairKey::parse(pair).ok()?, timeframe))
            }
            _ => None,
        }
    }

    pub fn to_group_string(&self) -> String {
        match self {
            PushGroup::OrderBook(pair) => format!("orderbook_{}", pair),
            PushGroup::OrderBookChart(pair) => format!("orderbookchart_{}", pair),
            PushGroup::TradeHistory(pair) => format!("tradehistory_{}", pair),
            PushGroup::TradeHistoryChart(pair, timeframe) => {
                format!("tradehistorychart_{}_{}", pair, timeframe.id())
            }
            PushGroup::Quotes => "quotes".to_string(),
        }
    }
}

impl fmt::Display for PushGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_group_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushPayload {
    OrderBook(DepthDelta),
    OrderBookChart(ChartDelta),
    TradeHistory(Vec<Fill>),
    TradeHistoryChart(Vec<Candle>),
    Quotes(Vec<QuoteSummary>),
}

impl PushPayload {
    /// Number of entries carried.
    pub fn len(&self) -> usize {
        match self {
            PushPayload::OrderBook(delta) => delta.len(),
            PushPayload::OrderBookChart(delta) => delta.len(),
            PushPayload::TradeHistory(fills) => fills.len(),
            PushPayload::TradeHistoryChart(candles) => candles.len(),
            PushPayload::Quotes(quotes) => quotes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub group: String,
    pub payload: PushPayload,
}

impl PushMessage {
    pub fn new(group: &PushGroup, payload: PushPayload) -> Self {
        Self {
            group: group.to_group_string(),
            payload,
        }
    }

    pub fn to_json(&self) -> Result<String, PushError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Number of receivers the message reached.
    Delivered(usize),
    /// The group had no subscribers.
    Skipped,
}

/// Delivers harvested changes to subscribers.
pub trait Pusher: Send + Sync {
    fn push(&self, group: &PushGroup, payload: PushPayload) -> Result<PushOutcome, PushError>;
}

/// In-process fan-out with one broadcast channel per group.
pub struct BroadcastPusher {
    capacity: usize,
    groups: Mutex<BTreeMap<PushGroup, broadcast::Sender<PushMessage>>>,
}

impl BroadcastPusher {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            groups: Mutex::new(BTreeMap::new()),
        }
    }

    fn groups(&self) -> Result<MutexGuard<'_, BTreeMap<PushGroup, broadcast::Sender<PushMessage>>>, PushError> {
        self.groups.lock().map_err(|_| PushError::Closed)
    }

    /// Join a group, creating its channel on first use.
    pub fn subscribe(&self, group: PushGroup) -> Result<broadcast::Receiver<PushMessage>, PushError> {
        let mut groups = self.groups()?;
        let sender = groups
            .entry(group)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(sender.subscribe())
    }

    pub fn subscriber_count(&self, group: &PushGroup) -> usize {
        self.groups()
            .ok()
            .and_then(|groups| groups.get(group).map(|s| s.receiver_count()))
            .unwrap_or(0)
    }
}

impl Pusher for BroadcastPusher {
    fn push(&self, group: &PushGroup, payload: PushPayload) -> Result<PushOutcome, PushError> {
        let groups = self.groups()?;
        let Some(sender) = groups.get(group).filter(|s| s.receiver_count() > 0) else {
            trace!(%group, "No subscribers, push skipped");
            return Ok(PushOutcome::Skipped);
        };

        match sender.send(PushMessage::new(group, payload)) {
            Ok(receivers) => Ok(PushOutcome::Delivered(receivers)),
            // Every receiver dropped between the count check and the send.
            Err(_) => Ok(PushOutcome::Skipped),
        }
    }
}
