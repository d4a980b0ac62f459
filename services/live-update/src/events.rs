//! Inbound event definitions
//!
//! The engine observes three notifications: fills, depth level changes
//! from a feed or the venue's own book, and depth deletions. Each arrives
//! wrapped in a [`MarketEvent`] envelope.

use serde::{Deserialize, Serialize};
use types::ids::PairKey;
use types::numeric::{Price, Quantity};
use types::order::Side;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketEvent {
    /// Unique event identifier (UUID v7)
    pub event_id: Uuid,
    /// Unix nanoseconds timestamp at the source
    pub timestamp: i64,
    /// Source that emitted this event
    pub source: String,
    pub payload: MarketEventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum MarketEventPayload {
    /// A fill executed on the pair
    TradeFilled {
        pair: PairKey,
        price: Price,
        quantity: Quantity,
        executed_at: i64,
    },

    /// A price level changed
    DepthChanged {
        pair: PairKey,
        side: Side,
        price: Price,
        quantity: Quantity,
        /// `quantity` is a change rather than the new level quantity
        is_delta: bool,
        update_id: Option<i64>,
    },

    /// Levels older than `update_id` (all levels if absent) were removed
    DepthCleared { pair: PairKey, update_id: Option<i64> },
}

impl MarketEvent {
    pub fn new(source: impl Into<String>, timestamp: i64, payload: MarketEventPayload) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            timestamp,
            source: source.into(),
            payload,
        }
    }

    pub fn pair(&self) -> &PairKey {
        match &self.payload {
            MarketEventPayload::TradeFilled { pair, .. } => pair,
            MarketEventPayload::DepthChanged { pair, .. } => pair,
            MarketEventPayload::DepthCleared { pair, .. } => pair,
        }
    }

    /// Get the event type as a string label for logging.
    pub fn event_type_label(&self) -> &'static str {
        match &self.payload {
            MarketEventPayload::TradeFilled { .. } => "TradeFilled",
            MarketEventPayload::DepthChanged { .. } => "DepthChanged",
            MarketEventPayload::DepthCleared { .. } => "DepthCleared",
        }
    }
}
