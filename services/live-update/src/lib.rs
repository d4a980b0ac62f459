//! Live Update Service
//!
//! Keeps the in-memory market view of every trading pair and streams its
//! changes to subscribers:
//! - Aggregated depth books fed by the venue and external exchanges
//! - Bucketed depth charts mirroring each book
//! - Bounded trade tapes
//! - Hourly, daily and weekly candles, persisted as they change
//! - 24h quotes and cross-rates routed through intermediate assets
//!
//! Event handlers mutate state and mark what changed. Periodic loops
//! harvest the marks and push deltas to subscriber groups.
//!
//! # Architecture
//!
//! ```text
//!  Fills / Depth feeds
//!          │
//!   ┌──────▼───────┐     ┌─────────────┐
//!   │LiveUpdate    │◄────┤ MarketStore │ (bootstrap, candle + price writes)
//!   │Engine        │     └─────────────┘
//!   └──┬───┬───┬───┘
//!      │   │   │   per-pair state behind per-component locks
//! ┌────▼┐ ┌▼───┐ ┌▼─────┐ ┌───────┐ ┌──────┐
//! │Depth│►│Chart│ │Tape  │►│Candles│►│Quotes│
//! └──┬──┘ └┬───┘ └┬─────┘ └──┬────┘ └──┬───┘
//!    │     │      │          │         │
//! ┌──▼─────▼──────▼──────────▼─────────▼──┐
//! │ UpdateProcessor (five harvest loops)   │
//! └──────────────────┬─────────────────────┘
//!                    │
//!             ┌──────▼──────┐
//!             │   Pusher    │  orderbook_*, tradehistory_*, quotes ...
//!             └─────────────┘
//! ```

pub mod candles;
pub mod changes;
pub mod chart;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod order_book;
pub mod processor;
pub mod push;
pub mod quoter;
pub mod quotes;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod trades;

pub use engine::LiveUpdateEngine;
pub use error::{LiveUpdateError, Result};
pub use processor::UpdateProcessor;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
