//! Book side types

use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Map the `isBuy` flag used by event feeds.
    pub fn from_is_buy(is_buy: bool) -> Self {
        if is_buy {
            Side::BUY
        } else {
            Side::SELL
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::BUY)
    }

    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }
}
