//! Asset pair reference data
//!
//! A read-only snapshot of the pair record, resolved eagerly before the
//! engine is built. The engine never fetches missing fields on demand.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ReferenceError;
use crate::ids::{PairId, PairKey};
use crate::numeric::MAX_DECIMALS;

/// Fully resolved reference record for one asset pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRef {
    pub id: PairId,
    pub key: PairKey,
    /// Decimal precision of the quote asset.
    pub decimals: u32,
    /// Traded on this venue's own book (as opposed to an external exchange).
    pub is_internal: bool,
    /// The external exchange publishes an order book.
    pub is_book: bool,
    /// The external exchange is enabled.
    pub is_exchange_active: bool,
    pub is_active: bool,
    /// Both assets are displayed to users.
    pub is_show: bool,
    /// Last known price, if any has ever been set.
    pub price: Option<Decimal>,
}

impl PairRef {
    /// An active, shown, internal pair with no starting price.
    pub fn internal(id: i64, key: PairKey, decimals: u32) -> Self {
        Self {
            id: PairId::new(id),
            key,
            decimals,
            is_internal: true,
            is_book: false,
            is_exchange_active: false,
            is_active: true,
            is_show: true,
            price: None,
        }
    }

    /// An active, shown pair mirrored from an external exchange.
    pub fn external(id: i64, key: PairKey, decimals: u32, is_book: bool) -> Self {
        Self {
            is_internal: false,
            is_book,
            is_exchange_active: true,
            ..Self::internal(id, key, decimals)
        }
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.is_show = false;
        self
    }

    /// Reject precisions `rust_decimal` cannot represent.
    pub fn validate(&self) -> Result<(), ReferenceError> {
        if self.decimals > MAX_DECIMALS {
            return Err(ReferenceError::InvalidPrecision {
                pair: self.key.to_string(),
                decimals: self.decimals,
            });
        }
        Ok(())
    }

    /// Order book and depth chart are kept for this pair.
    pub fn has_book(&self) -> bool {
        self.is_active && (self.is_internal || (self.is_book && self.is_exchange_active))
    }

    /// A public fill tape is kept for this pair.
    pub fn has_tape(&self) -> bool {
        self.is_active && self.is_show && (self.is_internal || self.is_book)
    }

    /// Candle series are kept for this pair.
    pub fn has_candles(&self) -> bool {
        self.is_active && self.is_show
    }

    /// A quote summary is kept for this pair.
    pub fn has_quote(&self) -> bool {
        self.is_active
    }

    /// Value reported as `isBook` on quotes.
    pub fn quotes_book(&self) -> bool {
        self.is_internal || self.is_book
    }
}
