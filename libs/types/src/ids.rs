//! Identifier types for asset pairs
//!
//! Every per-pair structure in the engine is keyed by the canonical
//! `"BASE-QUOTE"` string, resolved once from pair reference data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ReferenceError;

/// Separator between the base and quote asset codes.
pub const PAIR_SEPARATOR: char = '-';

/// Storage identifier of an asset pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairId(i64);

impl PairId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical pair key
///
/// Format: "BASE-QUOTE" (e.g., "BTC-USDT", "ETH-BTC"). Asset codes are
/// non-empty and never contain the separator themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PairKey(String);

impl PairKey {
    /// Build a key from its two asset codes.
    pub fn new(base: &str, quote: &str) -> Result<Self, ReferenceError> {
        Self::parse(&format!("{base}{PAIR_SEPARATOR}{quote}"))
    }

    /// Parse a `"BASE-QUOTE"` string.
    pub fn parse(key: &str) -> Result<Self, ReferenceError> {
        let mut parts = key.split(PAIR_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self(key.to_string()))
            }
            _ => Err(ReferenceError::MalformedPairKey(key.to_string())),
        }
    }

    /// Get the key string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into base and quote asset codes
    pub fn split(&self) -> (&str, &str) {
        self.0
            .split_once(PAIR_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""))
    }

    pub fn base(&self) -> &str {
        self.split().0
    }

    pub fn quote(&self) -> &str {
        self.split().1
    }

    /// The same two assets in the opposite orientation.
    pub fn reversed(&self) -> Self {
        let (base, quote) = self.split();
        Self(format!("{quote}{PAIR_SEPARATOR}{base}"))
    }

    /// True when both sides name the same asset (`"X-X"`).
    pub fn is_identity(&self) -> bool {
        let (base, quote) = self.split();
        base == quote
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PairKey {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PairKey {
    type Error = ReferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PairKey> for String {
    fn from(key: PairKey) -> Self {
        key.0
    }
}
