//! Error types for pair reference data
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Reference-data errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReferenceError {
    #[error("Malformed pair key: {0}")]
    MalformedPairKey(String),

    #[error("Unknown pair: {pair}")]
    UnknownPair { pair: String },

    #[error("Invalid decimal precision {decimals} for pair {pair}")]
    InvalidPrecision { pair: String, decimals: u32 },
}
