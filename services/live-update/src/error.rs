//! Engine error taxonomy

use thiserror::Error;
use types::errors::ReferenceError;
use types::ids::PairKey;

use crate::chart::ChartError;
use crate::store::StoreError;

/// Failures while building per-pair state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BootstrapError {
    #[error("No starting price for pair {pair}")]
    MissingStartingPrice { pair: PairKey },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),
}

/// Push transport failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("Push transport closed")]
    Closed,

    #[error("Push payload encoding failed: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for PushError {
    fn from(err: serde_json::Error) -> Self {
        PushError::Encode(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LiveUpdateError {
    #[error("Unknown pair: {pair}")]
    UnknownPair { pair: PairKey },

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Push(#[from] PushError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),
}

pub type Result<T> = std::result::Result<T, LiveUpdateError>;
