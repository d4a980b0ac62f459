//! Types library for the live market-data engine
//!
//! Shared reference types used by the engine and its collaborators.
//!
//! # Modules
//! - `ids`: Pair identifiers (PairId, PairKey)
//! - `numeric`: Decimal price/quantity helpers
//! - `order`: Book side
//! - `pair`: Resolved pair reference record
//! - `time`: Unix-nanosecond timestamp helpers
//! - `errors`: Error taxonomy

// Public modules
pub mod errors;
pub mod ids;
pub mod numeric;
pub mod order;
pub mod pair;
pub mod time;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::pair::*;
    pub use crate::time::*;
}
