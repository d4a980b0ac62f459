//! Decimal helpers for prices and quantities
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Rounding is half-to-even, matching how pair prices are stored.

use rust_decimal::{Decimal, RoundingStrategy};

/// Price of one unit of base asset, expressed in the quote asset.
pub type Price = Decimal;

/// Amount of base asset.
pub type Quantity = Decimal;

/// Largest scale `rust_decimal` can represent.
pub const MAX_DECIMALS: u32 = 28;

/// Round `value` to the pair's quote-asset precision.
pub fn round_to(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals.min(MAX_DECIMALS), RoundingStrategy::MidpointNearestEven)
}

/// Smallest representable price step at the given precision (`10^-decimals`).
pub fn tick(decimals: u32) -> Decimal {
    Decimal::new(1, decimals.min(MAX_DECIMALS))
}

/// Midpoint of two prices rounded to the pair's precision.
pub fn rounded_mid(a: Decimal, b: Decimal, decimals: u32) -> Decimal {
    round_to((a + b) / Decimal::TWO, decimals)
}
