//! Fixed-precision coin arithmetic.
//!
//! All price arithmetic in this crate runs on [`Decimal`] values truncated to
//! [`COIN_DECIMALS`] fractional digits after every multiplication and
//! division.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of fractional digits carried by coin and token amounts (satoshi precision).
pub const COIN_DECIMALS: u32 = 8;

/// Truncates `value` to [`COIN_DECIMALS`] fractional digits, rounding toward zero.
///
/// Sub-satoshi residue from intermediate arithmetic is dropped, never charged.
#[must_use]
pub fn truncate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COIN_DECIMALS, RoundingStrategy::ToZero)
}

/// Multiplies and truncates, returning `None` on overflow.
#[must_use]
pub fn mul(lhs: Decimal, rhs: Decimal) -> Option<Decimal> {
    lhs.checked_mul(rhs).map(truncate)
}

/// Divides and truncates, returning `None` on overflow or a zero divisor.
#[must_use]
pub fn div(lhs: Decimal, rhs: Decimal) -> Option<Decimal> {
    lhs.checked_div(rhs).map(truncate)
}

/// Returns `value` if it is strictly positive.
#[must_use]
pub fn positive(value: Decimal) -> Option<Decimal> {
    (value > Decimal::ZERO).then_some(value)
}
