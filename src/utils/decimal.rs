//! Decimal arithmetic utilities for price and risk calculations.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round to the nearest multiple of `tick_size`.
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return value;
    }
    (value / tick_size).round() * tick_size
}

/// Floor a non-negative decimal to a whole number of units.
///
/// Negative or out-of-range values floor to zero units.
pub fn floor_units(value: Decimal) -> u64 {
    if value <= Decimal::ZERO {
        return 0;
    }
    value.floor().to_u64().unwrap_or(0)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Express a fraction as a percentage (0.004 -> 0.4).
pub fn to_percent(fraction: Decimal) -> Decimal {
    fraction * dec!(100)
}

/// Shift a price away from the market by a fractional buffer.
///
/// `upward = true` gives `price * (1 + buffer)`, otherwise `price * (1 - buffer)`.
pub fn apply_buffer(price: Decimal, buffer: Decimal, upward: bool) -> Decimal {
    if upward {
        price * (Decimal::ONE + buffer)
    } else {
        price * (Decimal::ONE - buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(dec!(50123.456), dec!(0.01)), dec!(50123.46));
        assert_eq!(round_to_tick(dec!(50123.456), dec!(0.10)), dec!(50123.50));
        assert_eq!(round_to_tick(dec!(50123.456), dec!(1.00)), dec!(50123.00));
        assert_eq!(round_to_tick(dec!(1001), dec!(3)), dec!(1002));
    }

    #[test]
    fn test_round_to_tick_ignores_non_positive_tick() {
        assert_eq!(round_to_tick(dec!(12.34), Decimal::ZERO), dec!(12.34));
        assert_eq!(round_to_tick(dec!(12.34), dec!(-1)), dec!(12.34));
    }

    #[test]
    fn test_floor_units() {
        assert_eq!(floor_units(dec!(40.816)), 40);
        assert_eq!(floor_units(dec!(0.99)), 0);
        assert_eq!(floor_units(dec!(-3)), 0);
    }

    #[test]
    fn test_apply_buffer() {
        assert_eq!(apply_buffer(dec!(1000), dec!(0.001), true), dec!(1001.000));
        assert_eq!(apply_buffer(dec!(1000), dec!(0.002), false), dec!(998.000));
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(1), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(safe_div(dec!(1), dec!(4)), dec!(0.25));
    }
}
