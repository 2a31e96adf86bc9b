//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Round a decimal to a specific number of decimal places.
pub fn round_to_precision(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp(decimals)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Express `part` as a percentage of `whole` (zero when `whole` is zero).
pub fn percentage_of(part: Decimal, whole: Decimal) -> Decimal {
    safe_div(part, whole) * dec!(100)
}

/// Arithmetic mean of a slice, `None` when empty.
pub fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let sum: Decimal = values.iter().copied().sum();
    Some(sum / Decimal::from(values.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(10), dec!(4)), dec!(2.5));
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_percentage_of() {
        assert_eq!(percentage_of(dec!(25), dec!(1000)), dec!(2.5));
        assert_eq!(percentage_of(dec!(-50), dec!(1000)), dec!(-5));
        assert_eq!(percentage_of(dec!(1), Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[dec!(1), dec!(2), dec!(3), dec!(4)]), Some(dec!(2.5)));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_round_to_precision() {
        assert_eq!(round_to_precision(dec!(0.123456), 4), dec!(0.1235));
    }
}
