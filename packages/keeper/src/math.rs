//! Integer money math
//!
//! All amounts are U256 minor units. Decimal alignment is integer
//! rescaling, tolerances are basis-point floors, and display formatting
//! produces decimal strings. Nothing here touches floating point.

use alloy::primitives::U256;

/// Basis points in one whole: 10_000.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Discount of `a` against reference `b` in basis points:
/// `(a - b) * 10000 / b` with integer division. Returns 0 when `b` is
/// zero rather than dividing by it.
pub fn discount_bps(a: U256, b: U256) -> i64 {
    if b.is_zero() {
        return 0;
    }
    let scale = U256::from(BPS_DENOMINATOR);
    if a >= b {
        let bps = (a - b) * scale / b;
        bps.try_into().unwrap_or(i64::MAX)
    } else {
        let bps = (b - a) * scale / b;
        -bps.try_into().unwrap_or(i64::MAX)
    }
}

/// Rescale an amount between token decimal conventions. Scaling down
/// truncates toward zero.
pub fn rescale(amount: U256, from_decimals: u8, to_decimals: u8) -> U256 {
    if from_decimals == to_decimals {
        return amount;
    }
    if to_decimals > from_decimals {
        amount * U256::from(10u64).pow(U256::from(to_decimals - from_decimals))
    } else {
        amount / U256::from(10u64).pow(U256::from(from_decimals - to_decimals))
    }
}

/// Reduce an amount by `tolerance_bps` basis points (floor). Used for
/// bridge minimum-received amounts and arrival balance checks.
pub fn apply_tolerance_bps(amount: U256, tolerance_bps: u64) -> U256 {
    let keep = U256::from(BPS_DENOMINATOR.saturating_sub(tolerance_bps));
    amount * keep / U256::from(BPS_DENOMINATOR)
}

/// One whole token in minor units (the sizing search granularity).
pub fn one_token(decimals: u8) -> U256 {
    U256::from(10u64).pow(U256::from(decimals))
}

/// Format minor units as a decimal string, e.g. 1_500_000 @ 6 -> "1.5".
/// Trailing zeros in the fraction are trimmed; whole values have no dot.
pub fn format_units(amount: U256, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = amount / divisor;
    let frac = amount % divisor;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac_str = format!("{:0>width$}", frac, width = decimals as usize);
    let trimmed = frac_str.trim_end_matches('0');
    format!("{}.{}", whole, trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn test_discount_positive() {
        // +1.20%
        assert_eq!(discount_bps(u(10_120), u(10_000)), 120);
    }

    #[test]
    fn test_discount_negative() {
        assert_eq!(discount_bps(u(9_900), u(10_000)), -100);
    }

    #[test]
    fn test_discount_equal_is_zero() {
        assert_eq!(discount_bps(u(5), u(5)), 0);
    }

    #[test]
    fn test_discount_zero_reference_returns_zero() {
        assert_eq!(discount_bps(u(123), U256::ZERO), 0);
    }

    #[test]
    fn test_discount_integer_division_truncates() {
        // (10001 - 10000) * 10000 / 10000 = 1
        assert_eq!(discount_bps(u(10_001), u(10_000)), 1);
        // (10000 - 9999) * 10000 / 9999 = 1 (truncated)
        assert_eq!(discount_bps(u(10_000), u(9_999)), 1);
    }

    #[test]
    fn test_rescale_up_and_down() {
        assert_eq!(rescale(u(1_000_000), 6, 18), U256::from(10u64).pow(u(18)));
        assert_eq!(rescale(U256::from(10u64).pow(u(18)), 18, 6), u(1_000_000));
        assert_eq!(rescale(u(777), 6, 6), u(777));
    }

    #[test]
    fn test_rescale_down_truncates() {
        // 1.9 units at 8 decimals -> 1 unit at 0 decimals
        assert_eq!(rescale(u(190_000_000), 8, 0), u(1));
    }

    #[test]
    fn test_tolerance_floor() {
        // 2% off 1_000_000 = 980_000
        assert_eq!(apply_tolerance_bps(u(1_000_000), 200), u(980_000));
        assert_eq!(apply_tolerance_bps(u(1_000_000), 0), u(1_000_000));
    }

    #[test]
    fn test_tolerance_composition_never_exceeds_input() {
        // applying the balance-check tolerance after the bridge minimum
        // never rises above the original amount
        for amount in [0u64, 1, 999, 1_000_000, u64::MAX / 2] {
            let x = u(amount);
            let once = apply_tolerance_bps(x, 50);
            let twice = apply_tolerance_bps(once, 200);
            assert!(twice <= x);
        }
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(u(1_500_000), 6), "1.5");
        assert_eq!(format_units(u(10_000_000), 6), "10");
        assert_eq!(format_units(u(1), 6), "0.000001");
        assert_eq!(format_units(U256::ZERO, 6), "0");
        assert_eq!(format_units(u(42), 0), "42");
    }

    #[test]
    fn test_one_token() {
        assert_eq!(one_token(6), u(1_000_000));
        assert_eq!(one_token(0), u(1));
    }
}
