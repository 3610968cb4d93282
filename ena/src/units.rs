use alloy_primitives::U256;

use crate::error::{EnaError, Result};

/// Parse a user-entered decimal amount into base units of an asset with
/// `decimals` precision.
///
/// Accepts plain positive decimals (`"10"`, `"1.5"`, `".25"`) of any length
/// that fits `uint256`. Rejects empty input, anything that is not digits and
/// a single point, zero, and values finer than the asset's precision.
pub fn parse_amount(input: &str, decimals: u32) -> Result<U256> {
    let s = input.trim();
    if s.is_empty() {
        return Err(EnaError::InvalidInput("amount is required".into()));
    }
    let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
    let well_formed = int_part.bytes().all(|b| b.is_ascii_digit())
        && frac_part.bytes().all(|b| b.is_ascii_digit())
        && !(int_part.is_empty() && frac_part.is_empty());
    if !well_formed {
        return Err(EnaError::InvalidInput(format!("not a number: {s:?}")));
    }

    let units = to_base_units(int_part, frac_part, decimals)
        .map_err(|e| EnaError::InvalidInput(format!("invalid amount {s:?}: {e}")))?;
    if units.is_zero() {
        return Err(EnaError::InvalidInput(
            "amount must be greater than zero".into(),
        ));
    }
    Ok(units)
}

/// Scale `int_part.frac_part` by `10^decimals`. Both parts are ASCII digits.
fn to_base_units(
    int_part: &str,
    frac_part: &str,
    decimals: u32,
) -> std::result::Result<U256, String> {
    // Trailing zeros carry no precision: 1.50 fits one decimal place.
    let frac_part = frac_part.trim_end_matches('0');
    let decimals = decimals as usize;
    if frac_part.len() > decimals {
        return Err(format!("more than {decimals} decimal places"));
    }

    let digits = format!(
        "{int_part}{frac_part}{}",
        "0".repeat(decimals - frac_part.len())
    );
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).map_err(|_| "overflows uint256".to_string())
}

/// Parse a non-negative integer field (token id, NFT amount, stake index).
pub fn parse_integer(input: &str, field: &str) -> Result<U256> {
    let s = input.trim();
    if s.is_empty() {
        return Err(EnaError::InvalidInput(format!("{field} is required")));
    }
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(EnaError::InvalidInput(format!(
            "{field} must be a whole number, got {s:?}"
        )));
    }
    U256::from_str_radix(s, 10)
        .map_err(|e| EnaError::InvalidInput(format!("{field} out of range: {e}")))
}

/// Render base units as a decimal string with trailing zeros trimmed.
///
/// `format_units(1_500_000_000_000_000_000, 18) == "1.5"`.
pub fn format_units(value: U256, decimals: u32) -> String {
    let digits = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }

    let padded = if digits.len() <= decimals {
        format!("{}{digits}", "0".repeat(decimals + 1 - digits.len()))
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - decimals);
    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{int_part}.{frac_part}")
    }
}

/// Chain id as uppercase hex with a `0x` prefix (`1868` → `0x74C`).
pub fn to_chain_id_hex(chain_id: u64) -> String {
    format!("0x{chain_id:X}")
}

/// Parse a JSON-RPC hex quantity (`"0x74c"`).
pub fn parse_quantity(value: &str) -> Result<u64> {
    let stripped = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| EnaError::Decode(format!("quantity without 0x prefix: {value:?}")))?;
    u64::from_str_radix(stripped, 16)
        .map_err(|e| EnaError::Decode(format!("invalid hex quantity {value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wei(s: &str) -> U256 {
        U256::from_str_radix(s, 10).unwrap()
    }

    // ---- parse_amount ----

    #[test]
    fn test_parse_amount_accepts_decimals() {
        assert_eq!(
            parse_amount("1.5", 18).unwrap(),
            wei("1500000000000000000")
        );
        assert_eq!(parse_amount(" 10 ", 6).unwrap(), U256::from(10_000_000));
        assert_eq!(parse_amount(".25", 2).unwrap(), U256::from(25));
        assert_eq!(parse_amount("0.000000000000000001", 18).unwrap(), U256::from(1));
    }

    #[test]
    fn test_parse_amount_rejects_empty() {
        for input in ["", "   "] {
            let err = parse_amount(input, 18).unwrap_err();
            assert!(matches!(err, EnaError::InvalidInput(_)), "{input:?}");
        }
    }

    #[test]
    fn test_parse_amount_rejects_non_numeric() {
        for input in ["abc", "1.2.3", "1e18", "-1", "+1", "1,5", ".", "0x10", "1_000"] {
            let err = parse_amount(input, 18).unwrap_err();
            assert!(matches!(err, EnaError::InvalidInput(_)), "{input:?}");
        }
    }

    #[test]
    fn test_parse_amount_rejects_zero() {
        assert!(parse_amount("0", 18).is_err());
        assert!(parse_amount("0.000", 18).is_err());
    }

    #[test]
    fn test_parse_amount_rejects_excess_precision() {
        assert!(parse_amount("0.0000000000000000001", 18).is_err());
        assert!(parse_amount("1.001", 2).is_err());
        assert!(parse_amount("1.5", 0).is_err());
    }

    #[test]
    fn test_parse_amount_trailing_zeros_do_not_count() {
        assert_eq!(parse_amount("1.50", 1).unwrap(), U256::from(15));
        assert_eq!(parse_amount("2.", 2).unwrap(), U256::from(200));
        assert_eq!(parse_amount("007", 0).unwrap(), U256::from(7));
    }

    #[test]
    fn test_parse_amount_beyond_28_digits() {
        // 33 significant digits, 10^31 + 1 base units.
        let units = parse_amount("10000000000000.000000000000000001", 18).unwrap();
        assert_eq!(units, U256::from(10u64).pow(U256::from(31)) + U256::from(1));

        let whole = format!("1{}", "0".repeat(40));
        assert_eq!(
            parse_amount(&whole, 18).unwrap(),
            U256::from(10u64).pow(U256::from(58))
        );
    }

    #[test]
    fn test_parse_amount_overflow() {
        let max = U256::MAX.to_string();
        assert_eq!(parse_amount(&max, 0).unwrap(), U256::MAX);

        let err = parse_amount(&max, 18).unwrap_err();
        assert!(err.to_string().contains("overflows uint256"), "{err}");
        assert!(parse_amount(&format!("1{}", "0".repeat(78)), 0).is_err());
    }

    // ---- format_units ----

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(wei("1500000000000000000"), 18), "1.5");
        assert_eq!(format_units(wei("1000000000000000000"), 18), "1");
        assert_eq!(format_units(U256::from(1), 18), "0.000000000000000001");
        assert_eq!(format_units(U256::ZERO, 18), "0");
        assert_eq!(format_units(U256::from(42), 0), "42");
        assert_eq!(format_units(U256::from(123456), 3), "123.456");
    }

    #[test]
    fn test_round_trip_within_precision() {
        for (input, decimals) in [
            ("1.5", 18),
            ("0.000000000000000001", 18),
            ("123456789.123456789", 18),
            ("42", 0),
            ("0.1", 1),
            ("1000000", 6),
            ("10000000000000.000000000000000001", 18),
            ("98765432109876543210987654321.123456789012345678", 18),
        ] {
            let units = parse_amount(input, decimals).unwrap();
            let shown = format_units(units, decimals);
            assert_eq!(shown, input);
            assert_eq!(parse_amount(&shown, decimals).unwrap(), units);
        }
    }

    // ---- parse_integer ----

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("10", "token id").unwrap(), U256::from(10));
        assert_eq!(parse_integer("0", "index").unwrap(), U256::ZERO);
    }

    #[test]
    fn test_parse_integer_rejects() {
        for input in ["", "1.5", "-2", "ten", "0x1"] {
            let err = parse_integer(input, "token id").unwrap_err();
            assert!(err.to_string().contains("token id"), "{input:?}: {err}");
        }
    }

    // ---- hex quantities ----

    #[test]
    fn test_chain_id_hex() {
        assert_eq!(to_chain_id_hex(1868), "0x74C");
        assert_eq!(to_chain_id_hex(1), "0x1");
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x74c").unwrap(), 1868);
        assert_eq!(parse_quantity("0x74C").unwrap(), 1868);
        assert_eq!(parse_quantity("0x1").unwrap(), 1);
        assert!(parse_quantity("1868").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }
}
