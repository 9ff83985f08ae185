// SPDX-License-Identifier: MIT

use crate::domain::error::EngineError;
use alloy::primitives::utils::{format_units, parse_units};
use alloy::primitives::U256;

/// Parse a human decimal amount ("12.5") into integer base units.
pub fn parse_amount(value: &str, decimals: u8) -> Result<U256, EngineError> {
    let parsed = parse_units(value, decimals)
        .map_err(|e| EngineError::Config(format!("invalid amount '{}': {}", value, e)))?;
    Ok(parsed.get_absolute())
}

/// Convenience for amounts carried as floats in configuration. Rendering
/// is capped at 9 fractional digits to stay clear of f64 noise.
pub fn parse_amount_f64(value: f64, decimals: u8) -> Result<U256, EngineError> {
    if !value.is_finite() || value < 0.0 {
        return Err(EngineError::Config(format!(
            "amount must be a non-negative finite number, got {}",
            value
        )));
    }
    let precision = decimals.min(9) as usize;
    parse_amount(&format!("{:.*}", precision, value), decimals)
}

/// Render base units back into a human decimal string.
pub fn format_amount(value: U256, decimals: u8) -> String {
    format_units(value, decimals).unwrap_or_else(|_| value.to_string())
}

/// Lossy conversion used only for display and price arithmetic.
pub fn to_f64(value: U256) -> f64 {
    value.to_string().parse().unwrap_or(f64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(parse_amount("1", 9).unwrap(), U256::from(1_000_000_000u64));
        assert_eq!(parse_amount("12.5", 9).unwrap(), U256::from(12_500_000_000u64));
        assert_eq!(parse_amount("0.000000001", 9).unwrap(), U256::from(1u64));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_amount("12,5", 9).is_err());
        assert!(parse_amount_f64(f64::NAN, 9).is_err());
        assert!(parse_amount_f64(-1.0, 9).is_err());
    }

    #[test]
    fn float_amounts_round_trip_through_base_units() {
        let units = parse_amount_f64(1000.0, 9).unwrap();
        assert_eq!(units, U256::from(1_000_000_000_000u64));
        assert_eq!(format_amount(units, 9), "1000.000000000");
    }

    #[test]
    fn to_f64_handles_large_values() {
        let big = U256::from(10u64).pow(U256::from(30u64));
        assert!(to_f64(big) > 1e29);
    }
}
