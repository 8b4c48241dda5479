//! Decimal amount parsing for user-entered form fields.
use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a form amount; blank input reads as zero.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(Decimal::ZERO);
    }
    Decimal::from_str(trimmed).ok()
}

/// True when `raw` parses to a strictly positive amount.
pub fn is_positive(raw: &str) -> bool {
    parse_amount(raw).is_some_and(|value| value > Decimal::ZERO)
}

/// True when `value` exceeds `limit`, treating unparsable input as zero.
pub fn is_too_much(value: &str, limit: Decimal) -> bool {
    parse_amount(value).unwrap_or(Decimal::ZERO) > limit
}
