//! Field validation against known bounds.
//!
//! Each field carries an explicit, ordered list of checks; the first failing
//! check decides the field's single error code.
use crate::amount::{is_positive, is_too_much, parse_amount};
use crate::form::ErrorCode;
use rust_decimal::Decimal;

pub const INVALID_NUMBER: &str = "invalid-number";
pub const TOO_MUCH: &str = "too-much";
pub const TOO_MUCH_MAX: &str = "too-much-max";

/// Bound a check compares against; unknown bounds never fail a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// The field must parse as a decimal.
    Number,
    /// Not above the eligibility cap.
    AtMostMaximum,
    /// Not above the wallet balance of the given token.
    AtMostWallet(Token),
    /// Not above the position's amount of the given token.
    AtMostPosition(Token),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Collateral,
    Borrowed,
}

/// Known limits at validation time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bounds {
    pub maximum: Option<Decimal>,
    pub wallet_collateral: Option<Decimal>,
    pub wallet_borrowed: Option<Decimal>,
    pub position_collateral: Option<Decimal>,
    pub position_debt: Option<Decimal>,
}

impl Bounds {
    fn wallet(&self, token: Token) -> Option<Decimal> {
        match token {
            Token::Collateral => self.wallet_collateral,
            Token::Borrowed => self.wallet_borrowed,
        }
    }

    fn position(&self, token: Token) -> Option<Decimal> {
        match token {
            Token::Collateral => self.position_collateral,
            Token::Borrowed => self.position_debt,
        }
    }
}

/// One check plus the code it reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub check: Check,
    pub code: &'static str,
}

impl Rule {
    pub const fn new(check: Check, code: &'static str) -> Self {
        Self { check, code }
    }
}

/// Run `rules` in order against `value`, returning the first failure.
pub fn first_error(value: &str, rules: &[Rule], bounds: &Bounds) -> Option<ErrorCode> {
    rules
        .iter()
        .find(|rule| fails(value, rule.check, bounds))
        .map(|rule| ErrorCode::new(rule.code))
}

fn fails(value: &str, check: Check, bounds: &Bounds) -> bool {
    match check {
        Check::Number => parse_amount(value).is_none(),
        Check::AtMostMaximum => bounds
            .maximum
            .is_some_and(|maximum| is_too_much(value, maximum)),
        Check::AtMostWallet(token) => bounds
            .wallet(token)
            .is_some_and(|balance| is_too_much(value, balance)),
        Check::AtMostPosition(token) => bounds
            .position(token)
            .is_some_and(|held| is_too_much(value, held)),
    }
}

/// Minimum viable input shared by the amount-driven actions.
pub fn has_amount(value: &str) -> bool {
    is_positive(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REMOVE_RULES: [Rule; 3] = [
        Rule::new(Check::Number, INVALID_NUMBER),
        Rule::new(Check::AtMostMaximum, TOO_MUCH_MAX),
        Rule::new(Check::AtMostPosition(Token::Collateral), TOO_MUCH),
    ];

    #[test]
    fn rule_order_decides_the_reported_error() {
        let bounds = Bounds {
            maximum: Some(Decimal::from(50)),
            position_collateral: Some(Decimal::from(80)),
            ..Bounds::default()
        };
        let error = first_error("100", &REMOVE_RULES, &bounds).expect("error");
        assert_eq!(error.as_str(), TOO_MUCH_MAX);

        let reversed = [REMOVE_RULES[0].clone(), REMOVE_RULES[2].clone(), REMOVE_RULES[1].clone()];
        let error = first_error("100", &reversed, &bounds).expect("error");
        assert_eq!(error.as_str(), TOO_MUCH);
    }

    #[test]
    fn unknown_bounds_never_fail() {
        assert_eq!(first_error("1000", &REMOVE_RULES, &Bounds::default()), None);
    }

    #[test]
    fn unparsable_input_reports_invalid_number_first() {
        let bounds = Bounds {
            maximum: Some(Decimal::ZERO),
            ..Bounds::default()
        };
        let error = first_error("12abc", &REMOVE_RULES, &bounds).expect("error");
        assert_eq!(error.as_str(), INVALID_NUMBER);
    }
}
