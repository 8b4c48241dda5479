use super::amount_or_zero;
use crate::action::Action;
use crate::form::ErrorCode;
use crate::key::KeyField;
use crate::steps::StepLabels;
use crate::validate::{
    first_error, has_amount, Bounds, Check, Rule, Token, INVALID_NUMBER, TOO_MUCH, TOO_MUCH_MAX,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const COLLATERAL_RULES: [Rule; 2] = [
    Rule::new(Check::Number, INVALID_NUMBER),
    Rule::new(Check::AtMostWallet(Token::Collateral), TOO_MUCH),
];

const DEBT_RULES: [Rule; 2] = [
    Rule::new(Check::Number, INVALID_NUMBER),
    Rule::new(Check::AtMostMaximum, TOO_MUCH_MAX),
];

const DEFAULT_SLIPPAGE: &str = "0.1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BorrowMoreValues {
    /// Extra collateral deposited alongside the loan; may stay empty.
    pub collateral: String,
    pub debt: String,
    /// Max slippage in percent, only relevant to the preview.
    pub slippage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral_error: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debt_error: Option<ErrorCode>,
}

impl Default for BorrowMoreValues {
    fn default() -> Self {
        Self {
            collateral: String::new(),
            debt: String::new(),
            slippage: DEFAULT_SLIPPAGE.to_string(),
            collateral_error: None,
            debt_error: None,
        }
    }
}

/// Borrow more against an existing position.
#[derive(Debug, Clone, Copy, Default)]
pub struct BorrowMore;

impl Action for BorrowMore {
    type Values = BorrowMoreValues;

    const NAME: &'static str = "borrow-more";
    const OPERATION: &'static str = "borrow_more";
    const REQUIRES_APPROVAL: bool = true;
    const LABELS: StepLabels = StepLabels {
        approval: "Approve Spending",
        execute_id: "BORROW",
        execute: "Borrow",
    };

    fn key_fields(&self, values: &Self::Values) -> Vec<KeyField> {
        vec![
            KeyField::new("collateral", values.collateral.as_str()),
            KeyField::new("debt", values.debt.as_str()),
            KeyField::new("slippage", values.slippage.as_str()),
        ]
    }

    /// Slippage does not change the transaction cost.
    fn cost_fields(&self, values: &Self::Values) -> Vec<KeyField> {
        vec![
            KeyField::new("collateral", values.collateral.as_str()),
            KeyField::new("debt", values.debt.as_str()),
        ]
    }

    /// Max borrowable grows with the collateral deposited alongside.
    fn eligibility_fields(&self, values: &Self::Values) -> Option<Vec<KeyField>> {
        Some(vec![KeyField::new("collateral", values.collateral.as_str())])
    }

    fn clear_errors(&self, values: &mut Self::Values) {
        values.collateral_error = None;
        values.debt_error = None;
    }

    fn validate(&self, values: &mut Self::Values, bounds: &Bounds) {
        values.collateral_error = first_error(&values.collateral, &COLLATERAL_RULES, bounds);
        values.debt_error = first_error(&values.debt, &DEBT_RULES, bounds);
    }

    fn has_field_errors(&self, values: &Self::Values) -> bool {
        values.collateral_error.is_some() || values.debt_error.is_some()
    }

    fn has_amount(&self, values: &Self::Values) -> bool {
        has_amount(&values.debt)
    }

    fn amounts(&self, values: &Self::Values) -> Vec<(&'static str, Decimal)> {
        vec![
            ("collateral", amount_or_zero(&values.collateral)),
            ("debt", amount_or_zero(&values.debt)),
            ("slippage", amount_or_zero(&values.slippage)),
        ]
    }

    fn pending_message(&self, values: &Self::Values) -> String {
        format!("Borrowing {}", values.debt.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::derive_key;

    #[test]
    fn slippage_changes_active_key_but_not_cost_key() {
        let action = BorrowMore;
        let mut values = BorrowMoreValues {
            debt: "10".to_string(),
            ..BorrowMoreValues::default()
        };
        let active = derive_key(None, None, &action.key_fields(&values));
        let cost = derive_key(None, None, &action.cost_fields(&values));
        values.slippage = "0.5".to_string();
        assert_ne!(active, derive_key(None, None, &action.key_fields(&values)));
        assert_eq!(cost, derive_key(None, None, &action.cost_fields(&values)));
    }

    #[test]
    fn each_field_gets_its_own_error() {
        let action = BorrowMore;
        let mut values = BorrowMoreValues {
            collateral: "x".to_string(),
            debt: "500".to_string(),
            ..BorrowMoreValues::default()
        };
        let bounds = Bounds {
            maximum: Some(Decimal::from(100)),
            ..Bounds::default()
        };
        action.validate(&mut values, &bounds);
        assert_eq!(values.collateral_error, Some(ErrorCode::new(INVALID_NUMBER)));
        assert_eq!(values.debt_error, Some(ErrorCode::new(TOO_MUCH_MAX)));
    }
}
