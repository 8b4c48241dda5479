use super::amount_or_zero;
use crate::action::Action;
use crate::form::ErrorCode;
use crate::key::KeyField;
use crate::steps::StepLabels;
use crate::validate::{first_error, has_amount, Bounds, Check, Rule, Token, INVALID_NUMBER, TOO_MUCH};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const COLLATERAL_RULES: [Rule; 2] = [
    Rule::new(Check::Number, INVALID_NUMBER),
    Rule::new(Check::AtMostWallet(Token::Collateral), TOO_MUCH),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollateralAddValues {
    pub collateral: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral_error: Option<ErrorCode>,
}

/// Deposit more collateral into an existing position.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollateralAdd;

impl Action for CollateralAdd {
    type Values = CollateralAddValues;

    const NAME: &'static str = "collateral-add";
    const OPERATION: &'static str = "add_collateral";
    const REQUIRES_APPROVAL: bool = true;
    const LABELS: StepLabels = StepLabels {
        approval: "Approve Spending",
        execute_id: "ADD",
        execute: "Add",
    };

    fn key_fields(&self, values: &Self::Values) -> Vec<KeyField> {
        vec![KeyField::new("collateral", values.collateral.as_str())]
    }

    fn clear_errors(&self, values: &mut Self::Values) {
        values.collateral_error = None;
    }

    fn validate(&self, values: &mut Self::Values, bounds: &Bounds) {
        values.collateral_error = first_error(&values.collateral, &COLLATERAL_RULES, bounds);
    }

    fn has_field_errors(&self, values: &Self::Values) -> bool {
        values.collateral_error.is_some()
    }

    fn has_amount(&self, values: &Self::Values) -> bool {
        has_amount(&values.collateral)
    }

    fn amounts(&self, values: &Self::Values) -> Vec<(&'static str, Decimal)> {
        vec![("collateral", amount_or_zero(&values.collateral))]
    }

    fn pending_message(&self, values: &Self::Values) -> String {
        format!("Adding {} collateral", values.collateral.trim())
    }
}
