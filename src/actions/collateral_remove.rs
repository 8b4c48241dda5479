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

// The eligibility cap is checked before the held amount so that a request
// above both reports the cap.
const COLLATERAL_RULES: [Rule; 3] = [
    Rule::new(Check::Number, INVALID_NUMBER),
    Rule::new(Check::AtMostMaximum, TOO_MUCH_MAX),
    Rule::new(Check::AtMostPosition(Token::Collateral), TOO_MUCH),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollateralRemoveValues {
    pub collateral: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral_error: Option<ErrorCode>,
}

/// Withdraw collateral, capped by the position's max removable amount.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollateralRemove;

impl Action for CollateralRemove {
    type Values = CollateralRemoveValues;

    const NAME: &'static str = "collateral-remove";
    const OPERATION: &'static str = "remove_collateral";
    const REQUIRES_APPROVAL: bool = false;
    const LABELS: StepLabels = StepLabels {
        approval: "Approve Spending",
        execute_id: "REMOVE",
        execute: "Remove",
    };

    fn key_fields(&self, values: &Self::Values) -> Vec<KeyField> {
        vec![KeyField::new("collateral", values.collateral.as_str())]
    }

    /// The cap depends on the position only.
    fn eligibility_fields(&self, _values: &Self::Values) -> Option<Vec<KeyField>> {
        Some(Vec::new())
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
        format!("Removing {} collateral", values.collateral.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_is_reported_before_held_amount() {
        let action = CollateralRemove;
        let mut values = CollateralRemoveValues {
            collateral: "90".to_string(),
            collateral_error: None,
        };
        let bounds = Bounds {
            maximum: Some(Decimal::from(40)),
            position_collateral: Some(Decimal::from(80)),
            ..Bounds::default()
        };
        action.validate(&mut values, &bounds);
        assert_eq!(values.collateral_error, Some(ErrorCode::new(TOO_MUCH_MAX)));

        values.collateral = "50".to_string();
        action.validate(&mut values, &bounds);
        assert_eq!(values.collateral_error, Some(ErrorCode::new(TOO_MUCH_MAX)));

        values.collateral = "30".to_string();
        action.validate(&mut values, &bounds);
        assert_eq!(values.collateral_error, None);
    }
}
