//! Concrete actions wired onto the shared slice.
mod borrow_more;
mod collateral_add;
mod collateral_remove;

pub use borrow_more::{BorrowMore, BorrowMoreValues};
pub use collateral_add::{CollateralAdd, CollateralAddValues};
pub use collateral_remove::{CollateralRemove, CollateralRemoveValues};

use crate::amount::parse_amount;
use rust_decimal::Decimal;

/// Parsed form amount, zero when unparsable.
pub(crate) fn amount_or_zero(raw: &str) -> Decimal {
    parse_amount(raw).unwrap_or(Decimal::ZERO)
}
