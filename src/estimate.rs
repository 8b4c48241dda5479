//! Remote estimation calls.
//!
//! These functions only talk to the ledger and turn failures into error
//! codes. Whether a result may be applied is decided by the slice, which
//! holds the ticket each call was dispatched under.
use crate::client::{Cost, CostTarget, LedgerClient, OperationRequest, Preview};
use crate::form::ErrorCode;
use rust_decimal::Decimal;
use serde::Serialize;

pub const COST_ERROR: &str = "error-est-gas";
pub const PREVIEW_ERROR: &str = "error-est-detail";
pub const ELIGIBILITY_ERROR: &str = "error-max";

/// Cost of the next transaction plus the authorization it was priced under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostEstimate {
    pub cost: Cost,
    pub authorized: bool,
}

/// Price the next transaction: the approval while unauthorized, else the action.
pub async fn estimate_cost(
    client: &dyn LedgerClient,
    request: &OperationRequest,
    requires_approval: bool,
) -> Result<CostEstimate, ErrorCode> {
    let authorized = if requires_approval {
        client
            .is_authorized(request)
            .await
            .map_err(|err| err.code(COST_ERROR))?
    } else {
        true
    };
    let target = if authorized {
        CostTarget::Action
    } else {
        CostTarget::Approval
    };
    let cost = client
        .estimate_cost(request, target)
        .await
        .map_err(|err| err.code(COST_ERROR))?;
    Ok(CostEstimate { cost, authorized })
}

pub async fn estimate_preview(
    client: &dyn LedgerClient,
    request: &OperationRequest,
) -> Result<Preview, ErrorCode> {
    client
        .preview(request)
        .await
        .map_err(|err| err.code(PREVIEW_ERROR))
}

pub async fn fetch_eligibility(
    client: &dyn LedgerClient,
    request: &OperationRequest,
) -> Result<Decimal, ErrorCode> {
    client
        .eligibility(request)
        .await
        .map_err(|err| err.code(ELIGIBILITY_ERROR))
}
