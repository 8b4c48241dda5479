//! Narrow interface to the remote ledger and the read models around it.
//!
//! Everything here is implemented outside the pipeline. Calls are safe to
//! retry but the pipeline never retries on its own, and there are no
//! timeouts at this layer.
use crate::form::ErrorCode;
use crate::key::{Identity, SubjectId};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Failure reported by the ledger client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The ledger or the signer rejected the request with a known code.
    #[error("rejected: {0}")]
    Rejected(ErrorCode),
    /// Transport or node failure.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    /// The transaction was mined but reverted.
    #[error("transaction {hash} reverted")]
    Reverted { hash: TxHash },
}

impl LedgerError {
    /// Error code surfaced to the view; `fallback` names the failing stage.
    pub fn code(&self, fallback: &str) -> ErrorCode {
        match self {
            LedgerError::Rejected(code) => code.clone(),
            LedgerError::Unavailable(_) | LedgerError::Reverted { .. } => ErrorCode::new(fallback),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Transaction hash as returned by the chain client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters for every ledger call an action makes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationRequest {
    /// Operation name understood by the ledger client (`add_collateral`, ...).
    pub operation: &'static str,
    pub network_id: u64,
    pub signer: Option<String>,
    pub subject: SubjectId,
    /// Named amounts in the action's field order.
    pub amounts: Vec<(&'static str, Decimal)>,
}

impl OperationRequest {
    pub fn amount(&self, name: &str) -> Decimal {
        self.amounts
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| *value)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Which transaction a cost estimate is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTarget {
    Approval,
    Action,
}

/// Estimated network cost of the next transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cost {
    pub target: CostTarget,
    pub units: Decimal,
}

/// Action-specific detail info (health, bands, prices, ...), opaque here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub warning: Option<ErrorCode>,
}

/// Wallet token balances relevant to a subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalances {
    pub collateral: Decimal,
    pub borrowed: Decimal,
}

/// The signer's position in a subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub exists: bool,
    pub collateral: Decimal,
    pub debt: Decimal,
}

/// Settlement receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub hash: TxHash,
    pub block: u64,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn estimate_cost(&self, request: &OperationRequest, target: CostTarget)
        -> LedgerResult<Cost>;
    async fn is_authorized(&self, request: &OperationRequest) -> LedgerResult<bool>;
    async fn preview(&self, request: &OperationRequest) -> LedgerResult<Preview>;
    /// Eligibility cap (max removable, max borrowable, ...) for the request.
    async fn eligibility(&self, request: &OperationRequest) -> LedgerResult<Decimal>;
    async fn wallet_balances(
        &self,
        identity: &Identity,
        subject: &SubjectId,
    ) -> LedgerResult<WalletBalances>;
    async fn position(&self, identity: &Identity, subject: &SubjectId) -> LedgerResult<Position>;
    async fn submit_approval(&self, request: &OperationRequest) -> LedgerResult<Vec<TxHash>>;
    async fn submit_action(&self, request: &OperationRequest) -> LedgerResult<TxHash>;
    async fn wait_for_settlement(&self, hash: &TxHash) -> LedgerResult<Receipt>;
}

/// Refresh hooks the pipeline fires after a successful execute.
#[async_trait]
pub trait ReadModels: Send + Sync {
    async fn refresh_balances(&self, identity: &Identity, subject: &SubjectId);
    async fn refresh_subject(&self, identity: &Identity, subject: &SubjectId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_errors_keep_their_code() {
        let error = LedgerError::Rejected(ErrorCode::new("insufficient-balance"));
        assert_eq!(error.code("error-api").as_str(), "insufficient-balance");
        let error = LedgerError::Unavailable("timeout".to_string());
        assert_eq!(error.code("error-api").as_str(), "error-api");
    }
}
