//! In-process ledger with scripted latency and failures.
//!
//! Used by the scenario runner and by tests. Latency is simulated with
//! `tokio::time::sleep`, so tests on a paused clock stay deterministic.
//! Amounts are settled immediately on `submit_action`; settlement only
//! advances the block counter.
use crate::client::{
    Cost, CostTarget, LedgerClient, LedgerError, LedgerResult, OperationRequest, Position,
    Preview, Receipt, TxHash, WalletBalances,
};
use crate::form::ErrorCode;
use crate::key::{Identity, SubjectId};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const INSUFFICIENT_BALANCE: &str = "insufficient-balance";
pub const HIGH_SLIPPAGE: &str = "high-slippage";
pub const AMOUNT_OVERFLOW: &str = "amount-overflow";

const COST_DIVISOR: u32 = 25;
const HIGH_SLIPPAGE_PERCENT: u32 = 5;

/// Starting balances of one signer in one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimAccount {
    pub signer: String,
    pub subject: SubjectId,
    pub wallet: WalletBalances,
    pub position: Position,
    /// Pre-granted spending allowance.
    pub allowance: Decimal,
}

/// One-shot failure of the next call named `call`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimFailure {
    pub call: String,
    /// Rejection code; transport outage when absent.
    #[serde(default)]
    pub code: Option<ErrorCode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSetup {
    pub accounts: Vec<SimAccount>,
    /// Loan-to-value ratio for eligibility caps.
    pub max_ltv: Option<Decimal>,
    /// Per-call latency in milliseconds, keyed by ledger call name.
    pub latency_ms: BTreeMap<String, u64>,
    /// Estimation latency in milliseconds for requests carrying this amount.
    pub amount_latency_ms: BTreeMap<String, u64>,
    pub failures: Vec<SimFailure>,
}

type AccountKey = (String, SubjectId);

#[derive(Debug, Default)]
struct SimState {
    accounts: HashMap<AccountKey, SimAccount>,
    max_ltv: Decimal,
    latency: BTreeMap<String, Duration>,
    amount_latency: BTreeMap<String, Duration>,
    failures: HashMap<String, VecDeque<Option<ErrorCode>>>,
    queued_delays: HashMap<String, VecDeque<Duration>>,
    calls: Vec<String>,
    next_hash: u64,
    block: u64,
}

#[derive(Debug)]
pub struct SimLedger {
    state: Mutex<SimState>,
}

impl Default for SimLedger {
    fn default() -> Self {
        Self::new(SimSetup::default())
    }
}

impl SimLedger {
    pub fn new(setup: SimSetup) -> Self {
        let mut state = SimState {
            max_ltv: setup.max_ltv.unwrap_or(Decimal::new(5, 1)),
            ..SimState::default()
        };
        for account in setup.accounts {
            state
                .accounts
                .insert((account.signer.clone(), account.subject.clone()), account);
        }
        for (call, ms) in setup.latency_ms {
            state.latency.insert(call, Duration::from_millis(ms));
        }
        for (amount, ms) in setup.amount_latency_ms {
            state
                .amount_latency
                .insert(normalize(&amount), Duration::from_millis(ms));
        }
        for failure in setup.failures {
            state
                .failures
                .entry(failure.call)
                .or_default()
                .push_back(failure.code);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn set_latency(&self, call: &str, latency: Duration) {
        self.sim().latency.insert(call.to_string(), latency);
    }

    /// Delay estimation calls whose request carries `amount`.
    pub fn set_amount_latency(&self, amount: &str, latency: Duration) {
        self.sim().amount_latency.insert(normalize(amount), latency);
    }

    /// Delay the next `call` by `latency`, ahead of any other latency rule.
    pub fn queue_latency(&self, call: &str, latency: Duration) {
        self.sim()
            .queued_delays
            .entry(call.to_string())
            .or_default()
            .push_back(latency);
    }

    /// Fail the next `call`; `None` simulates a transport outage.
    pub fn fail_next(&self, call: &str, code: Option<&str>) {
        self.sim()
            .failures
            .entry(call.to_string())
            .or_default()
            .push_back(code.map(ErrorCode::new));
    }

    pub fn account(&self, signer: &str, subject: &SubjectId) -> Option<SimAccount> {
        self.sim()
            .accounts
            .get(&(signer.to_string(), subject.clone()))
            .cloned()
    }

    /// Number of calls made to `call` so far.
    pub fn calls(&self, call: &str) -> usize {
        self.sim().calls.iter().filter(|name| *name == call).count()
    }

    pub fn call_log(&self) -> Vec<String> {
        self.sim().calls.clone()
    }

    fn sim(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call, wait out its latency, then surface a scripted failure.
    async fn enter(&self, call: &str, request: Option<&OperationRequest>) -> LedgerResult<()> {
        let (delay, failure) = {
            let mut sim = self.sim();
            sim.calls.push(call.to_string());
            let by_amount = request.and_then(|request| {
                request
                    .amounts
                    .iter()
                    .find_map(|(_, value)| sim.amount_latency.get(&value.normalize().to_string()))
                    .copied()
            });
            let queued = sim
                .queued_delays
                .get_mut(call)
                .and_then(VecDeque::pop_front);
            let delay = queued
                .or(by_amount.filter(|_| is_estimation(call)))
                .or_else(|| sim.latency.get(call).copied())
                .unwrap_or_default();
            let failure = sim
                .failures
                .get_mut(call)
                .and_then(VecDeque::pop_front);
            (delay, failure)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match failure {
            None => Ok(()),
            Some(Some(code)) => Err(LedgerError::Rejected(code)),
            Some(None) => Err(LedgerError::Unavailable(format!("{call}: scripted outage"))),
        }
    }

    fn hash(sim: &mut SimState) -> TxHash {
        sim.next_hash += 1;
        TxHash(format!("0x{:064x}", sim.next_hash))
    }
}

#[async_trait]
impl LedgerClient for SimLedger {
    async fn estimate_cost(
        &self,
        request: &OperationRequest,
        target: CostTarget,
    ) -> LedgerResult<Cost> {
        self.enter("estimate_cost", Some(request)).await?;
        let units = checked(Decimal::ONE.checked_add(total(request)? / Decimal::from(COST_DIVISOR)))?;
        Ok(Cost { target, units })
    }

    async fn is_authorized(&self, request: &OperationRequest) -> LedgerResult<bool> {
        self.enter("is_authorized", Some(request)).await?;
        let sim = self.sim();
        let allowance = request
            .signer
            .as_ref()
            .and_then(|signer| sim.accounts.get(&(signer.clone(), request.subject.clone())))
            .map(|account| account.allowance)
            .unwrap_or(Decimal::ZERO);
        Ok(allowance >= request.amount("collateral"))
    }

    async fn preview(&self, request: &OperationRequest) -> LedgerResult<Preview> {
        self.enter("preview", Some(request)).await?;
        let mut fields = BTreeMap::new();
        fields.insert("operation".to_string(), request.operation.to_string());
        for (name, value) in &request.amounts {
            fields.insert((*name).to_string(), value.normalize().to_string());
        }
        let warning = (request.amount("slippage") > Decimal::from(HIGH_SLIPPAGE_PERCENT))
            .then(|| ErrorCode::new(HIGH_SLIPPAGE));
        Ok(Preview { fields, warning })
    }

    async fn eligibility(&self, request: &OperationRequest) -> LedgerResult<Decimal> {
        self.enter("eligibility", Some(request)).await?;
        let sim = self.sim();
        let position = request
            .signer
            .as_ref()
            .and_then(|signer| sim.accounts.get(&(signer.clone(), request.subject.clone())))
            .map(|account| account.position.clone())
            .unwrap_or_default();
        let ltv = sim.max_ltv;
        let cap = match request.operation {
            "remove_collateral" if ltv > Decimal::ZERO => {
                let backing = checked(position.debt.checked_div(ltv))?;
                checked(position.collateral.checked_sub(backing))?
            }
            "remove_collateral" => position.collateral,
            "borrow_more" => {
                let collateral =
                    checked(position.collateral.checked_add(request.amount("collateral")))?;
                let limit = checked(collateral.checked_mul(ltv))?;
                checked(limit.checked_sub(position.debt))?
            }
            _ => Decimal::MAX,
        };
        Ok(cap.max(Decimal::ZERO))
    }

    async fn wallet_balances(
        &self,
        identity: &Identity,
        subject: &SubjectId,
    ) -> LedgerResult<WalletBalances> {
        self.enter("wallet_balances", None).await?;
        let sim = self.sim();
        Ok(identity
            .signer()
            .and_then(|signer| sim.accounts.get(&(signer.to_string(), subject.clone())))
            .map(|account| account.wallet.clone())
            .unwrap_or_default())
    }

    async fn position(&self, identity: &Identity, subject: &SubjectId) -> LedgerResult<Position> {
        self.enter("position", None).await?;
        let sim = self.sim();
        Ok(identity
            .signer()
            .and_then(|signer| sim.accounts.get(&(signer.to_string(), subject.clone())))
            .map(|account| account.position.clone())
            .unwrap_or_default())
    }

    async fn submit_approval(&self, request: &OperationRequest) -> LedgerResult<Vec<TxHash>> {
        self.enter("submit_approval", Some(request)).await?;
        let mut sim = self.sim();
        let signer = signer_of(request)?;
        let account = sim
            .accounts
            .entry((signer, request.subject.clone()))
            .or_default();
        account.allowance = request.amount("collateral");
        Ok(vec![Self::hash(&mut sim)])
    }

    async fn submit_action(&self, request: &OperationRequest) -> LedgerResult<TxHash> {
        self.enter("submit_action", Some(request)).await?;
        let mut sim = self.sim();
        let signer = signer_of(request)?;
        let key = (signer.clone(), request.subject.clone());
        let account = sim.accounts.entry(key).or_insert_with(|| SimAccount {
            signer,
            subject: request.subject.clone(),
            ..SimAccount::default()
        });
        apply_action(account, request)?;
        Ok(Self::hash(&mut sim))
    }

    async fn wait_for_settlement(&self, hash: &TxHash) -> LedgerResult<Receipt> {
        if let Err(err) = self.enter("wait_for_settlement", None).await {
            return Err(match err {
                LedgerError::Rejected(_) => LedgerError::Reverted { hash: hash.clone() },
                other => other,
            });
        }
        let mut sim = self.sim();
        sim.block += 1;
        Ok(Receipt {
            hash: hash.clone(),
            block: sim.block,
        })
    }
}

/// Apply `request` to `account`; nothing changes when it is rejected.
fn apply_action(account: &mut SimAccount, request: &OperationRequest) -> LedgerResult<()> {
    let collateral = request.amount("collateral");
    let debt = request.amount("debt");
    let insufficient = || LedgerError::Rejected(ErrorCode::new(INSUFFICIENT_BALANCE));
    let mut next = account.clone();
    match request.operation {
        "add_collateral" => {
            if collateral > next.wallet.collateral {
                return Err(insufficient());
            }
            next.wallet.collateral = checked(next.wallet.collateral.checked_sub(collateral))?;
            next.position.collateral = checked(next.position.collateral.checked_add(collateral))?;
        }
        "remove_collateral" => {
            if collateral > next.position.collateral {
                return Err(insufficient());
            }
            next.position.collateral = checked(next.position.collateral.checked_sub(collateral))?;
            next.wallet.collateral = checked(next.wallet.collateral.checked_add(collateral))?;
        }
        "borrow_more" => {
            if collateral > next.wallet.collateral {
                return Err(insufficient());
            }
            next.wallet.collateral = checked(next.wallet.collateral.checked_sub(collateral))?;
            next.position.collateral = checked(next.position.collateral.checked_add(collateral))?;
            next.position.debt = checked(next.position.debt.checked_add(debt))?;
            next.wallet.borrowed = checked(next.wallet.borrowed.checked_add(debt))?;
        }
        other => {
            return Err(LedgerError::Rejected(ErrorCode::new(format!(
                "unknown-operation-{other}"
            ))))
        }
    }
    next.position.exists = true;
    *account = next;
    Ok(())
}

/// Out-of-range arithmetic is a rejection, not a panic.
fn checked(value: Option<Decimal>) -> LedgerResult<Decimal> {
    value.ok_or_else(|| LedgerError::Rejected(ErrorCode::new(AMOUNT_OVERFLOW)))
}

fn signer_of(request: &OperationRequest) -> LedgerResult<String> {
    request
        .signer
        .clone()
        .ok_or_else(|| LedgerError::Rejected(ErrorCode::new("no-signer")))
}

/// Sum of the request's token amounts; slippage is a percentage, not an amount.
fn total(request: &OperationRequest) -> LedgerResult<Decimal> {
    request
        .amounts
        .iter()
        .filter(|(name, _)| *name != "slippage")
        .try_fold(Decimal::ZERO, |sum, (_, value)| checked(sum.checked_add(*value)))
}

fn normalize(amount: &str) -> String {
    amount
        .trim()
        .parse::<Decimal>()
        .map(|value| value.normalize().to_string())
        .unwrap_or_else(|_| amount.trim().to_string())
}

fn is_estimation(call: &str) -> bool {
    matches!(call, "estimate_cost" | "is_authorized" | "preview")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(operation: &'static str, collateral: i64) -> OperationRequest {
        OperationRequest {
            operation,
            network_id: 1,
            signer: Some("0xabc".to_string()),
            subject: SubjectId::new("market-7"),
            amounts: vec![("collateral", Decimal::from(collateral))],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cost_scales_with_amount() {
        let ledger = SimLedger::default();
        let cost = ledger
            .estimate_cost(&request("add_collateral", 100), CostTarget::Action)
            .await
            .expect("cost");
        assert_eq!(cost.units, Decimal::from(5));
        let cost = ledger
            .estimate_cost(&request("add_collateral", 200), CostTarget::Action)
            .await
            .expect("cost");
        assert_eq!(cost.units, Decimal::from(9));
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_failure_fires_once() {
        let ledger = SimLedger::default();
        ledger.fail_next("submit_action", Some(INSUFFICIENT_BALANCE));
        let err = ledger
            .submit_action(&request("add_collateral", 0))
            .await
            .expect_err("scripted failure");
        assert_eq!(err.code("error-api").as_str(), INSUFFICIENT_BALANCE);
        assert!(ledger.submit_action(&request("add_collateral", 0)).await.is_ok());
        assert_eq!(ledger.calls("submit_action"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn approval_grants_allowance() {
        let ledger = SimLedger::default();
        let req = request("add_collateral", 50);
        assert!(!ledger.is_authorized(&req).await.expect("authorized"));
        ledger.submit_approval(&req).await.expect("approve");
        assert!(ledger.is_authorized(&req).await.expect("authorized"));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_amounts_are_rejected_not_panicking() {
        let ledger = SimLedger::new(SimSetup {
            accounts: vec![SimAccount {
                signer: "0xabc".to_string(),
                subject: SubjectId::new("market-7"),
                wallet: WalletBalances {
                    collateral: Decimal::MAX,
                    borrowed: Decimal::ZERO,
                },
                position: Position {
                    exists: true,
                    collateral: Decimal::from(100),
                    debt: Decimal::ZERO,
                },
                allowance: Decimal::ZERO,
            }],
            ..SimSetup::default()
        });
        let huge = OperationRequest {
            operation: "borrow_more",
            amounts: vec![("collateral", Decimal::MAX), ("debt", Decimal::ONE)],
            ..request("borrow_more", 0)
        };

        let err = ledger.eligibility(&huge).await.expect_err("cap overflows");
        assert_eq!(err.code("error-max").as_str(), AMOUNT_OVERFLOW);
        let err = ledger
            .estimate_cost(&huge, CostTarget::Action)
            .await
            .expect_err("total overflows");
        assert_eq!(err.code("error-est-gas").as_str(), AMOUNT_OVERFLOW);

        let err = ledger.submit_action(&huge).await.expect_err("position overflows");
        assert_eq!(err.code("error-api").as_str(), AMOUNT_OVERFLOW);
        let account = ledger.account("0xabc", &SubjectId::new("market-7")).expect("account");
        assert_eq!(account.wallet.collateral, Decimal::MAX);
        assert_eq!(account.position.collateral, Decimal::from(100));
    }

    #[tokio::test(start_paused = true)]
    async fn amount_latency_delays_estimation_only() {
        let ledger = SimLedger::default();
        ledger.set_amount_latency("100", Duration::from_millis(500));
        let start = tokio::time::Instant::now();
        ledger
            .estimate_cost(&request("add_collateral", 100), CostTarget::Action)
            .await
            .expect("cost");
        assert!(start.elapsed() >= Duration::from_millis(500));
        let start = tokio::time::Instant::now();
        ledger
            .submit_action(&request("add_collateral", 100))
            .await
            .expect_err("no wallet balance");
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
