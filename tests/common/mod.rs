//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use rust_decimal::Decimal;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;
use std::time::Duration;
use stepflow::client::{LedgerClient, Position, WalletBalances};
use stepflow::notify::RecordingNotifier;
use stepflow::sim::{SimAccount, SimLedger, SimSetup};
use stepflow::{AccountBook, Action, ActionView, Identity, SequencePolicy, Slice, SubjectId};

pub const SIGNER: &str = "0xabc";
pub const SUBJECT: &str = "market-7";

pub fn identity() -> Identity {
    Identity::new(1, Some(SIGNER))
}

pub fn subject() -> SubjectId {
    SubjectId::new(SUBJECT)
}

/// Account with `wallet` collateral tokens and the given position.
pub fn account(wallet: i64, collateral: i64, debt: i64, allowance: i64) -> SimAccount {
    SimAccount {
        signer: SIGNER.to_string(),
        subject: subject(),
        wallet: WalletBalances {
            collateral: Decimal::from(wallet),
            borrowed: Decimal::ZERO,
        },
        position: Position {
            exists: collateral > 0,
            collateral: Decimal::from(collateral),
            debt: Decimal::from(debt),
        },
        allowance: Decimal::from(allowance),
    }
}

/// A mounted-ready view over a fresh simulated ledger.
pub struct Harness<A: Action> {
    pub ledger: Arc<SimLedger>,
    pub accounts: Arc<AccountBook>,
    pub notifier: Arc<RecordingNotifier>,
    pub view: ActionView<A>,
}

impl<A: Action> Harness<A> {
    pub fn new(action: A, account: SimAccount) -> Self {
        Self::with_policy(action, account, SequencePolicy::default())
    }

    pub fn with_policy(action: A, account: SimAccount, policy: SequencePolicy) -> Self {
        let ledger = Arc::new(SimLedger::new(SimSetup {
            accounts: vec![account],
            ..SimSetup::default()
        }));
        let client: Arc<dyn LedgerClient> = ledger.clone();
        let accounts = Arc::new(AccountBook::new(client.clone()));
        let notifier = Arc::new(RecordingNotifier::new());
        let slice = Slice::new(action, client, accounts.clone(), policy);
        let view = ActionView::new(slice, notifier.clone());
        Self {
            ledger,
            accounts,
            notifier,
            view,
        }
    }

    pub fn slice(&self) -> &Slice<A> {
        self.view.slice()
    }
}

/// Let runnable tasks finish, then advance the paused clock by `ms`.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Run the stepflow binary with `args`, isolated from the user's config.
pub fn run_cli(args: &[&str], home: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stepflow"))
        .args(args)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env_remove("STEPFLOW_LOG")
        .output()
        .expect("run stepflow")
}
