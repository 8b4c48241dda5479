//! End-to-end pipeline behavior through the view binding.

mod common;

use common::{account, advance, identity, subject, Harness};
use rust_decimal::Decimal;
use std::time::Duration;
use stepflow::actions::{BorrowMore, CollateralAdd, CollateralRemove};
use stepflow::notify::NotifyLevel;
use stepflow::sim::INSUFFICIENT_BALANCE;
use stepflow::{ActionState, CacheEntry, ErrorSource, Phase, StepKey, StepStatus};

fn statuses(steps: &[stepflow::Step]) -> Vec<(StepKey, StepStatus)> {
    steps.iter().map(|step| (step.key, step.status)).collect()
}

#[tokio::test(start_paused = true)]
async fn typing_quickly_keeps_only_the_latest_estimate() {
    let harness = Harness::new(CollateralAdd, account(1_000, 0, 0, 1_000));
    harness.ledger.set_amount_latency("100", Duration::from_millis(400));
    harness.ledger.set_amount_latency("200", Duration::from_millis(20));
    harness.view.mount(&identity(), &subject()).settled().await;

    let slow = harness
        .view
        .update(|values| values.collateral = "100".to_string())
        .expect("mounted");
    advance(5).await;
    let fast = harness
        .view
        .update(|values| values.collateral = "200".to_string())
        .expect("mounted");
    fast.settled().await;
    slow.settled().await;

    let snapshot = harness.slice().snapshot();
    let estimate = snapshot.cost.as_ref().and_then(CacheEntry::ready).expect("cost");
    assert_eq!(estimate.cost.units, Decimal::from(9));
    assert_eq!(
        snapshot.preview.as_ref().and_then(CacheEntry::ready).map(|p| p.fields["collateral"].clone()),
        Some("200".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn approve_then_execute_walks_the_steps() {
    let harness = Harness::new(CollateralAdd, account(1_000, 0, 0, 0));
    harness.view.mount(&identity(), &subject()).settled().await;
    harness
        .view
        .update(|values| values.collateral = "100".to_string())
        .expect("mounted")
        .settled()
        .await;

    assert_eq!(
        statuses(&harness.view.steps()),
        vec![
            (StepKey::Approval, StepStatus::Current),
            (StepKey::Execute, StepStatus::Pending),
        ]
    );

    let outcome = harness
        .view
        .click(StepKey::Approval)
        .await
        .expect("approve")
        .expect("signer");
    assert_eq!(outcome.error, None);
    advance(1).await;
    assert_eq!(
        statuses(&harness.view.steps()),
        vec![(StepKey::Execute, StepStatus::Current)]
    );
    assert_eq!(harness.ledger.calls("is_authorized"), 2);

    let outcome = harness
        .view
        .click(StepKey::Execute)
        .await
        .expect("execute")
        .expect("signer");
    assert_eq!(outcome.error, None);
    assert_eq!(harness.slice().snapshot().status.state(), ActionState::Complete);
    assert_eq!(
        statuses(&harness.view.steps()),
        vec![(StepKey::Execute, StepStatus::Succeeded)]
    );
    let banner = harness.view.banner().expect("banner");
    assert_eq!(banner.hash, outcome.hashes[0]);
    assert!(harness.notifier.open().is_empty());
}

#[tokio::test(start_paused = true)]
async fn execute_failure_is_shown_and_retryable() {
    let harness = Harness::new(CollateralAdd, account(1_000, 0, 0, 1_000));
    harness.view.mount(&identity(), &subject()).settled().await;
    harness
        .view
        .update(|values| values.collateral = "100".to_string())
        .expect("mounted")
        .settled()
        .await;

    harness
        .ledger
        .fail_next("submit_action", Some(INSUFFICIENT_BALANCE));
    let outcome = harness
        .view
        .click(StepKey::Execute)
        .await
        .expect("execute")
        .expect("signer");
    assert_eq!(outcome.error.as_ref().map(|code| code.as_str()), Some(INSUFFICIENT_BALANCE));

    let snapshot = harness.slice().snapshot();
    let error = snapshot.status.error.as_ref().expect("error");
    assert_eq!(error.source, ErrorSource::Execute);
    assert_eq!(snapshot.values.collateral, "100");
    assert_eq!(
        statuses(&harness.view.steps()),
        vec![(StepKey::Execute, StepStatus::Current)]
    );
    assert_eq!(
        harness.notifier.shown(NotifyLevel::Error),
        vec![INSUFFICIENT_BALANCE.to_string()]
    );
    assert!(harness.view.banner().is_none());

    let retry = harness
        .view
        .click(StepKey::Execute)
        .await
        .expect("execute")
        .expect("signer");
    assert_eq!(retry.error, None);
    assert_eq!(harness.slice().snapshot().status.phase, Phase::Complete);
}

#[tokio::test(start_paused = true)]
async fn unmounting_mid_flight_suppresses_visible_effects() {
    let harness = Harness::new(CollateralAdd, account(1_000, 0, 0, 1_000));
    harness.ledger.set_latency("submit_action", Duration::from_millis(200));
    harness.view.mount(&identity(), &subject()).settled().await;
    harness
        .view
        .update(|values| values.collateral = "100".to_string())
        .expect("mounted")
        .settled()
        .await;

    let click = {
        let view = harness.view.clone();
        tokio::spawn(async move { view.click(StepKey::Execute).await })
    };
    advance(10).await;
    harness.view.unmount();

    let outcome = click.await.expect("join").expect("execute").expect("signer");
    assert_eq!(outcome.error, None);
    assert!(harness.view.banner().is_none());
    assert!(harness.notifier.open().is_empty());
    assert!(harness.slice().active_key().is_unset());
    assert_eq!(harness.slice().snapshot().status.phase, Phase::NeedsApproval);

    // The ledger still settled, so the read model catches up.
    advance(1).await;
    let book = harness.accounts.cached(&identity(), &subject()).expect("book");
    assert_eq!(book.wallet.collateral, Decimal::from(900));
}

#[tokio::test(start_paused = true)]
async fn editing_during_execute_drops_the_outcome_follow_up() {
    let harness = Harness::new(CollateralAdd, account(1_000, 0, 0, 1_000));
    harness.ledger.set_latency("wait_for_settlement", Duration::from_millis(200));
    harness.view.mount(&identity(), &subject()).settled().await;
    harness
        .view
        .update(|values| values.collateral = "100".to_string())
        .expect("mounted")
        .settled()
        .await;

    let click = {
        let view = harness.view.clone();
        tokio::spawn(async move { view.click(StepKey::Execute).await })
    };
    advance(10).await;
    let edit = harness
        .view
        .update(|values| values.collateral = "50".to_string())
        .expect("mounted");

    let outcome = click.await.expect("join").expect("execute").expect("signer");
    assert_eq!(outcome.error, None);
    edit.settled().await;
    assert!(harness.view.banner().is_none());
    let snapshot = harness.slice().snapshot();
    assert_eq!(snapshot.values.collateral, "50");
    assert!(!snapshot.status.is_complete());
    let estimate = snapshot.cost.as_ref().and_then(CacheEntry::ready).expect("cost for 50");
    assert_eq!(estimate.cost.units, Decimal::from(3));

    // The settled action refreshes the wallet and the edited values are
    // checked and estimated again; nothing shown for them is dropped.
    advance(5).await;
    let snapshot = harness.slice().snapshot();
    assert_eq!(snapshot.values.collateral, "50");
    assert_eq!(snapshot.values.collateral_error, None);
    assert!(snapshot.cost.as_ref().and_then(CacheEntry::ready).is_some());
    assert_eq!(
        snapshot.preview.as_ref().and_then(CacheEntry::ready).map(|p| p.fields["collateral"].clone()),
        Some("50".to_string())
    );
    assert!(harness.view.slice().steps_ready());
    let book = harness.accounts.cached(&identity(), &subject()).expect("book");
    assert_eq!(book.wallet.collateral, Decimal::from(900));
}

#[tokio::test(start_paused = true)]
async fn remove_without_approval_starts_at_execute() {
    let harness = Harness::new(CollateralRemove, account(0, 100, 0, 0));
    harness.view.mount(&identity(), &subject()).settled().await;
    assert_eq!(
        statuses(&harness.view.steps()),
        vec![(StepKey::Execute, StepStatus::Pending)]
    );
    harness
        .view
        .update(|values| values.collateral = "30".to_string())
        .expect("mounted")
        .settled()
        .await;
    assert_eq!(
        statuses(&harness.view.steps()),
        vec![(StepKey::Execute, StepStatus::Current)]
    );
    assert_eq!(harness.ledger.calls("is_authorized"), 0);
}

#[tokio::test(start_paused = true)]
async fn borrow_cap_follows_collateral() {
    // Cap: (100 + collateral) * 0.5 - 20.
    let harness = Harness::new(BorrowMore, account(100, 100, 20, 1_000));
    harness.view.mount(&identity(), &subject()).settled().await;
    harness
        .view
        .update(|values| values.debt = "50".to_string())
        .expect("mounted")
        .settled()
        .await;
    let snapshot = harness.slice().snapshot();
    assert_eq!(snapshot.values.debt_error.as_ref().map(|c| c.as_str()), Some("too-much-max"));

    harness
        .view
        .update(|values| values.collateral = "40".to_string())
        .expect("mounted")
        .settled()
        .await;
    let snapshot = harness.slice().snapshot();
    assert_eq!(snapshot.values.debt_error, None);
    assert_eq!(
        snapshot.maximum.as_ref().and_then(CacheEntry::ready),
        Some(&Decimal::from(50))
    );
    assert_eq!(harness.ledger.calls("eligibility"), 2);
}

#[tokio::test(start_paused = true)]
async fn remount_starts_from_a_clean_slate() {
    let harness = Harness::new(CollateralAdd, account(1_000, 0, 0, 1_000));
    harness.view.mount(&identity(), &subject()).settled().await;
    harness
        .view
        .update(|values| values.collateral = "100".to_string())
        .expect("mounted")
        .settled()
        .await;
    harness.view.unmount();
    assert!(harness.view.update(|values| values.collateral = "1".to_string()).is_none());

    harness.view.mount(&identity(), &subject()).settled().await;
    let snapshot = harness.slice().snapshot();
    assert_eq!(snapshot.values.collateral, "");
    assert!(snapshot.cost.is_none());
}
