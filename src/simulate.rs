//! Scripted user sessions against the simulated ledger.
//!
//! A scenario names one action, the ledger setup, and an ordered list of
//! user events (mount, edits, waits, clicks). Running it yields a transcript
//! with the slice snapshot and the step list after every event.
use crate::accounts::AccountBook;
use crate::action::Action;
use crate::actions::{BorrowMore, CollateralAdd, CollateralRemove};
use crate::cache::SequencePolicy;
use crate::client::LedgerClient;
use crate::form::StepKey;
use crate::key::{Identity, SubjectId};
use crate::notify::{NotifyEvent, RecordingNotifier};
use crate::sim::{SimLedger, SimSetup};
use crate::slice::{Slice, SliceSnapshot, StepOutcome};
use crate::steps::Step;
use crate::view::{ActionView, TxBanner};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const SCENARIO_SCHEMA_VERSION: u32 = 1;
/// Upper bound for a single `wait` event.
pub const MAX_WAIT_MS: u64 = 60_000;

/// Actions a scenario may drive.
pub const ACTION_NAMES: [&str; 3] = [CollateralAdd::NAME, CollateralRemove::NAME, BorrowMore::NAME];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub schema_version: u32,
    pub action: String,
    /// Overrides the configured network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<u64>,
    /// Connected signer; read-only session when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
    pub subject: SubjectId,
    #[serde(default)]
    pub ledger: SimSetup,
    pub events: Vec<ScenarioEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioEvent {
    Mount,
    Unmount,
    /// Merge `values` into the form values.
    Set {
        values: Map<String, Value>,
        #[serde(default)]
        full_reset: bool,
    },
    Wait {
        ms: u64,
    },
    /// Click a step; `background` clicks run while later events proceed.
    Click {
        step: StepKey,
        #[serde(default)]
        background: bool,
    },
}

impl ScenarioEvent {
    fn describe(&self) -> String {
        match self {
            ScenarioEvent::Mount => "mount".to_string(),
            ScenarioEvent::Unmount => "unmount".to_string(),
            ScenarioEvent::Set { values, full_reset } => {
                let fields: Vec<String> = values
                    .iter()
                    .map(|(name, value)| match value {
                        Value::String(text) => format!("{name}={text}"),
                        other => format!("{name}={other}"),
                    })
                    .collect();
                let suffix = if *full_reset { " (full reset)" } else { "" };
                format!("set {}{suffix}", fields.join(" "))
            }
            ScenarioEvent::Wait { ms } => format!("wait {ms}ms"),
            ScenarioEvent::Click { step, background } => {
                let mode = if *background { " (background)" } else { "" };
                format!("click {step}{mode}")
            }
        }
    }
}

/// State after one event.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub index: usize,
    pub at_ms: u64,
    pub event: String,
    pub steps: Vec<Step>,
    pub snapshot: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub action: String,
    pub sequence_policy: SequencePolicy,
    pub entries: Vec<TranscriptEntry>,
    /// Outcomes of background clicks, in completion order.
    pub background: Vec<StepOutcome>,
    pub final_snapshot: Value,
    pub final_steps: Vec<Step>,
    pub banner: Option<TxBanner>,
    pub notifications: Vec<NotifyEvent>,
    pub ledger_calls: Vec<String>,
}

/// Load a scenario from disk.
pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let bytes = fs::read(path).with_context(|| format!("read scenario {}", path.display()))?;
    let scenario: Scenario = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse scenario {}", path.display()))?;
    Ok(scenario)
}

/// Check a scenario before running it.
pub fn validate_scenario(scenario: &Scenario) -> Result<()> {
    if scenario.schema_version != SCENARIO_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported scenario schema_version {}",
            scenario.schema_version
        ));
    }
    if !ACTION_NAMES.contains(&scenario.action.as_str()) {
        return Err(anyhow!(
            "unknown action {:?} (expected one of {})",
            scenario.action,
            ACTION_NAMES.join(", ")
        ));
    }
    if scenario.subject.as_str().trim().is_empty() {
        return Err(anyhow!("subject must be non-empty"));
    }
    if scenario.network_id == Some(0) {
        return Err(anyhow!("network_id must be non-zero"));
    }
    if scenario.events.is_empty() {
        return Err(anyhow!("scenario has no events"));
    }
    let mut mounted = false;
    for (index, event) in scenario.events.iter().enumerate() {
        match event {
            ScenarioEvent::Mount => mounted = true,
            ScenarioEvent::Unmount => mounted = false,
            ScenarioEvent::Wait { ms } if *ms > MAX_WAIT_MS => {
                return Err(anyhow!(
                    "event {index}: wait of {ms}ms exceeds {MAX_WAIT_MS}ms"
                ));
            }
            ScenarioEvent::Wait { .. } => {}
            ScenarioEvent::Set { values, .. } => {
                if !mounted {
                    return Err(anyhow!("event {index}: set before mount"));
                }
                for (name, value) in values {
                    if !value.is_string() {
                        return Err(anyhow!(
                            "event {index}: field {name:?} must be a string"
                        ));
                    }
                }
            }
            ScenarioEvent::Click { .. } if !mounted => {
                return Err(anyhow!("event {index}: click before mount"));
            }
            ScenarioEvent::Click { .. } => {}
        }
    }
    Ok(())
}

/// Example scenario written by `init`.
pub fn scenario_stub() -> Result<String> {
    let scenario = Scenario {
        schema_version: SCENARIO_SCHEMA_VERSION,
        action: CollateralAdd::NAME.to_string(),
        network_id: None,
        signer: Some("0xabc".to_string()),
        subject: SubjectId::new("market-7"),
        ledger: SimSetup {
            accounts: vec![crate::sim::SimAccount {
                signer: "0xabc".to_string(),
                subject: SubjectId::new("market-7"),
                wallet: crate::client::WalletBalances {
                    collateral: rust_decimal::Decimal::from(1_000),
                    borrowed: rust_decimal::Decimal::ZERO,
                },
                ..crate::sim::SimAccount::default()
            }],
            amount_latency_ms: [("100".to_string(), 300)].into_iter().collect(),
            ..SimSetup::default()
        },
        events: vec![
            ScenarioEvent::Mount,
            ScenarioEvent::Set {
                values: single_field("collateral", "100"),
                full_reset: false,
            },
            ScenarioEvent::Set {
                values: single_field("collateral", "200"),
                full_reset: false,
            },
            ScenarioEvent::Wait { ms: 500 },
            ScenarioEvent::Click {
                step: StepKey::Approval,
                background: false,
            },
            ScenarioEvent::Wait { ms: 50 },
            ScenarioEvent::Click {
                step: StepKey::Execute,
                background: false,
            },
        ],
    };
    serde_json::to_string_pretty(&scenario).context("serialize scenario stub")
}

fn single_field(name: &str, value: &str) -> Map<String, Value> {
    let mut values = Map::new();
    values.insert(name.to_string(), Value::String(value.to_string()));
    values
}

/// Run `scenario` against a fresh simulated ledger.
pub async fn run_scenario(
    scenario: &Scenario,
    network_id: u64,
    policy: SequencePolicy,
) -> Result<Transcript> {
    validate_scenario(scenario)?;
    let action = scenario.action.as_str();
    if action == CollateralAdd::NAME {
        run_action(CollateralAdd, scenario, network_id, policy).await
    } else if action == CollateralRemove::NAME {
        run_action(CollateralRemove, scenario, network_id, policy).await
    } else if action == BorrowMore::NAME {
        run_action(BorrowMore, scenario, network_id, policy).await
    } else {
        Err(anyhow!("unknown action {action:?}"))
    }
}

async fn run_action<A: Action>(
    action: A,
    scenario: &Scenario,
    network_id: u64,
    policy: SequencePolicy,
) -> Result<Transcript> {
    let ledger = Arc::new(SimLedger::new(scenario.ledger.clone()));
    let client: Arc<dyn LedgerClient> = ledger.clone();
    let accounts = Arc::new(AccountBook::new(client.clone()));
    let notifier = Arc::new(RecordingNotifier::new());
    let slice = Slice::new(action, client, accounts, policy);
    let view = ActionView::new(slice, notifier.clone());

    let identity = Identity::new(
        scenario.network_id.unwrap_or(network_id),
        scenario.signer.as_deref(),
    );
    let started = Instant::now();
    let mut dispatches = Vec::new();
    let mut clicks: Vec<JoinHandle<Option<StepOutcome>>> = Vec::new();
    let mut entries = Vec::new();

    for (index, event) in scenario.events.iter().enumerate() {
        tracing::debug!(index, event = %event.describe(), "scenario event");
        let mut outcome = None;
        let mut error = None;
        match event {
            ScenarioEvent::Mount => dispatches.push(view.mount(&identity, &scenario.subject)),
            ScenarioEvent::Unmount => view.unmount(),
            ScenarioEvent::Set { values, full_reset } => {
                let patched = patch_values::<A>(&view.slice().snapshot().values, values)
                    .with_context(|| format!("event {index}: apply values"))?;
                if *full_reset {
                    dispatches.push(view.slice().set_form_values(
                        &identity,
                        &scenario.subject,
                        |current| *current = patched,
                        true,
                    ));
                } else if let Some(dispatch) = view.update(|current| *current = patched) {
                    dispatches.push(dispatch);
                }
            }
            ScenarioEvent::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
            ScenarioEvent::Click { step, background } => {
                if *background {
                    let view = view.clone();
                    let step = *step;
                    clicks.push(tokio::spawn(async move {
                        match view.click(step).await {
                            Ok(outcome) => outcome,
                            Err(err) => {
                                tracing::warn!(error = %err, "background click rejected");
                                None
                            }
                        }
                    }));
                } else {
                    match view.click(*step).await {
                        Ok(result) => outcome = result,
                        Err(err) => error = Some(err.to_string()),
                    }
                }
            }
        }
        entries.push(TranscriptEntry {
            index,
            at_ms: elapsed_ms(started),
            event: event.describe(),
            steps: view.steps(),
            snapshot: snapshot_json(&view.slice().snapshot())?,
            outcome,
            error,
        });
    }

    for dispatch in dispatches {
        dispatch.settled().await;
    }
    let mut background = Vec::new();
    for click in clicks {
        if let Some(outcome) = click.await.context("join background click")? {
            background.push(outcome);
        }
    }

    Ok(Transcript {
        action: A::NAME.to_string(),
        sequence_policy: policy,
        entries,
        background,
        final_snapshot: snapshot_json(&view.slice().snapshot())?,
        final_steps: view.steps(),
        banner: view.banner(),
        notifications: notifier.events(),
        ledger_calls: ledger.call_log(),
    })
}

/// Overlay `patch` onto `values` through their JSON form.
fn patch_values<A: Action>(values: &A::Values, patch: &Map<String, Value>) -> Result<A::Values> {
    let mut current = serde_json::to_value(values).context("serialize form values")?;
    let Value::Object(fields) = &mut current else {
        return Err(anyhow!("form values are not a JSON object"));
    };
    for (name, value) in patch {
        if !fields.contains_key(name) {
            return Err(anyhow!("unknown field {name:?} for {}", A::NAME));
        }
        fields.insert(name.clone(), value.clone());
    }
    serde_json::from_value(current).context("deserialize form values")
}

fn snapshot_json<V: Serialize>(snapshot: &SliceSnapshot<V>) -> Result<Value> {
    serde_json::to_value(snapshot).context("serialize slice snapshot")
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Human-readable transcript, one line per event.
pub fn render_transcript(transcript: &Transcript, verbose: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "action: {} (policy {})\n",
        transcript.action, transcript.sequence_policy
    ));
    for entry in &transcript.entries {
        out.push_str(&format!(
            "[{:>6}ms] {:<28} {}\n",
            entry.at_ms,
            entry.event,
            render_steps(&entry.steps)
        ));
        if let Some(outcome) = &entry.outcome {
            out.push_str(&format!("           -> {}\n", render_outcome(outcome)));
        }
        if let Some(error) = &entry.error {
            out.push_str(&format!("           !! {error}\n"));
        }
        if verbose {
            out.push_str(&format!("           {}\n", entry.snapshot));
        }
    }
    for outcome in &transcript.background {
        out.push_str(&format!("background -> {}\n", render_outcome(outcome)));
    }
    out.push_str(&format!("final: {}\n", render_steps(&transcript.final_steps)));
    if let Some(banner) = &transcript.banner {
        out.push_str(&format!("banner: {} ({})\n", banner.description, banner.hash));
    }
    if verbose {
        out.push_str(&format!("snapshot: {}\n", transcript.final_snapshot));
        out.push_str(&format!("ledger calls: {}\n", transcript.ledger_calls.join(", ")));
    }
    out
}

fn render_steps(steps: &[Step]) -> String {
    steps
        .iter()
        .map(|step| format!("{}({})", step.id, step.status.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_outcome(outcome: &StepOutcome) -> String {
    match &outcome.error {
        Some(code) => format!("{} failed: {code}", outcome.step),
        None => format!("{} ok, {} tx", outcome.step, outcome.hashes.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub() -> Scenario {
        serde_json::from_str(&scenario_stub().expect("stub")).expect("parse stub")
    }

    #[test]
    fn stub_is_valid() {
        validate_scenario(&stub()).expect("valid stub");
    }

    #[test]
    fn set_before_mount_is_rejected() {
        let mut scenario = stub();
        scenario.events.remove(0);
        let err = validate_scenario(&scenario).expect_err("set before mount");
        assert!(err.to_string().contains("event 0: set before mount"));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let mut scenario = stub();
        scenario.action = "stake".to_string();
        assert!(validate_scenario(&scenario).is_err());
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let values = crate::actions::CollateralAddValues::default();
        let err = patch_values::<CollateralAdd>(&values, &single_field("debt", "1"))
            .expect_err("unknown field");
        assert!(err.to_string().contains("unknown field"));
        let patched = patch_values::<CollateralAdd>(&values, &single_field("collateral", "7"))
            .expect("patch");
        assert_eq!(patched.collateral, "7");
    }

    #[tokio::test(start_paused = true)]
    async fn stub_scenario_completes_with_a_banner() {
        let transcript = run_scenario(&stub(), 1, SequencePolicy::default())
            .await
            .expect("run");
        assert!(transcript
            .entries
            .iter()
            .filter_map(|entry| entry.outcome.as_ref())
            .all(|outcome| outcome.error.is_none()));
        let banner = transcript.banner.expect("banner");
        assert!(banner.description.contains("complete"));
        assert_eq!(transcript.final_snapshot["status"]["phase"], "complete");
        assert_eq!(transcript.final_snapshot["values"]["collateral"], "");
    }
}
