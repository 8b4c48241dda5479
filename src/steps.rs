//! User-actionable steps derived from a slice's status.
//!
//! Steps are never stored by the slice. The board only remembers which step
//! keys it showed last so that an in-flight or completed transaction keeps
//! its original list after the approval flag flips.
use crate::form::{FormStatus, StepKey};
use serde::Serialize;

/// Identifier of the approval step shared by every action.
pub const APPROVAL_STEP_ID: &str = "APPROVAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    Current,
    InProgress,
    Succeeded,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Current => "current",
            StepStatus::InProgress => "in-progress",
            StepStatus::Succeeded => "succeeded",
        }
    }
}

/// Status of one step: done wins over running, running over submittable.
pub fn step_status(is_complete: bool, is_in_progress: bool, is_valid: bool) -> StepStatus {
    if is_complete {
        StepStatus::Succeeded
    } else if is_in_progress {
        StepStatus::InProgress
    } else if is_valid {
        StepStatus::Current
    } else {
        StepStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub key: StepKey,
    pub id: &'static str,
    pub status: StepStatus,
    pub label: String,
}

/// Per-action step naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLabels {
    pub approval: &'static str,
    pub execute_id: &'static str,
    pub execute: &'static str,
}

/// Build the ordered step list for `status`.
///
/// `ready` is the slice's submittability; `previous` is the list shown
/// before, replayed verbatim while a step is in flight or after completion.
pub fn derive_steps(
    labels: &StepLabels,
    status: &FormStatus,
    ready: bool,
    previous: &[StepKey],
) -> Vec<Step> {
    let keys: Vec<StepKey> = if (status.is_in_progress() || status.is_complete())
        && !previous.is_empty()
    {
        previous.to_vec()
    } else if status.is_approved() {
        vec![StepKey::Execute]
    } else {
        vec![StepKey::Approval, StepKey::Execute]
    };
    let running = status.step();
    keys.into_iter()
        .map(|key| match key {
            StepKey::Approval => Step {
                key,
                id: APPROVAL_STEP_ID,
                status: step_status(
                    status.is_approved(),
                    running == Some(StepKey::Approval),
                    ready,
                ),
                label: labels.approval.to_string(),
            },
            StepKey::Execute => Step {
                key,
                id: labels.execute_id,
                status: step_status(
                    status.is_complete(),
                    running == Some(StepKey::Execute),
                    ready && status.is_approved(),
                ),
                label: labels.execute.to_string(),
            },
        })
        .collect()
}

/// Remembers the last shown step keys for replay.
#[derive(Debug, Clone, Default)]
pub struct StepBoard {
    previous: Vec<StepKey>,
}

impl StepBoard {
    pub fn update(&mut self, labels: &StepLabels, status: &FormStatus, ready: bool) -> Vec<Step> {
        let steps = derive_steps(labels, status, ready, &self.previous);
        self.previous = steps.iter().map(|step| step.key).collect();
        steps
    }

    pub fn clear(&mut self) {
        self.previous.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::ErrorCode;

    const LABELS: StepLabels = StepLabels {
        approval: "Approve Spending",
        execute_id: "ADD",
        execute: "Add Collateral",
    };

    fn statuses(steps: &[Step]) -> Vec<(StepKey, StepStatus)> {
        steps.iter().map(|step| (step.key, step.status)).collect()
    }

    #[test]
    fn unapproved_action_lists_both_steps() {
        let status = FormStatus::initial(true);
        let steps = derive_steps(&LABELS, &status, true, &[]);
        assert_eq!(
            statuses(&steps),
            vec![
                (StepKey::Approval, StepStatus::Current),
                (StepKey::Execute, StepStatus::Pending),
            ]
        );
        assert_eq!(steps[1].id, "ADD");
    }

    #[test]
    fn approved_action_lists_only_execute() {
        let mut status = FormStatus::initial(true);
        status.approval_settled(None);
        let steps = derive_steps(&LABELS, &status, true, &[]);
        assert_eq!(statuses(&steps), vec![(StepKey::Execute, StepStatus::Current)]);
        let steps = derive_steps(&LABELS, &status, false, &[]);
        assert_eq!(statuses(&steps), vec![(StepKey::Execute, StepStatus::Pending)]);
    }

    #[test]
    fn in_flight_execute_replays_previous_list() {
        let mut board = StepBoard::default();
        let mut status = FormStatus::initial(true);
        board.update(&LABELS, &status, true);
        status.begin(StepKey::Approval);
        let steps = board.update(&LABELS, &status, true);
        assert_eq!(steps[0].status, StepStatus::InProgress);
        status.approval_settled(None);
        status.begin(StepKey::Execute);
        let steps = board.update(&LABELS, &status, true);
        assert_eq!(
            statuses(&steps),
            vec![
                (StepKey::Approval, StepStatus::Succeeded),
                (StepKey::Execute, StepStatus::InProgress),
            ]
        );
        status.execute_settled(None);
        let steps = board.update(&LABELS, &status, true);
        assert_eq!(
            statuses(&steps),
            vec![
                (StepKey::Approval, StepStatus::Succeeded),
                (StepKey::Execute, StepStatus::Succeeded),
            ]
        );
    }

    #[test]
    fn failed_execute_stays_clickable() {
        let mut status = FormStatus::initial(false);
        status.begin(StepKey::Execute);
        status.execute_settled(Some(ErrorCode::new("insufficient-balance")));
        let steps = derive_steps(&LABELS, &status, true, &[StepKey::Execute]);
        assert_eq!(statuses(&steps), vec![(StepKey::Execute, StepStatus::Current)]);
    }
}
