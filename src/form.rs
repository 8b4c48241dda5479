//! Form status and error codes shared by every slice.
//!
//! The status is a closed phase enum plus an optional error carried alongside
//! it. The booleans the view layer historically consumed (`is_approved`,
//! `is_in_progress`, `is_complete`) are projections of the phase, so
//! combinations like "complete while in progress" cannot be represented.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, machine-readable error code (`too-much`, `error-est-gas`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(String);

impl ErrorCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Which stage raised a slice-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Estimation,
    Approval,
    Execute,
}

/// Slice-level error shown in the dismissible banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormError {
    pub code: ErrorCode,
    pub source: ErrorSource,
}

impl FormError {
    pub fn new(code: impl Into<ErrorCode>, source: ErrorSource) -> Self {
        Self {
            code: code.into(),
            source,
        }
    }

    /// Step errors leave the step clickable; estimation errors do not.
    pub fn blocks_submit(&self) -> bool {
        matches!(self.source, ErrorSource::Estimation)
    }
}

/// The two user-clickable stages of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKey {
    Approval,
    Execute,
}

impl StepKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKey::Approval => "approval",
            StepKey::Execute => "execute",
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction phase of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NeedsApproval,
    Approving,
    Approved,
    Executing,
    Complete,
}

/// Exhaustive view of a status for callers that match on one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState {
    NeedsApproval,
    Approved,
    Executing,
    Complete,
    Error(FormError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormStatus {
    pub phase: Phase,
    pub error: Option<FormError>,
    pub warning: Option<ErrorCode>,
}

impl FormStatus {
    /// Fresh status for an action; actions without an approval step start approved.
    pub fn initial(requires_approval: bool) -> Self {
        Self {
            phase: if requires_approval {
                Phase::NeedsApproval
            } else {
                Phase::Approved
            },
            error: None,
            warning: None,
        }
    }

    /// Status after a meaningful value change.
    pub fn reset(&self, requires_approval: bool, full_reset: bool) -> Self {
        let mut next = Self::initial(requires_approval);
        if !full_reset && self.is_approved() {
            next.phase = Phase::Approved;
        }
        next
    }

    /// Step currently running, if any.
    pub fn step(&self) -> Option<StepKey> {
        match self.phase {
            Phase::Approving => Some(StepKey::Approval),
            Phase::Executing => Some(StepKey::Execute),
            Phase::NeedsApproval | Phase::Approved | Phase::Complete => None,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(
            self.phase,
            Phase::Approved | Phase::Executing | Phase::Complete
        )
    }

    pub fn is_in_progress(&self) -> bool {
        self.step().is_some()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.phase, Phase::Complete)
    }

    /// Whether estimation may still move the phase between approval states.
    pub fn is_settled(&self) -> bool {
        matches!(self.phase, Phase::NeedsApproval | Phase::Approved)
    }

    pub fn state(&self) -> ActionState {
        match (&self.error, self.phase) {
            (_, Phase::Approving) | (_, Phase::Executing) => ActionState::Executing,
            (_, Phase::Complete) => ActionState::Complete,
            (Some(error), _) => ActionState::Error(error.clone()),
            (None, Phase::NeedsApproval) => ActionState::NeedsApproval,
            (None, Phase::Approved) => ActionState::Approved,
        }
    }

    pub(crate) fn begin(&mut self, step: StepKey) {
        self.error = None;
        self.phase = match step {
            StepKey::Approval => Phase::Approving,
            StepKey::Execute => Phase::Executing,
        };
    }

    pub(crate) fn approval_settled(&mut self, error: Option<ErrorCode>) {
        match error {
            Some(code) => {
                self.phase = Phase::NeedsApproval;
                self.error = Some(FormError::new(code, ErrorSource::Approval));
            }
            None => {
                self.phase = Phase::Approved;
                self.error = None;
            }
        }
    }

    pub(crate) fn execute_settled(&mut self, error: Option<ErrorCode>) {
        match error {
            Some(code) => {
                self.phase = Phase::Approved;
                self.error = Some(FormError::new(code, ErrorSource::Execute));
            }
            None => {
                self.phase = Phase::Complete;
                self.error = None;
                self.warning = None;
            }
        }
    }

    /// Apply an authorization answer; ignored while a step runs or after completion.
    pub(crate) fn authorization_settled(&mut self, authorized: bool) {
        if !self.is_settled() {
            return;
        }
        self.phase = if authorized {
            Phase::Approved
        } else {
            Phase::NeedsApproval
        };
    }

    /// Record an estimation error unless an earlier one is already shown.
    pub(crate) fn record_estimation_error(&mut self, code: ErrorCode) {
        if self.error.is_none() {
            self.error = Some(FormError::new(code, ErrorSource::Estimation));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_preserves_approval_unless_full_reset() {
        let mut status = FormStatus::initial(true);
        status.approval_settled(None);
        assert!(status.reset(true, false).is_approved());
        assert!(!status.reset(true, true).is_approved());
        assert!(FormStatus::initial(false).reset(false, true).is_approved());
    }

    #[test]
    fn failed_approval_returns_to_needs_approval_with_error() {
        let mut status = FormStatus::initial(true);
        status.begin(StepKey::Approval);
        assert_eq!(status.step(), Some(StepKey::Approval));
        status.approval_settled(Some(ErrorCode::new("user-rejected")));
        assert_eq!(status.phase, Phase::NeedsApproval);
        assert!(!status.is_in_progress());
        assert_eq!(
            status.state(),
            ActionState::Error(FormError::new("user-rejected", ErrorSource::Approval))
        );
    }

    #[test]
    fn failed_execute_keeps_approval() {
        let mut status = FormStatus::initial(true);
        status.approval_settled(None);
        status.begin(StepKey::Execute);
        status.execute_settled(Some(ErrorCode::new("insufficient-balance")));
        assert!(status.is_approved());
        assert!(!status.is_in_progress());
        assert!(!status.is_complete());
        let error = status.error.as_ref().expect("execute error");
        assert!(!error.blocks_submit());
    }

    #[test]
    fn authorization_only_moves_a_settled_phase() {
        let mut status = FormStatus::initial(true);
        status.authorization_settled(true);
        assert_eq!(status.phase, Phase::Approved);
        status.begin(StepKey::Execute);
        status.authorization_settled(false);
        assert_eq!(status.phase, Phase::Executing);
    }

    #[test]
    fn first_estimation_error_wins() {
        let mut status = FormStatus::initial(false);
        status.record_estimation_error(ErrorCode::new("error-est-gas"));
        status.record_estimation_error(ErrorCode::new("error-preview"));
        let error = status.error.expect("estimation error");
        assert_eq!(error.code.as_str(), "error-est-gas");
        assert!(error.blocks_submit());
    }
}
