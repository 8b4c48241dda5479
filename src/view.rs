//! Consumer-side binding of a slice.
//!
//! The view owns the lifecycle flag, the step board used for replay, and the
//! transaction banner. Visible follow-ups of a click (banner, error toast)
//! happen only while the view is mounted and only when the outcome's key is
//! still the slice's current key. The pending toast is always dismissed.
use crate::action::Action;
use crate::client::TxHash;
use crate::form::StepKey;
use crate::guard::Lifecycle;
use crate::key::{ActiveKey, Identity, SubjectId};
use crate::notify::{NotifyLevel, Notifier};
use crate::slice::{Dispatch, Slice, SliceError, StepOutcome};
use crate::steps::{Step, StepBoard};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

const APPROVAL_PENDING: &str = "Please approve spending";

/// Success banner of the last executed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxBanner {
    pub key: ActiveKey,
    pub hash: TxHash,
    pub description: String,
}

#[derive(Debug, Clone)]
struct Context {
    identity: Identity,
    subject: SubjectId,
}

pub struct ActionView<A: Action> {
    slice: Slice<A>,
    notifier: Arc<dyn Notifier>,
    lifecycle: Lifecycle,
    context: Arc<Mutex<Option<Context>>>,
    board: Arc<Mutex<StepBoard>>,
    banner: Arc<Mutex<Option<TxBanner>>>,
}

impl<A: Action> Clone for ActionView<A> {
    fn clone(&self) -> Self {
        Self {
            slice: self.slice.clone(),
            notifier: Arc::clone(&self.notifier),
            lifecycle: self.lifecycle.clone(),
            context: Arc::clone(&self.context),
            board: Arc::clone(&self.board),
            banner: Arc::clone(&self.banner),
        }
    }
}

impl<A: Action> ActionView<A> {
    pub fn new(slice: Slice<A>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            slice,
            notifier,
            lifecycle: Lifecycle::new(),
            context: Arc::new(Mutex::new(None)),
            board: Arc::new(Mutex::new(StepBoard::default())),
            banner: Arc::new(Mutex::new(None)),
        }
    }

    pub fn slice(&self) -> &Slice<A> {
        &self.slice
    }

    pub fn is_mounted(&self) -> bool {
        self.lifecycle.is_active()
    }

    /// Mount for `identity` in `subject`, starting from empty values.
    pub fn mount(&self, identity: &Identity, subject: &SubjectId) -> Dispatch {
        self.lifecycle.activate();
        *lock(&self.context) = Some(Context {
            identity: identity.clone(),
            subject: subject.clone(),
        });
        lock(&self.board).clear();
        *lock(&self.banner) = None;
        tracing::debug!(action = A::NAME, subject = %subject, "view mounted");
        self.slice
            .set_form_values(identity, subject, |values| *values = A::Values::default(), true)
    }

    /// Tear down; in-flight work keeps running but has no visible effect.
    pub fn unmount(&self) {
        self.lifecycle.teardown();
        self.slice.reset_state();
        lock(&self.board).clear();
        tracing::debug!(action = A::NAME, "view unmounted");
    }

    /// Apply a user edit. `None` when the view is not mounted.
    pub fn update(&self, update: impl FnOnce(&mut A::Values)) -> Option<Dispatch> {
        let context = self.mounted_context()?;
        *lock(&self.banner) = None;
        Some(
            self.slice
                .set_form_values(&context.identity, &context.subject, update, false),
        )
    }

    /// Current step list, replaying the previous one while a step runs.
    pub fn steps(&self) -> Vec<Step> {
        let status = self.slice.snapshot().status;
        let ready = self.slice.steps_ready();
        lock(&self.board).update(&A::LABELS, &status, ready)
    }

    pub fn banner(&self) -> Option<TxBanner> {
        lock(&self.banner).clone()
    }

    /// Run `step` for the values currently shown.
    pub async fn click(&self, step: StepKey) -> Result<Option<StepOutcome>, SliceError> {
        let Some(context) = self.mounted_context() else {
            return Ok(None);
        };
        let snapshot = self.slice.snapshot();
        let message = match step {
            StepKey::Approval => APPROVAL_PENDING.to_string(),
            StepKey::Execute => self.slice.action().pending_message(&snapshot.values),
        };
        let pending = self.notifier.notify(NotifyLevel::Pending, &message);
        let (identity, subject) = (&context.identity, &context.subject);
        let result = match step {
            StepKey::Approval => {
                self.slice
                    .fetch_step_approve(&snapshot.active_key, identity, subject, &snapshot.values)
                    .await
            }
            StepKey::Execute => {
                self.slice
                    .fetch_step_execute(&snapshot.active_key, identity, subject, &snapshot.values)
                    .await
            }
        };
        self.notifier.dismiss(pending);

        if let Ok(Some(outcome)) = &result {
            self.follow_up(outcome);
        }
        result
    }

    fn follow_up(&self, outcome: &StepOutcome) {
        if !self.lifecycle.is_active() {
            tracing::debug!(action = A::NAME, key = %outcome.key, "view gone, outcome not shown");
            return;
        }
        if outcome.key != self.slice.active_key() {
            tracing::debug!(action = A::NAME, key = %outcome.key, "outcome for a stale key");
            return;
        }
        match (&outcome.error, outcome.step) {
            (Some(code), _) => {
                self.notifier.notify(NotifyLevel::Error, code.as_str());
            }
            (None, StepKey::Execute) => {
                let Some(hash) = outcome.hashes.last() else {
                    return;
                };
                *lock(&self.banner) = Some(TxBanner {
                    key: outcome.key.clone(),
                    hash: hash.clone(),
                    description: format!("{} complete", A::LABELS.execute),
                });
            }
            (None, StepKey::Approval) => {}
        }
    }

    fn mounted_context(&self) -> Option<Context> {
        if !self.lifecycle.is_active() {
            return None;
        }
        lock(&self.context).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
