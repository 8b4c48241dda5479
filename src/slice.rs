//! The per-action orchestrator.
//!
//! A `Slice` owns one action's form values, status and caches. Every input
//! change recomputes the keys and dispatches validation plus estimation in
//! the background; each dispatched call carries a [`Ticket`] and its result
//! is applied only while that ticket is still current. Steps submit through
//! the ledger client and mutate state only for the key they were clicked
//! under.
//!
//! State sits behind a plain mutex that is never held across an await.
use crate::accounts::AccountBook;
use crate::action::Action;
use crate::cache::{CacheEntry, KeyedCache, SequencePolicy, Settle};
use crate::client::{LedgerClient, OperationRequest, Preview, ReadModels, TxHash};
use crate::estimate::{estimate_cost, estimate_preview, fetch_eligibility, CostEstimate};
use crate::form::{ErrorCode, FormError, FormStatus, StepKey};
use crate::guard::{Generation, Ticket};
use crate::key::{derive_key, ActiveKey, Identity, SubjectId};
use crate::validate::Bounds;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::task::JoinHandle;

pub const APPROVE_ERROR: &str = "error-step-approve";
pub const EXECUTE_ERROR: &str = "error-api";

/// Misuse of the step API; ledger failures are reported in the outcome instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SliceError {
    #[error("{action}: execute requested before approval")]
    NotApproved { action: &'static str },
    #[error("{action}: {step} step already in progress")]
    StepInProgress {
        action: &'static str,
        step: StepKey,
    },
    #[error("{action}: already complete; change the values to start again")]
    AlreadyComplete { action: &'static str },
}

/// Result of one approve or execute click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    /// Key the step was submitted under.
    pub key: ActiveKey,
    pub step: StepKey,
    pub hashes: Vec<TxHash>,
    pub error: Option<ErrorCode>,
}

/// Read-only copy of a slice's visible state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceSnapshot<V> {
    pub active_key: ActiveKey,
    pub cost_key: ActiveKey,
    pub values: V,
    pub status: FormStatus,
    pub preview: Option<CacheEntry<Preview>>,
    pub cost: Option<CacheEntry<CostEstimate>>,
    pub maximum: Option<CacheEntry<Decimal>>,
}

/// Background validation and estimation started by one input change.
///
/// Dropping the handle detaches the work; it still applies its results.
#[derive(Debug)]
pub struct Dispatch {
    task: JoinHandle<()>,
}

impl Dispatch {
    /// Wait until every call of this dispatch has resolved.
    pub async fn settled(self) {
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "dispatch task failed");
        }
    }
}

struct SliceState<V> {
    active_key: ActiveKey,
    cost_key: ActiveKey,
    /// Keys shown before the last key change; their values fill placeholders.
    previous_key: Option<ActiveKey>,
    previous_cost_key: Option<ActiveKey>,
    eligibility_key: Option<ActiveKey>,
    identity: Option<Identity>,
    subject: Option<SubjectId>,
    values: V,
    status: FormStatus,
    preview: KeyedCache<Preview>,
    cost: KeyedCache<CostEstimate>,
    eligibility: KeyedCache<Decimal>,
}

impl<V: Default> SliceState<V> {
    fn new(requires_approval: bool) -> Self {
        Self {
            active_key: ActiveKey::default(),
            cost_key: ActiveKey::default(),
            previous_key: None,
            previous_cost_key: None,
            eligibility_key: None,
            identity: None,
            subject: None,
            values: V::default(),
            status: FormStatus::initial(requires_approval),
            preview: KeyedCache::default(),
            cost: KeyedCache::default(),
            eligibility: KeyedCache::default(),
        }
    }
}

struct Inner<A: Action> {
    action: A,
    client: Arc<dyn LedgerClient>,
    accounts: Arc<AccountBook>,
    read_models: Arc<dyn ReadModels>,
    policy: SequencePolicy,
    generation: Generation,
    next_seq: AtomicU64,
    state: Mutex<SliceState<A::Values>>,
}

pub struct Slice<A: Action> {
    inner: Arc<Inner<A>>,
}

impl<A: Action> Clone for Slice<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Action> Slice<A> {
    /// Build a slice whose read-model refreshes go to `accounts`.
    pub fn new(
        action: A,
        client: Arc<dyn LedgerClient>,
        accounts: Arc<AccountBook>,
        policy: SequencePolicy,
    ) -> Self {
        let read_models: Arc<dyn ReadModels> = accounts.clone();
        Self::with_read_models(action, client, accounts, read_models, policy)
    }

    pub fn with_read_models(
        action: A,
        client: Arc<dyn LedgerClient>,
        accounts: Arc<AccountBook>,
        read_models: Arc<dyn ReadModels>,
        policy: SequencePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                action,
                client,
                accounts,
                read_models,
                policy,
                generation: Generation::default(),
                next_seq: AtomicU64::new(0),
                state: Mutex::new(SliceState::new(A::REQUIRES_APPROVAL)),
            }),
        }
    }

    pub fn action(&self) -> &A {
        &self.inner.action
    }

    /// Apply `update` to the form values and dispatch validation and estimation.
    ///
    /// Field errors are cleared first. The status resets, keeping a granted
    /// approval unless `full_reset` is set.
    pub fn set_form_values(
        &self,
        identity: &Identity,
        subject: &SubjectId,
        update: impl FnOnce(&mut A::Values),
        full_reset: bool,
    ) -> Dispatch {
        let inner = &self.inner;
        let (ticket, values) = {
            let mut state = inner.state();
            let mut values = state.values.clone();
            update(&mut values);
            inner.action.clear_errors(&mut values);
            let active_key = derive_key(
                Some(identity),
                Some(subject),
                &inner.action.key_fields(&values),
            );
            if active_key != state.active_key {
                let previous = std::mem::replace(&mut state.active_key, active_key);
                state.previous_key = Some(previous);
            }
            let cost_key = derive_key(
                Some(identity),
                Some(subject),
                &inner.action.cost_fields(&values),
            );
            if cost_key != state.cost_key {
                let previous = std::mem::replace(&mut state.cost_key, cost_key);
                state.previous_cost_key = Some(previous);
            }
            state.eligibility_key = inner
                .action
                .eligibility_fields(&values)
                .map(|fields| derive_key(Some(identity), Some(subject), &fields));
            state.identity = Some(identity.clone());
            state.subject = Some(subject.clone());
            state.status = state.status.reset(A::REQUIRES_APPROVAL, full_reset);
            state.values = values.clone();
            (inner.ticket(&state.active_key), values)
        };
        tracing::debug!(
            action = A::NAME,
            key = %ticket.key,
            seq = ticket.seq,
            full_reset,
            "form values set"
        );
        self.dispatch(ticket, identity.clone(), subject.clone(), values, false)
    }

    /// Submit the approval transaction for the values shown under `key`.
    ///
    /// Returns `Ok(None)` without a signer. On success under the current key
    /// the estimation is dispatched again so the cost reflects the approval.
    pub async fn fetch_step_approve(
        &self,
        key: &ActiveKey,
        identity: &Identity,
        subject: &SubjectId,
        values: &A::Values,
    ) -> Result<Option<StepOutcome>, SliceError> {
        if identity.is_read_only() {
            return Ok(None);
        }
        let inner = &self.inner;
        let generation = inner.begin_step(key, StepKey::Approval)?;
        let request = inner.action.request(identity, subject, values);
        tracing::info!(action = A::NAME, key = %key, "submitting approval");
        let (hashes, error) = inner.approve(&request).await;

        let redispatch = {
            let mut state = inner.state();
            let current = inner.generation.current() == generation && &state.active_key == key;
            if current {
                state.status.approval_settled(error.clone());
            }
            (current && error.is_none()).then(|| (inner.ticket(key), state.values.clone()))
        };
        if let Some((ticket, values)) = redispatch {
            drop(self.dispatch(ticket, identity.clone(), subject.clone(), values, true));
        }
        Ok(Some(StepOutcome {
            key: key.clone(),
            step: StepKey::Approval,
            hashes,
            error,
        }))
    }

    /// Submit the action transaction for the values shown under `key`.
    ///
    /// The read models are refreshed after every success. If `key` is still
    /// current the caches are dropped and the values return to their defaults;
    /// the slice then stays complete until the next edit. Otherwise the cached
    /// caps predate the transaction, so the current values are validated and
    /// estimated again once the refresh lands.
    pub async fn fetch_step_execute(
        &self,
        key: &ActiveKey,
        identity: &Identity,
        subject: &SubjectId,
        values: &A::Values,
    ) -> Result<Option<StepOutcome>, SliceError> {
        if identity.is_read_only() {
            return Ok(None);
        }
        let inner = &self.inner;
        let generation = inner.begin_step(key, StepKey::Execute)?;
        let request = inner.action.request(identity, subject, values);
        tracing::info!(action = A::NAME, key = %key, "submitting action");
        let (hashes, error) = inner.execute(&request).await;
        let refresh = error
            .is_none()
            .then(|| inner.refresh_read_models(identity, subject));

        let revalidate = {
            let mut state = inner.state();
            if inner.generation.current() != generation {
                false
            } else if &state.active_key == key {
                if error.is_none() {
                    state.preview.clear_all();
                    state.cost.clear_all();
                    state.eligibility.clear_all();
                    state.values = A::Values::default();
                }
                state.status.execute_settled(error.clone());
                false
            } else {
                if error.is_none() {
                    state.eligibility.clear_all();
                }
                error.is_none()
            }
        };
        if let Some(refresh) = refresh.filter(|_| revalidate) {
            self.revalidate_after(refresh);
        }
        Ok(Some(StepOutcome {
            key: key.clone(),
            step: StepKey::Execute,
            hashes,
            error,
        }))
    }

    /// Restore the initial state; results of earlier dispatches are discarded.
    pub fn reset_state(&self) {
        let mut state = self.inner.state();
        *state = SliceState::new(A::REQUIRES_APPROVAL);
        let generation = self.inner.generation.bump();
        tracing::debug!(action = A::NAME, generation, "slice reset");
    }

    pub fn active_key(&self) -> ActiveKey {
        self.inner.state().active_key.clone()
    }

    pub fn snapshot(&self) -> SliceSnapshot<A::Values> {
        let state = self.inner.state();
        SliceSnapshot {
            active_key: state.active_key.clone(),
            cost_key: state.cost_key.clone(),
            values: state.values.clone(),
            status: state.status.clone(),
            preview: state.preview.get(&state.active_key).cloned(),
            cost: state.cost.get(&state.cost_key).cloned(),
            maximum: state
                .eligibility_key
                .as_ref()
                .and_then(|key| state.eligibility.get(key))
                .cloned(),
        }
    }

    /// Whether the current values may be submitted.
    ///
    /// Step errors do not count against this; estimation errors do.
    pub fn steps_ready(&self) -> bool {
        let state = self.inner.state();
        let action = &self.inner.action;
        state
            .identity
            .as_ref()
            .is_some_and(|identity| !identity.is_read_only())
            && action.has_amount(&state.values)
            && !action.has_field_errors(&state.values)
            && !state
                .status
                .error
                .as_ref()
                .is_some_and(FormError::blocks_submit)
    }

    /// Run the pipeline again for the current values once `refresh` is done.
    fn revalidate_after(&self, refresh: JoinHandle<()>) {
        let slice = self.clone();
        tokio::spawn(async move {
            if let Err(err) = refresh.await {
                tracing::warn!(action = A::NAME, error = %err, "read model refresh failed");
            }
            let current = {
                let state = slice.inner.state();
                match (&state.identity, &state.subject) {
                    (Some(identity), Some(subject)) => Some((
                        slice.inner.ticket(&state.active_key),
                        identity.clone(),
                        subject.clone(),
                        state.values.clone(),
                    )),
                    _ => None,
                }
            };
            if let Some((ticket, identity, subject, values)) = current {
                tracing::debug!(action = A::NAME, key = %ticket.key, "revalidating after settled action");
                slice
                    .dispatch(ticket, identity, subject, values, false)
                    .settled()
                    .await;
            }
        });
    }

    fn dispatch(
        &self,
        ticket: Ticket,
        identity: Identity,
        subject: SubjectId,
        values: A::Values,
        refetch_cost: bool,
    ) -> Dispatch {
        let inner = Arc::clone(&self.inner);
        Dispatch {
            task: tokio::spawn(async move {
                inner
                    .run_pipeline(ticket, identity, subject, values, refetch_cost)
                    .await;
            }),
        }
    }
}

impl<A: Action> Inner<A> {
    fn state(&self) -> MutexGuard<'_, SliceState<A::Values>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ticket(&self, key: &ActiveKey) -> Ticket {
        Ticket {
            key: key.clone(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst) + 1,
            generation: self.generation.current(),
        }
    }

    fn is_current(&self, state: &SliceState<A::Values>, ticket: &Ticket) -> bool {
        ticket.is_current(&state.active_key, self.generation.current())
    }

    fn begin_step(&self, key: &ActiveKey, step: StepKey) -> Result<u64, SliceError> {
        let mut state = self.state();
        if let Some(running) = state.status.step() {
            return Err(SliceError::StepInProgress {
                action: A::NAME,
                step: running,
            });
        }
        if state.status.is_complete() {
            return Err(SliceError::AlreadyComplete { action: A::NAME });
        }
        if step == StepKey::Execute && !state.status.is_approved() {
            return Err(SliceError::NotApproved { action: A::NAME });
        }
        if &state.active_key == key {
            state.status.begin(step);
        }
        Ok(self.generation.current())
    }

    async fn run_pipeline(
        self: Arc<Self>,
        ticket: Ticket,
        identity: Identity,
        subject: SubjectId,
        mut values: A::Values,
        refetch_cost: bool,
    ) {
        if !identity.is_read_only() {
            let bounds = self.bounds(&ticket, &identity, &subject, &values).await;
            self.action.validate(&mut values, &bounds);
            let mut state = self.state();
            if !self.is_current(&state, &ticket) {
                tracing::debug!(action = A::NAME, key = %ticket.key, "discarding stale validation");
                return;
            }
            state.values = values.clone();
        }

        if self.action.has_field_errors(&values) || !self.action.has_amount(&values) {
            let mut state = self.state();
            if self.is_current(&state, &ticket) {
                let (active_key, cost_key) = (state.active_key.clone(), state.cost_key.clone());
                state.preview.clear(&active_key);
                state.cost.clear(&cost_key);
            }
            return;
        }

        let request = self.action.request(&identity, &subject, &values);
        let mut tasks = Vec::new();
        if !identity.is_read_only() {
            tasks.extend(self.spawn_cost(&ticket, &request, refetch_cost));
        }
        tasks.extend(self.spawn_preview(&ticket, request));
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(action = A::NAME, error = %err, "estimation task failed");
            }
        }
    }

    async fn bounds(
        &self,
        ticket: &Ticket,
        identity: &Identity,
        subject: &SubjectId,
        values: &A::Values,
    ) -> Bounds {
        let mut bounds = Bounds::default();
        match self.accounts.fetch(identity, subject, false).await {
            Ok(Some(snapshot)) => {
                bounds.wallet_collateral = Some(snapshot.wallet.collateral);
                bounds.wallet_borrowed = Some(snapshot.wallet.borrowed);
                bounds.position_collateral = Some(snapshot.position.collateral);
                bounds.position_debt = Some(snapshot.position.debt);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(action = A::NAME, subject = %subject, error = %err, "account fetch failed");
            }
        }
        if let Some(fields) = self.action.eligibility_fields(values) {
            let key = derive_key(Some(identity), Some(subject), &fields);
            bounds.maximum = self
                .eligibility(ticket, &key, identity, subject, values)
                .await;
        }
        bounds
    }

    async fn eligibility(
        &self,
        ticket: &Ticket,
        key: &ActiveKey,
        identity: &Identity,
        subject: &SubjectId,
        values: &A::Values,
    ) -> Option<Decimal> {
        {
            let mut state = self.state();
            if let Some(maximum) = state.eligibility.get(key).and_then(CacheEntry::ready) {
                return Some(*maximum);
            }
            state.eligibility.begin(key, ticket.seq, None);
        }
        let request = self.action.request(identity, subject, values);
        let result = fetch_eligibility(self.client.as_ref(), &request).await;

        let mut state = self.state();
        if ticket.generation != self.generation.current() {
            return result.ok();
        }
        let entry = match &result {
            Ok(maximum) => CacheEntry::Ready(*maximum),
            Err(code) => CacheEntry::Failed(code.clone()),
        };
        state.eligibility.settle(key, ticket.seq, entry, self.policy);
        match result {
            Ok(maximum) => Some(maximum),
            Err(code) => {
                if self.is_current(&state, ticket) {
                    state.status.record_estimation_error(code);
                }
                None
            }
        }
    }

    fn spawn_cost(
        self: &Arc<Self>,
        ticket: &Ticket,
        request: &OperationRequest,
        refetch: bool,
    ) -> Option<JoinHandle<()>> {
        let cost_ticket = {
            let mut state = self.state();
            if !self.is_current(&state, ticket) {
                return None;
            }
            let cost_key = state.cost_key.clone();
            if !refetch {
                if let Some(estimate) = state.cost.get(&cost_key).and_then(CacheEntry::ready) {
                    let authorized = estimate.authorized;
                    if A::REQUIRES_APPROVAL {
                        state.status.authorization_settled(authorized);
                    }
                    tracing::debug!(action = A::NAME, key = %cost_key, "reusing cost estimate");
                    return None;
                }
            }
            let previous = state.previous_cost_key.clone();
            state.cost.begin(&cost_key, ticket.seq, previous.as_ref());
            Ticket {
                key: cost_key,
                seq: ticket.seq,
                generation: ticket.generation,
            }
        };
        let inner = Arc::clone(self);
        let request = request.clone();
        Some(tokio::spawn(async move {
            let result =
                estimate_cost(inner.client.as_ref(), &request, A::REQUIRES_APPROVAL).await;
            inner.apply_cost(&cost_ticket, result);
        }))
    }

    fn apply_cost(&self, ticket: &Ticket, result: Result<CostEstimate, ErrorCode>) {
        let mut state = self.state();
        if ticket.generation != self.generation.current() || ticket.key != state.cost_key {
            tracing::debug!(action = A::NAME, key = %ticket.key, seq = ticket.seq, "discarding stale cost");
            return;
        }
        let entry = match &result {
            Ok(estimate) => CacheEntry::Ready(estimate.clone()),
            Err(code) => CacheEntry::Failed(code.clone()),
        };
        let settled = state.cost.settle(&ticket.key, ticket.seq, entry, self.policy);
        if settled != Settle::Applied {
            tracing::debug!(action = A::NAME, key = %ticket.key, seq = ticket.seq, ?settled, "cost not applied");
            return;
        }
        match result {
            Ok(estimate) => {
                if A::REQUIRES_APPROVAL {
                    state.status.authorization_settled(estimate.authorized);
                }
            }
            Err(code) => {
                tracing::warn!(action = A::NAME, key = %ticket.key, code = %code, "cost estimate failed");
                state.status.record_estimation_error(code);
            }
        }
    }

    fn spawn_preview(
        self: &Arc<Self>,
        ticket: &Ticket,
        request: OperationRequest,
    ) -> Option<JoinHandle<()>> {
        {
            let mut state = self.state();
            if !self.is_current(&state, ticket) {
                return None;
            }
            let previous = state.previous_key.clone();
            state.preview.begin(&ticket.key, ticket.seq, previous.as_ref());
        }
        let inner = Arc::clone(self);
        let ticket = ticket.clone();
        Some(tokio::spawn(async move {
            let result = estimate_preview(inner.client.as_ref(), &request).await;
            inner.apply_preview(&ticket, result);
        }))
    }

    fn apply_preview(&self, ticket: &Ticket, result: Result<Preview, ErrorCode>) {
        let mut state = self.state();
        if !self.is_current(&state, ticket) {
            tracing::debug!(action = A::NAME, key = %ticket.key, seq = ticket.seq, "discarding stale preview");
            return;
        }
        let entry = match &result {
            Ok(preview) => CacheEntry::Ready(preview.clone()),
            Err(code) => CacheEntry::Failed(code.clone()),
        };
        let settled = state
            .preview
            .settle(&ticket.key, ticket.seq, entry, self.policy);
        if settled != Settle::Applied {
            tracing::debug!(action = A::NAME, key = %ticket.key, seq = ticket.seq, ?settled, "preview not applied");
            return;
        }
        match result {
            Ok(preview) => state.status.warning = preview.warning,
            Err(code) => {
                tracing::warn!(action = A::NAME, key = %ticket.key, code = %code, "preview failed");
                state.status.record_estimation_error(code);
            }
        }
    }

    async fn approve(&self, request: &OperationRequest) -> (Vec<TxHash>, Option<ErrorCode>) {
        let hashes = match self.client.submit_approval(request).await {
            Ok(hashes) => hashes,
            Err(err) => {
                tracing::warn!(action = A::NAME, error = %err, "approval rejected");
                return (Vec::new(), Some(err.code(APPROVE_ERROR)));
            }
        };
        for hash in &hashes {
            if let Err(err) = self.client.wait_for_settlement(hash).await {
                tracing::warn!(action = A::NAME, hash = %hash, error = %err, "approval failed to settle");
                return (hashes.clone(), Some(err.code(APPROVE_ERROR)));
            }
        }
        tracing::info!(action = A::NAME, count = hashes.len(), "approval settled");
        (hashes, None)
    }

    async fn execute(&self, request: &OperationRequest) -> (Vec<TxHash>, Option<ErrorCode>) {
        let hash = match self.client.submit_action(request).await {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!(action = A::NAME, error = %err, "action rejected");
                return (Vec::new(), Some(err.code(EXECUTE_ERROR)));
            }
        };
        match self.client.wait_for_settlement(&hash).await {
            Ok(receipt) => {
                tracing::info!(action = A::NAME, hash = %hash, block = receipt.block, "action settled");
                (vec![hash], None)
            }
            Err(err) => {
                tracing::warn!(action = A::NAME, hash = %hash, error = %err, "action failed to settle");
                let code = err.code(EXECUTE_ERROR);
                (vec![hash], Some(code))
            }
        }
    }

    fn refresh_read_models(&self, identity: &Identity, subject: &SubjectId) -> JoinHandle<()> {
        let read_models = Arc::clone(&self.read_models);
        let identity = identity.clone();
        let subject = subject.clone();
        tokio::spawn(async move {
            read_models.refresh_balances(&identity, &subject).await;
            read_models.refresh_subject(&identity, &subject).await;
        })
    }
}

#[cfg(test)]
#[path = "slice_tests.rs"]
mod tests;
