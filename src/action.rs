//! The per-action parameterization of a slice.
//!
//! A slice is generic over one `Action`: the action names its form fields,
//! the order they enter the keys, the checks each field runs, and the ledger
//! operation its steps submit. Everything else is shared.
use crate::client::OperationRequest;
use crate::key::{Identity, KeyField, SubjectId};
use crate::steps::StepLabels;
use crate::validate::Bounds;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub trait Action: Send + Sync + 'static {
    /// User-entered fields plus their per-field error codes.
    type Values: Clone
        + Default
        + PartialEq
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Short name used in logs and scenario files.
    const NAME: &'static str;
    /// Ledger operation submitted by the execute step.
    const OPERATION: &'static str;
    /// Whether the execute step needs a prior approval transaction.
    const REQUIRES_APPROVAL: bool;
    const LABELS: StepLabels;

    /// Fields of the active key, in key order.
    fn key_fields(&self, values: &Self::Values) -> Vec<KeyField>;

    /// Fields the cost estimate depends on; defaults to the active key's.
    fn cost_fields(&self, values: &Self::Values) -> Vec<KeyField> {
        self.key_fields(values)
    }

    /// Fields the eligibility cap depends on, for actions that have one.
    fn eligibility_fields(&self, _values: &Self::Values) -> Option<Vec<KeyField>> {
        None
    }

    fn clear_errors(&self, values: &mut Self::Values);

    /// Run every field's ordered checks, recording at most one error per field.
    fn validate(&self, values: &mut Self::Values, bounds: &Bounds);

    fn has_field_errors(&self, values: &Self::Values) -> bool;

    /// Minimum viable input for estimation and submission.
    fn has_amount(&self, values: &Self::Values) -> bool;

    /// Parsed amounts sent to the ledger, in field order.
    fn amounts(&self, values: &Self::Values) -> Vec<(&'static str, Decimal)>;

    /// Message shown while the execute step is pending.
    fn pending_message(&self, values: &Self::Values) -> String;

    fn request(
        &self,
        identity: &Identity,
        subject: &SubjectId,
        values: &Self::Values,
    ) -> OperationRequest {
        OperationRequest {
            operation: Self::OPERATION,
            network_id: identity.network_id,
            signer: identity.signer().map(str::to_string),
            subject: subject.clone(),
            amounts: self.amounts(values),
        }
    }
}
