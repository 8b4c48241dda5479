//! Keyed async action pipeline for two-phase on-chain transactions.
//!
//! Each user-facing action (add collateral, borrow more, ...) is a [`Slice`]
//! parameterized by an [`Action`]. The slice derives an active key from the
//! session and form inputs, validates against cached bounds, estimates in the
//! background, and drives the approve → execute steps. Results computed for a
//! key that is no longer current are discarded.
pub mod accounts;
pub mod action;
pub mod actions;
pub mod amount;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod estimate;
pub mod form;
pub mod guard;
pub mod key;
pub mod notify;
pub mod sim;
pub mod simulate;
pub mod slice;
pub mod steps;
pub mod validate;
pub mod view;
pub mod workflow;

pub use accounts::{AccountBook, AccountSnapshot};
pub use action::Action;
pub use cache::{CacheEntry, SequencePolicy};
pub use client::{LedgerClient, LedgerError, ReadModels};
pub use form::{ActionState, ErrorCode, ErrorSource, FormError, FormStatus, Phase, StepKey};
pub use guard::Lifecycle;
pub use key::{derive_key, ActiveKey, Identity, KeyField, SubjectId};
pub use slice::{Dispatch, Slice, SliceError, SliceSnapshot, StepOutcome};
pub use steps::{Step, StepBoard, StepStatus};
pub use view::{ActionView, TxBanner};
