//! Keyed result cache for one slice.
//!
//! Every dispatch for a key takes a fresh sequence number and leaves a
//! `Loading` placeholder behind, carrying the last value shown so a view does
//! not blank out while the new one resolves. A response settles the slot only if the
//! policy accepts its sequence number; with `HighestSequence` a slow response
//! for the same key can no longer overwrite a newer one.
use crate::form::ErrorCode;
use crate::key::ActiveKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How same-key responses that resolve out of order are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SequencePolicy {
    /// Only the latest dispatch for a key may settle it.
    #[default]
    HighestSequence,
    /// Whichever response for the current key resolves last wins.
    LastResolved,
}

impl SequencePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequencePolicy::HighestSequence => "highest-sequence",
            SequencePolicy::LastResolved => "last-resolved",
        }
    }
}

impl fmt::Display for SequencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visible state of one cached result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum CacheEntry<T> {
    /// In flight; holds the value shown before, if any.
    Loading(Option<T>),
    Ready(T),
    Failed(ErrorCode),
}

impl<T> CacheEntry<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, CacheEntry::Loading(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            CacheEntry::Ready(value) => Some(value),
            CacheEntry::Loading(_) | CacheEntry::Failed(_) => None,
        }
    }

    /// Value to display: the settled one, or the one carried while loading.
    pub fn shown(&self) -> Option<&T> {
        match self {
            CacheEntry::Ready(value) | CacheEntry::Loading(Some(value)) => Some(value),
            CacheEntry::Loading(None) | CacheEntry::Failed(_) => None,
        }
    }
}

/// Result of trying to settle a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    Applied,
    /// A newer dispatch for the same key is outstanding or already settled.
    Superseded,
    /// The slot was cleared since the dispatch.
    Cleared,
}

#[derive(Debug, Clone)]
struct Slot<T> {
    seq: u64,
    entry: CacheEntry<T>,
}

#[derive(Debug, Clone)]
pub struct KeyedCache<T> {
    slots: BTreeMap<ActiveKey, Slot<T>>,
}

impl<T> Default for KeyedCache<T> {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }
}

impl<T: Clone> KeyedCache<T> {
    /// Mark `key` as loading under dispatch `seq`.
    ///
    /// The placeholder carries the value shown for `key`, falling back to the
    /// one shown for `previous`.
    pub fn begin(&mut self, key: &ActiveKey, seq: u64, previous: Option<&ActiveKey>) {
        let carried = [Some(key), previous]
            .into_iter()
            .flatten()
            .find_map(|shown| self.get(shown).and_then(CacheEntry::shown))
            .cloned();
        self.slots.insert(
            key.clone(),
            Slot {
                seq,
                entry: CacheEntry::Loading(carried),
            },
        );
    }

    /// Settle `key` with the response of dispatch `seq`.
    pub fn settle(
        &mut self,
        key: &ActiveKey,
        seq: u64,
        entry: CacheEntry<T>,
        policy: SequencePolicy,
    ) -> Settle {
        let Some(slot) = self.slots.get_mut(key) else {
            return Settle::Cleared;
        };
        match policy {
            SequencePolicy::HighestSequence if slot.seq != seq => Settle::Superseded,
            SequencePolicy::HighestSequence | SequencePolicy::LastResolved => {
                slot.entry = entry;
                Settle::Applied
            }
        }
    }

    pub fn get(&self, key: &ActiveKey) -> Option<&CacheEntry<T>> {
        self.slots.get(key).map(|slot| &slot.entry)
    }

    /// Drop `key` back to idle.
    pub fn clear(&mut self, key: &ActiveKey) {
        self.slots.remove(key);
    }

    pub fn clear_all(&mut self) {
        self.slots.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
