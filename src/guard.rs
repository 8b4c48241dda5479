//! Lifecycle guard and dispatch generations.
//!
//! Neither stops in-flight work. The lifecycle flag suppresses visible effects
//! once the consuming view is gone; the generation makes every result that
//! was dispatched before a reset unappliable.
use crate::key::ActiveKey;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Mounted flag shared between a view and the callbacks it spawns.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    mounted: Arc<AtomicBool>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self) {
        self.mounted.store(true, Ordering::SeqCst);
    }

    pub fn teardown(&self) {
        self.mounted.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }
}

/// Monotonic counter bumped on every slice reset.
#[derive(Debug, Default)]
pub struct Generation(AtomicU64);

impl Generation {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Identity of one dispatched async call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub key: ActiveKey,
    pub seq: u64,
    pub generation: u64,
}

impl Ticket {
    /// Whether a result for this ticket may still be applied.
    pub fn is_current(&self, key: &ActiveKey, generation: u64) -> bool {
        self.generation == generation && &self.key == key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{derive_key, KeyField};

    #[test]
    fn lifecycle_clones_share_the_flag() {
        let guard = Lifecycle::new();
        let callback_view = guard.clone();
        assert!(!callback_view.is_active());
        guard.activate();
        assert!(callback_view.is_active());
        guard.teardown();
        assert!(!callback_view.is_active());
    }

    #[test]
    fn ticket_goes_stale_on_key_change_or_reset() {
        let generation = Generation::default();
        let key = derive_key(None, None, &[KeyField::new("amount", "1")]);
        let ticket = Ticket {
            key: key.clone(),
            seq: 1,
            generation: generation.current(),
        };
        assert!(ticket.is_current(&key, generation.current()));
        let other = derive_key(None, None, &[KeyField::new("amount", "2")]);
        assert!(!ticket.is_current(&other, generation.current()));
        generation.bump();
        assert!(!ticket.is_current(&key, generation.current()));
    }
}
