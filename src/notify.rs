//! Toast-style notifications raised by the view binding.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Pending,
    Success,
    Error,
}

/// Handle used to dismiss a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NotifyHandle(pub u64);

pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotifyLevel, message: &str) -> NotifyHandle;
    fn dismiss(&self, handle: NotifyHandle);
}

/// One notifier call, in call order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifyEvent {
    Shown {
        handle: NotifyHandle,
        level: NotifyLevel,
        message: String,
    },
    Dismissed {
        handle: NotifyHandle,
    },
}

/// Notifier that keeps every call for later inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    next: AtomicU64,
    events: Mutex<Vec<NotifyEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotifyEvent> {
        self.log().clone()
    }

    /// Messages shown at `level`, dismissed or not.
    pub fn shown(&self, level: NotifyLevel) -> Vec<String> {
        self.log()
            .iter()
            .filter_map(|event| match event {
                NotifyEvent::Shown {
                    level: shown,
                    message,
                    ..
                } if *shown == level => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Handles shown but not yet dismissed.
    pub fn open(&self) -> Vec<NotifyHandle> {
        let log = self.log();
        let mut open = Vec::new();
        for event in log.iter() {
            match event {
                NotifyEvent::Shown { handle, .. } => open.push(*handle),
                NotifyEvent::Dismissed { handle } => open.retain(|shown| shown != handle),
            }
        }
        open
    }

    fn log(&self) -> MutexGuard<'_, Vec<NotifyEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) -> NotifyHandle {
        let handle = NotifyHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        tracing::debug!(handle = handle.0, ?level, text = message, "notify");
        self.log().push(NotifyEvent::Shown {
            handle,
            level,
            message: message.to_string(),
        });
        handle
    }

    fn dismiss(&self, handle: NotifyHandle) {
        self.log().push(NotifyEvent::Dismissed { handle });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dismissed_handles_are_no_longer_open() {
        let notifier = RecordingNotifier::new();
        let pending = notifier.notify(NotifyLevel::Pending, "Adding collateral");
        let failed = notifier.notify(NotifyLevel::Error, "insufficient-balance");
        notifier.dismiss(pending);
        assert_eq!(notifier.open(), vec![failed]);
        assert_eq!(
            notifier.shown(NotifyLevel::Error),
            vec!["insufficient-balance".to_string()]
        );
    }
}
