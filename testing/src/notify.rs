//! Recording notifier.

use marketplace_core::effect::Notification;
use marketplace_core::ports::{Notifier, NotifyError, PortFuture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// [`Notifier`] that keeps every published notification
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Create an empty notifier
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Notifications published so far
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, notification: Notification) -> PortFuture<'_, (), NotifyError> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifyError("realtime service unavailable".into()));
            }
            self.sent
                .lock()
                .map_err(|_| NotifyError("Mutex lock failed".into()))?
                .push(notification);
            Ok(())
        })
    }
}
