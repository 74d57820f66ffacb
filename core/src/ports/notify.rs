//! Realtime notification port.

use super::PortFuture;
use crate::effect::Notification;
use thiserror::Error;

/// Publishing failed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Publishes notifications to the realtime service
pub trait Notifier: Send + Sync {
    /// Publish one notification
    fn publish(&self, notification: Notification) -> PortFuture<'_, (), NotifyError>;
}
