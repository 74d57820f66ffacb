//! Realtime notifiers.
//!
//! [`HttpNotifier`] publishes to the realtime service on the recipient's
//! private channel; [`LogNotifier`] only logs and is used when no service is
//! configured.

use marketplace_core::effect::Notification;
use marketplace_core::ports::{Notifier, NotifyError, PortFuture};
use serde::Serialize;
use std::time::Duration;

/// Publishes notifications over HTTP
#[derive(Clone)]
pub struct HttpNotifier {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl std::fmt::Debug for HttpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNotifier")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct Publish<'a> {
    channel: String,
    event: &'static str,
    payload: &'a Notification,
}

fn channel_for(notification: &Notification) -> String {
    format!("user:{}", notification.recipient)
}

fn event_name(notification: &Notification) -> &'static str {
    match notification.subject.kind() {
        "job" => "job_update",
        _ => "booking_update",
    }
}

impl HttpNotifier {
    /// Create a notifier for a publish endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, token: Option<String>) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| NotifyError(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
            token,
        })
    }
}

impl Notifier for HttpNotifier {
    fn publish(&self, notification: Notification) -> PortFuture<'_, (), NotifyError> {
        Box::pin(async move {
            let body = Publish {
                channel: channel_for(&notification),
                event: event_name(&notification),
                payload: &notification,
            };
            let mut request = self.http.post(&self.url).json(&body);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await.map_err(|e| NotifyError(e.to_string()))?;
            if !response.status().is_success() {
                return Err(NotifyError(format!("realtime service returned {}", response.status())));
            }
            Ok(())
        })
    }
}

/// Logs notifications instead of publishing them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn publish(&self, notification: Notification) -> PortFuture<'_, (), NotifyError> {
        Box::pin(async move {
            tracing::info!(
                channel = %channel_for(&notification),
                kind = ?notification.kind,
                subject = %notification.subject,
                "Notification"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_core::earnings::Subject;
    use marketplace_core::effect::NotificationKind;
    use marketplace_core::ids::{JobId, UserId};

    #[test]
    fn notifications_go_to_the_recipients_channel() {
        let recipient = UserId::new();
        let notification = Notification {
            recipient,
            kind: NotificationKind::QuoteAccepted,
            subject: Subject::Job(JobId::new()),
        };
        assert_eq!(channel_for(&notification), format!("user:{recipient}"));
        assert_eq!(event_name(&notification), "job_update");
    }

    #[tokio::test]
    async fn log_notifier_never_fails() {
        let notification = Notification {
            recipient: UserId::new(),
            kind: NotificationKind::PaymentReceived,
            subject: Subject::Job(JobId::new()),
        };
        assert!(LogNotifier.publish(notification).await.is_ok());
    }
}
