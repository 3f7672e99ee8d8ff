use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::email::{render, EmailContext, EmailMessage};
use super::lifecycle::TransitionEvent;
use super::mailer::Mailer;

/// A transition paired with the address its notice goes to.
#[derive(Debug, Clone)]
pub struct Notification {
    pub event: TransitionEvent,
    pub recipient: String,
}

/// Delivery counts for one dispatch; failures are logged, never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Turns transition events into templated email and hands them to the mailer.
pub struct Notifier<M> {
    mailer: Arc<M>,
    event_name: String,
}

impl<M: Mailer> Notifier<M> {
    pub fn new(mailer: Arc<M>, event_name: impl Into<String>) -> Self {
        Self {
            mailer,
            event_name: event_name.into(),
        }
    }

    pub fn compose(&self, notification: &Notification) -> Option<EmailMessage> {
        let context = EmailContext {
            event_name: &self.event_name,
            first_name: &notification.event.first_name,
        };
        render(&notification.event.kind, &context)
            .map(|rendered| rendered.addressed_to(notification.recipient.clone()))
    }

    /// Render every notification and deliver them in a single batch.
    pub async fn dispatch(&self, notifications: &[Notification]) -> DeliveryReport {
        let messages: Vec<EmailMessage> = notifications
            .iter()
            .filter_map(|notification| self.compose(notification))
            .collect();
        if messages.is_empty() {
            return DeliveryReport::default();
        }

        let results = self.mailer.send_batch(&messages).await;
        let mut report = DeliveryReport {
            attempted: messages.len(),
            ..DeliveryReport::default()
        };
        for (message, result) in messages.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        to = %message.to,
                        template = message.template,
                        error = %err,
                        "notification delivery failed"
                    );
                }
            }
        }

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            "notifications dispatched"
        );
        report
    }
}
