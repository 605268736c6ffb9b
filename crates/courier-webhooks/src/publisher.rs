//! Fire-and-forget event publishing.
//!
//! Producers hand events to an unbounded channel; the worker drains it and
//! turns each event into durable deliveries via
//! [`Dispatcher::submit_event`](crate::dispatcher::Dispatcher::submit_event).

use tokio::sync::mpsc;

use crate::models::Event;

/// Receiving half drained by [`WebhookWorker`](crate::worker::WebhookWorker).
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Publisher that sends events to the worker's channel.
#[derive(Clone)]
pub struct EventPublisher {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventPublisher {
    /// Create a publisher and the receiver the worker consumes.
    #[must_use]
    pub fn new() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Publish an event. Never blocks. Errors are logged, not propagated.
    pub fn publish(&self, event: Event) {
        let event_id = event.id;
        if let Err(e) = self.sender.send(event) {
            tracing::warn!(
                target: "webhook_delivery",
                event_id = %event_id,
                event_type = %e.0.event_type,
                "Event channel closed, event dropped"
            );
        }
    }

    /// Whether the consuming worker has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
