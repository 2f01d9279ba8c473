//! # Event Broadcaster
//!
//! Synchronous, best-effort fan-out of [`DeployEvent`]s to any number of
//! subscribers.
//!
//! Each publish walks the current subscriber list in registration order. A
//! subscriber that returns an error or panics is logged and skipped; the
//! remaining subscribers still receive the event. There is no backlog: a
//! subscriber only sees events published after it registered.
//!
//! ```rust
//! use deployer_core::events::{DeployEvent, EventBroadcaster};
//!
//! let broadcaster = EventBroadcaster::new();
//! let (id, mut rx) = broadcaster.subscribe_channel("ui");
//! broadcaster.publish(&DeployEvent::RefreshComplete);
//! assert_eq!(rx.try_recv().unwrap(), DeployEvent::RefreshComplete);
//! assert!(broadcaster.unsubscribe(id));
//! ```

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::types::DeployEvent;

pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Receiver side of the broadcaster
pub trait EventSubscriber: Send + Sync {
    /// Handle one event. Errors are logged by the broadcaster and otherwise
    /// ignored.
    fn handle_event(&self, event: &DeployEvent) -> Result<(), SubscriberError>;

    /// Get subscriber name for identification
    fn subscriber_name(&self) -> &str {
        "unnamed_subscriber"
    }
}

/// Handle returned by subscribe; pass it back to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

/// Adapts a closure into a subscriber
pub struct FnSubscriber<F> {
    name: String,
    handler: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(&DeployEvent) -> Result<(), SubscriberError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> EventSubscriber for FnSubscriber<F>
where
    F: Fn(&DeployEvent) -> Result<(), SubscriberError> + Send + Sync,
{
    fn handle_event(&self, event: &DeployEvent) -> Result<(), SubscriberError> {
        (self.handler)(event)
    }

    fn subscriber_name(&self) -> &str {
        &self.name
    }
}

/// Forwards events into an unbounded channel for async consumers such as a
/// WebSocket session
pub struct ChannelSubscriber {
    name: String,
    sender: mpsc::UnboundedSender<DeployEvent>,
}

impl EventSubscriber for ChannelSubscriber {
    fn handle_event(&self, event: &DeployEvent) -> Result<(), SubscriberError> {
        self.sender
            .send(event.clone())
            .map_err(|_| format!("channel for subscriber '{}' is closed", self.name).into())
    }

    fn subscriber_name(&self) -> &str {
        &self.name
    }
}

/// Delivery counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcasterStats {
    pub subscribers: usize,
    pub events_published: u64,
    pub delivery_failures: u64,
}

#[derive(Default)]
pub struct EventBroadcaster {
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn EventSubscriber>)>>,
    events_published: AtomicU64,
    delivery_failures: AtomicU64,
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscribers", &self.subscribers.read().len())
            .field("events_published", &self.events_published)
            .finish()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        info!(subscriber = subscriber.subscriber_name(), "Registered event subscriber");
        self.subscribers.write().push((id, subscriber));
        id
    }

    /// Subscribe with a channel; the receiver yields every later event
    pub fn subscribe_channel(
        &self,
        name: impl Into<String>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<DeployEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscriber = ChannelSubscriber {
            name: name.into(),
            sender,
        };
        (self.subscribe(Arc::new(subscriber)), receiver)
    }

    /// Returns false when the id was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        let removed = subscribers.len() != before;
        if removed {
            info!("Unregistered event subscriber");
        }
        removed
    }

    pub fn publish(&self, event: &DeployEvent) {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        // Snapshot the list so handlers may (un)subscribe without deadlocking
        let subscribers: Vec<_> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();

        if subscribers.is_empty() {
            debug!(event_type = event.event_type(), "No subscribers for event");
            return;
        }

        for subscriber in subscribers {
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber.handle_event(event)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("subscriber panicked".to_string()),
            };
            if let Some(reason) = failure {
                self.delivery_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    subscriber = subscriber.subscriber_name(),
                    event_type = event.event_type(),
                    error = %reason,
                    "Failed to deliver event"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            subscribers: self.subscriber_count(),
            events_published: self.events_published.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}
