//! Push delivery — the collaborator that notifies push-mode subscribers
//!
//! The manager hands every published event, together with the union of
//! push targets across its destination feeds, to a `PushDelivery`.
//! Delivery is best effort: implementations swallow and log failures, and
//! nothing is ever reported back to the publisher.

use crate::event::Event;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// A push-mode subscriber and the endpoint it wants events sent to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTarget {
    pub subscriber_id: String,
    pub target_uri: String,
}

impl PushTarget {
    pub fn new(subscriber_id: impl Into<String>, target_uri: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            target_uri: target_uri.into(),
        }
    }
}

/// One event addressed to one push target
#[derive(Debug, Clone)]
pub struct PushNotification {
    pub target: PushTarget,
    pub event: Arc<Event>,
}

/// Core trait for push transports
#[async_trait]
pub trait PushDelivery: Send + Sync {
    /// Deliver `event` to every target
    ///
    /// Never fails from the caller's point of view; unreachable targets
    /// are the implementation's problem.
    async fn deliver(&self, targets: &[PushTarget], event: Arc<Event>);

    /// Transport name (e.g., "noop", "channel", "memory")
    fn name(&self) -> &str;
}

/// Discards notifications; used when no push transport is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelivery;

#[async_trait]
impl PushDelivery for NoopDelivery {
    async fn deliver(&self, targets: &[PushTarget], event: Arc<Event>) {
        tracing::debug!(
            event_id = ?event.id(),
            targets = targets.len(),
            "No push transport configured, dropping notifications"
        );
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Forwards notifications over a bounded channel to an in-process consumer
///
/// A full or closed channel drops the notification with a warning rather
/// than blocking the publisher.
#[derive(Debug, Clone)]
pub struct ChannelDelivery {
    sender: mpsc::Sender<PushNotification>,
}

impl ChannelDelivery {
    /// Create a delivery and the receiver that drains it
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PushNotification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl PushDelivery for ChannelDelivery {
    async fn deliver(&self, targets: &[PushTarget], event: Arc<Event>) {
        for target in targets {
            let notification = PushNotification {
                target: target.clone(),
                event: event.clone(),
            };
            if let Err(e) = self.sender.try_send(notification) {
                tracing::warn!(
                    subscriber = %target.subscriber_id,
                    target = %target.target_uri,
                    event_id = ?event.id(),
                    error = %e,
                    "Push notification dropped"
                );
            }
        }
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Records notifications in memory for development and testing
///
/// Keeps at most `max_notifications`, dropping the oldest first.
pub struct MemoryDelivery {
    delivered: Arc<RwLock<Vec<PushNotification>>>,
    max_notifications: usize,
}

impl MemoryDelivery {
    pub fn new(max_notifications: usize) -> Self {
        Self {
            delivered: Arc::new(RwLock::new(Vec::new())),
            max_notifications,
        }
    }

    /// All recorded notifications, oldest first
    pub async fn delivered(&self) -> Vec<PushNotification> {
        self.delivered.read().await.clone()
    }

    /// Notifications recorded for one subscriber
    pub async fn delivered_to(&self, subscriber_id: &str) -> Vec<Arc<Event>> {
        self.delivered
            .read()
            .await
            .iter()
            .filter(|n| n.target.subscriber_id == subscriber_id)
            .map(|n| n.event.clone())
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.delivered.read().await.len()
    }
}

impl Default for MemoryDelivery {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl PushDelivery for MemoryDelivery {
    async fn deliver(&self, targets: &[PushTarget], event: Arc<Event>) {
        let mut delivered = self.delivered.write().await;
        for target in targets {
            delivered.push(PushNotification {
                target: target.clone(),
                event: event.clone(),
            });
        }

        if self.max_notifications > 0 && delivered.len() > self.max_notifications {
            let drain_count = delivered.len() - self.max_notifications;
            delivered.drain(..drain_count);
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}
