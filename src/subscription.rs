//! Subscriptions and the subscribers that own them

use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire URN for poll-mode subscriptions
pub const POLL_URN: &str = "urn:ietf:params:scimnotify:api:messages:2.0:poll";

/// Wire URN for push (web callback) subscriptions
pub const WEB_CALLBACK_URN: &str = "urn:ietf:params:scimnotify:api:messages:2.0:webCallback";

/// How a subscriber receives events from a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionMode {
    /// Events accumulate in the feed until the subscriber pulls them
    Poll,
    /// Events are handed to the push-delivery collaborator as they arrive
    Push,
}

impl SubscriptionMode {
    /// Parse a mode from its wire URN or short name
    pub fn from_urn(value: &str) -> Result<Self> {
        match value {
            POLL_URN | "poll" => Ok(SubscriptionMode::Poll),
            WEB_CALLBACK_URN | "webCallback" | "push" => Ok(SubscriptionMode::Push),
            other => Err(HubError::InvalidInput(format!(
                "Wrong subscription mode: {}",
                other
            ))),
        }
    }

    /// Canonical wire URN
    pub fn as_urn(&self) -> &'static str {
        match self {
            SubscriptionMode::Poll => POLL_URN,
            SubscriptionMode::Push => WEB_CALLBACK_URN,
        }
    }
}

impl fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionMode::Poll => f.write_str("poll"),
            SubscriptionMode::Push => f.write_str("push"),
        }
    }
}

impl FromStr for SubscriptionMode {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_urn(s)
    }
}

/// A subscriber's interest in one feed
///
/// Refers to its feed by URI only; the feed itself is owned by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub feed_uri: String,
    pub mode: SubscriptionMode,
    /// Push callback endpoint, or an informational endpoint for poll
    pub target_uri: String,
}

impl Subscription {
    pub fn new(
        feed_uri: impl Into<String>,
        mode: SubscriptionMode,
        target_uri: impl Into<String>,
    ) -> Self {
        Self {
            feed_uri: feed_uri.into(),
            mode,
            target_uri: target_uri.into(),
        }
    }

    pub fn is_poll(&self) -> bool {
        self.mode == SubscriptionMode::Poll
    }

    pub fn is_push(&self) -> bool {
        self.mode == SubscriptionMode::Push
    }
}

/// A named consumer holding at most one subscription per feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    id: String,
    subscriptions: Vec<Subscription>,
}

impl Subscriber {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subscriptions: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Subscription to the given feed, if any
    pub fn subscription(&self, feed_uri: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.feed_uri == feed_uri)
    }

    /// Attach a subscription; a second one for the same feed is a conflict
    pub fn add_subscription(&mut self, subscription: Subscription) -> Result<()> {
        if self.subscription(&subscription.feed_uri).is_some() {
            return Err(HubError::Conflict(format!(
                "Subscription of '{}' to the feed {} already exists",
                self.id, subscription.feed_uri
            )));
        }
        self.subscriptions.push(subscription);
        Ok(())
    }

    /// Detach the subscription to `feed_uri`, returning it if present
    pub fn remove_subscription(&mut self, feed_uri: &str) -> Option<Subscription> {
        let pos = self.subscriptions.iter().position(|s| s.feed_uri == feed_uri)?;
        Some(self.subscriptions.remove(pos))
    }

    /// Poll-mode subscriptions only
    pub fn poll_subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter().filter(|s| s.is_poll())
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
