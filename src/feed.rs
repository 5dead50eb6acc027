//! Feed — per-topic retention queue with poll offsets and lazy compaction
//!
//! A feed keeps an event only while some poll subscriber has not consumed
//! it. Each poll subscriber's read position is the feed-local sequence
//! number of the newest event it has seen (`None` = nothing in the current
//! queue seen yet). One subscriber is cached as the *slowest*; only its
//! drain, or the removal of a poll subscriber, runs [`Feed::compact`], which
//! trims the queue from its oldest end up to and including the first event
//! somebody still points at.
//!
//! Offsets key on sequence numbers assigned at ingest, never on event
//! content, so two identical notifications stay distinct.

use crate::delivery::PushTarget;
use crate::error::{HubError, Result};
use crate::event::Event;
use crate::subscription::{Subscriber, SubscriptionMode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

/// An event held in a feed's retention queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetainedEvent {
    /// Feed-local sequence number, strictly increasing with ingest order
    pub seq: u64,
    pub event: Arc<Event>,
}

/// Serializable state of a feed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub uri: String,

    /// Retained events, oldest first
    #[serde(default)]
    pub events: Vec<RetainedEvent>,

    /// Push subscriber id → target uri
    #[serde(default)]
    pub push: BTreeMap<String, String>,

    /// Poll subscriber id → last seen sequence number
    #[serde(default)]
    pub offsets: BTreeMap<String, Option<u64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slowest: Option<String>,

    #[serde(default)]
    pub next_seq: u64,
}

/// A named topic and its retention state
#[derive(Debug, Clone)]
pub struct Feed {
    uri: String,

    /// Newest at the front
    queue: VecDeque<RetainedEvent>,

    /// Push subscriber id → target uri
    push: BTreeMap<String, String>,

    /// Poll subscriber id → last seen sequence number
    offsets: BTreeMap<String, Option<u64>>,

    slowest: Option<String>,

    next_seq: u64,
}

impl Feed {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            queue: VecDeque::new(),
            push: BTreeMap::new(),
            offsets: BTreeMap::new(),
            slowest: None,
            next_seq: 1,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Register a subscriber according to its subscription to this feed
    ///
    /// The subscriber must already hold a subscription for this feed with a
    /// target set. A new poll subscriber has seen nothing, so it becomes the
    /// slowest one.
    pub fn add_subscriber(&mut self, subscriber: &Subscriber) -> Result<()> {
        let subscription = subscriber.subscription(&self.uri).ok_or_else(|| {
            HubError::InvariantViolation(format!(
                "Subscriber '{}' holds no subscription to feed {}",
                subscriber.id(),
                self.uri
            ))
        })?;
        if subscription.target_uri.is_empty() {
            return Err(HubError::InvariantViolation(format!(
                "Subscription of '{}' to feed {} has no target",
                subscriber.id(),
                self.uri
            )));
        }
        if self.has_subscriber(subscriber.id()) {
            return Err(HubError::InvariantViolation(format!(
                "Subscriber '{}' is already registered in feed {}",
                subscriber.id(),
                self.uri
            )));
        }

        match subscription.mode {
            SubscriptionMode::Push => {
                self.push
                    .insert(subscriber.id().to_string(), subscription.target_uri.clone());
            }
            SubscriptionMode::Poll => {
                self.offsets.insert(subscriber.id().to_string(), None);
                self.slowest = Some(subscriber.id().to_string());
            }
        }
        Ok(())
    }

    /// Remove a subscriber; returns whether it was registered
    ///
    /// Removing a poll subscriber recompacts the queue, since it may have
    /// been the one holding the oldest events back.
    pub fn remove_subscriber(&mut self, subscriber_id: &str) -> bool {
        if self.push.remove(subscriber_id).is_some() {
            return true;
        }
        if self.offsets.remove(subscriber_id).is_some() {
            self.slowest = None;
            self.compact();
            return true;
        }
        false
    }

    /// Accept a new event; returns the push targets to notify now
    ///
    /// The event is retained only if at least one poll subscriber exists.
    pub fn ingest(&mut self, event: Arc<Event>) -> Vec<PushTarget> {
        if !self.offsets.is_empty() {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.queue.push_front(RetainedEvent { seq, event });
            tracing::debug!(feed = %self.uri, seq, retained = self.queue.len(), "Event retained");
        }
        self.push_targets()
    }

    /// Hand a poll subscriber every event it has not seen yet, newest first
    pub fn drain(&mut self, subscriber_id: &str) -> Result<Vec<Arc<Event>>> {
        let last_seen = *self.offsets.get(subscriber_id).ok_or_else(|| {
            HubError::NotFound(format!(
                "Subscriber '{}' is not a poll subscriber of feed {}",
                subscriber_id, self.uri
            ))
        })?;
        let newest = self.queue.front().map(|r| r.seq);

        if self.slowest.as_deref() == Some(subscriber_id) {
            let events: Vec<Arc<Event>> = self.queue.iter().map(|r| r.event.clone()).collect();
            self.offsets.insert(subscriber_id.to_string(), newest);
            self.compact();
            return Ok(events);
        }

        let events: Vec<Arc<Event>> = self
            .queue
            .iter()
            .take_while(|r| Some(r.seq) != last_seen)
            .map(|r| r.event.clone())
            .collect();
        self.offsets.insert(subscriber_id.to_string(), newest);
        Ok(events)
    }

    /// Trim fully consumed events from the oldest end and pick a new slowest
    ///
    /// Stops at the first event some subscriber still points at: that event
    /// is dropped, its readers are reset to "nothing seen" and become the
    /// slowest. Newer events are left for the next pass.
    fn compact(&mut self) {
        self.slowest = None;

        if let Some(id) = self
            .offsets
            .iter()
            .find(|(_, last_seen)| last_seen.is_none())
            .map(|(id, _)| id.clone())
        {
            self.slowest = Some(id);
            return;
        }

        let mut discarded = 0usize;
        while let Some(oldest) = self.queue.pop_back() {
            discarded += 1;
            let readers: Vec<String> = self
                .offsets
                .iter()
                .filter(|(_, last_seen)| **last_seen == Some(oldest.seq))
                .map(|(id, _)| id.clone())
                .collect();
            if readers.is_empty() {
                continue;
            }
            for id in &readers {
                self.offsets.insert(id.clone(), None);
            }
            self.slowest = readers.into_iter().next();
            break;
        }

        tracing::debug!(
            feed = %self.uri,
            discarded,
            retained = self.queue.len(),
            slowest = ?self.slowest,
            "Feed compacted"
        );
    }

    /// Current push targets, ordered by subscriber id
    pub fn push_targets(&self) -> Vec<PushTarget> {
        self.push
            .iter()
            .map(|(id, target)| PushTarget::new(id.clone(), target.clone()))
            .collect()
    }

    /// Retained events, newest first
    pub fn events(&self) -> Vec<Arc<Event>> {
        self.queue.iter().map(|r| r.event.clone()).collect()
    }

    /// Number of retained events
    pub fn retained(&self) -> usize {
        self.queue.len()
    }

    pub fn slowest(&self) -> Option<&str> {
        self.slowest.as_deref()
    }

    pub fn poll_subscribers(&self) -> impl Iterator<Item = &str> {
        self.offsets.keys().map(String::as_str)
    }

    pub fn push_subscribers(&self) -> impl Iterator<Item = &str> {
        self.push.keys().map(String::as_str)
    }

    pub fn has_subscriber(&self, subscriber_id: &str) -> bool {
        self.push.contains_key(subscriber_id) || self.offsets.contains_key(subscriber_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.push.len() + self.offsets.len()
    }

    /// True when nobody, push or poll, is subscribed
    pub fn is_empty(&self) -> bool {
        self.subscriber_count() == 0
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            uri: self.uri.clone(),
            events: self.queue.iter().rev().cloned().collect(),
            push: self.push.clone(),
            offsets: self.offsets.clone(),
            slowest: self.slowest.clone(),
            next_seq: self.next_seq,
        }
    }

    /// Rebuild a feed from stored state, checking its internal consistency
    pub fn from_snapshot(snapshot: FeedSnapshot) -> Result<Self> {
        let FeedSnapshot {
            uri,
            events,
            push,
            offsets,
            slowest,
            next_seq,
        } = snapshot;
        let violation = |reason: String| {
            HubError::InvariantViolation(format!("Stored feed {}: {}", uri, reason))
        };

        if events.windows(2).any(|w| w[0].seq >= w[1].seq) {
            return Err(violation(
                "retention queue has no identifiable oldest element".to_string(),
            ));
        }
        if events.last().is_some_and(|r| r.seq >= next_seq) {
            return Err(violation(format!("next sequence {} is already used", next_seq)));
        }
        if offsets.is_empty() && !events.is_empty() {
            return Err(violation("events retained without poll subscribers".to_string()));
        }
        if let Some(id) = push.keys().find(|id| offsets.contains_key(*id)) {
            return Err(violation(format!("subscriber '{}' is both push and poll", id)));
        }

        let queued: HashSet<u64> = events.iter().map(|r| r.seq).collect();
        for (id, last_seen) in &offsets {
            if let Some(seq) = last_seen {
                if !queued.contains(seq) {
                    return Err(violation(format!(
                        "subscriber '{}' points at missing event {}",
                        id, seq
                    )));
                }
            }
        }

        match &slowest {
            Some(id) if offsets.get(id) != Some(&None) => {
                return Err(violation(format!(
                    "slowest subscriber '{}' is not a poll subscriber with nothing seen",
                    id
                )));
            }
            None if !offsets.is_empty() => {
                return Err(violation("poll subscribers without a slowest one".to_string()));
            }
            _ => {}
        }

        Ok(Self {
            uri,
            queue: events.into_iter().rev().collect(),
            push,
            offsets,
            slowest,
            next_seq,
        })
    }
}
