//! Manager — routes events to feeds and owns the feed/subscriber registries
//!
//! Both registries sit behind a single `RwLock`; every feed has its own
//! `Mutex`. Locks are always taken registry first, then feeds. Whoever
//! holds several feeds at once takes them in URI order. Push delivery runs
//! after all locks are released.

use crate::config::HubConfig;
use crate::delivery::{ChannelDelivery, PushDelivery, PushNotification, PushTarget};
use crate::error::{HubError, Result};
use crate::event::Event;
use crate::feed::Feed;
use crate::state::{FileStateStore, HubSnapshot, StateStore};
use crate::subscription::{Subscriber, Subscription, SubscriptionMode};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard, RwLock};

#[derive(Default)]
struct Registry {
    feeds: HashMap<String, Arc<Mutex<Feed>>>,
    subscribers: HashMap<String, Subscriber>,
}

impl Registry {
    fn feed_or_create(&mut self, uri: &str) -> Arc<Mutex<Feed>> {
        self.feeds
            .entry(uri.to_string())
            .or_insert_with(|| {
                tracing::info!(feed = %uri, "Feed created");
                Arc::new(Mutex::new(Feed::new(uri)))
            })
            .clone()
    }

    /// Take a subscriber out of a feed, dropping the feed once nobody is left
    async fn detach(&mut self, subscriber_id: &str, feed_uri: &str) {
        let Some(feed) = self.feeds.get(feed_uri).cloned() else {
            tracing::warn!(
                subscriber = %subscriber_id,
                feed = %feed_uri,
                "Subscription refers to an unknown feed"
            );
            return;
        };

        let now_empty = {
            let mut feed = feed.lock().await;
            feed.remove_subscriber(subscriber_id);
            feed.is_empty()
        };

        if now_empty {
            self.feeds.remove(feed_uri);
            tracing::info!(feed = %feed_uri, "Feed removed");
        }
    }
}

/// The notification hub
///
/// Shared as `Arc<Manager>` between request handlers. Thread-safe via
/// internal locks.
pub struct Manager {
    registry: RwLock<Registry>,

    delivery: Arc<dyn PushDelivery>,

    state_store: Option<Arc<dyn StateStore>>,

    /// Serializes snapshot + save so a newer save is never overwritten by an older one
    persist_lock: Mutex<()>,

    next_event_id: AtomicU64,

    config: HubConfig,
}

impl Manager {
    /// Create a hub that hands push notifications to `delivery`
    pub fn new(delivery: impl PushDelivery + 'static) -> Self {
        Self::with_shared_delivery(Arc::new(delivery))
    }

    /// Create a hub around a delivery the caller keeps a handle to
    pub fn with_shared_delivery(delivery: Arc<dyn PushDelivery>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            delivery,
            state_store: None,
            persist_lock: Mutex::new(()),
            next_event_id: AtomicU64::new(1),
            config: HubConfig::default(),
        }
    }

    /// Create a hub with write-through persistence
    ///
    /// Call [`Manager::restore`] to load previously saved state.
    pub fn with_state_store(
        delivery: impl PushDelivery + 'static,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let mut manager = Self::new(delivery);
        manager.state_store = Some(store);
        manager
    }

    /// Build a hub from configuration, restoring state when a state path is set
    pub async fn from_config(
        config: HubConfig,
        delivery: impl PushDelivery + 'static,
    ) -> Result<Self> {
        let mut manager = Self::new(delivery);
        if let Some(path) = &config.state_path {
            manager.state_store = Some(Arc::new(FileStateStore::new(path)));
        }
        manager.config = config;
        if manager.state_store.is_some() {
            manager.restore().await?;
        }
        Ok(manager)
    }

    /// Build a hub whose push notifications arrive on the returned channel
    pub async fn from_config_with_channel(
        config: HubConfig,
    ) -> Result<(Self, mpsc::Receiver<PushNotification>)> {
        let (delivery, receiver) = ChannelDelivery::channel(config.delivery_buffer);
        let manager = Self::from_config(config, delivery).await?;
        Ok((manager, receiver))
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Push transport name
    pub fn delivery_name(&self) -> &str {
        self.delivery.name()
    }

    /// Route an event to each of its feeds and notify push subscribers
    ///
    /// Returns the event as stamped with its hub-assigned id. The id is taken
    /// while every destination feed is locked, so ids follow the order in
    /// which events become visible to pulls. A destination nobody
    /// subscribes to has nothing to retain or notify, so no feed is kept for
    /// it. Push delivery problems never fail the publish.
    ///
    /// A `Storage` error means the event was routed and pushed but the new
    /// state was not saved; publishing it again produces a second event.
    pub async fn publish(&self, event: Event) -> Result<Arc<Event>> {
        event.validate()?;

        let uris: BTreeSet<String> = event.feed_uris().iter().cloned().collect();

        let mut targets = BTreeSet::new();
        let (event, persisted) = {
            let registry = self.registry.read().await;
            let event = {
                let mut destinations = Vec::with_capacity(uris.len());
                for uri in &uris {
                    match registry.feeds.get(uri) {
                        Some(feed) => destinations.push(feed.lock().await),
                        None => tracing::debug!(feed = %uri, "No subscribers on feed"),
                    }
                }
                let id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
                let event = Arc::new(event.with_id(id));
                for feed in destinations.iter_mut() {
                    targets.extend(feed.ingest(event.clone()));
                }
                event
            };
            let persisted = self.persist(&registry).await;
            (event, persisted)
        };

        tracing::debug!(
            event_id = ?event.id(),
            kind = %event.kind(),
            feeds = uris.len(),
            push_targets = targets.len(),
            "Event published"
        );

        if !targets.is_empty() {
            let targets: Vec<PushTarget> = targets.into_iter().collect();
            self.delivery.deliver(&targets, event.clone()).await;
        }

        persisted?;
        Ok(event)
    }

    /// Ingestion entrypoint: parse the JSON wire form and publish it
    pub async fn publish_json(&self, json: &str) -> Result<Arc<Event>> {
        let event = Event::from_json(json)?;
        self.publish(event).await
    }

    /// Subscribe `subscriber_id` to `feed_uri`
    ///
    /// Creates the subscriber and the feed when missing. A second
    /// subscription to the same feed is a `Conflict`.
    pub async fn subscribe(
        &self,
        subscriber_id: &str,
        feed_uri: &str,
        mode: SubscriptionMode,
        target_uri: &str,
    ) -> Result<()> {
        require("subscriber id", subscriber_id)?;
        require("feed uri", feed_uri)?;
        require("target uri", target_uri)?;

        let mut registry = self.registry.write().await;

        let created = !registry.subscribers.contains_key(subscriber_id);
        let subscriber = registry
            .subscribers
            .entry(subscriber_id.to_string())
            .or_insert_with(|| Subscriber::new(subscriber_id));
        if let Err(e) = subscriber.add_subscription(Subscription::new(feed_uri, mode, target_uri)) {
            if created {
                registry.subscribers.remove(subscriber_id);
            }
            return Err(e);
        }
        if created {
            tracing::info!(subscriber = %subscriber_id, "Subscriber created");
        }

        let feed = registry.feed_or_create(feed_uri);
        let added = match registry.subscribers.get(subscriber_id) {
            Some(subscriber) => feed.lock().await.add_subscriber(subscriber),
            None => Err(HubError::InvariantViolation(format!(
                "Subscriber '{}' vanished during subscribe",
                subscriber_id
            ))),
        };
        if let Err(e) = added {
            if let Some(subscriber) = registry.subscribers.get_mut(subscriber_id) {
                subscriber.remove_subscription(feed_uri);
                if subscriber.is_empty() {
                    registry.subscribers.remove(subscriber_id);
                }
            }
            registry.detach(subscriber_id, feed_uri).await;
            return Err(e);
        }

        tracing::info!(
            subscriber = %subscriber_id,
            feed = %feed_uri,
            mode = %mode,
            target = %target_uri,
            "Subscription created"
        );

        self.persist(&registry).await
    }

    /// Subscribe a new subscriber with a generated identifier, returning it
    pub async fn subscribe_new(
        &self,
        feed_uri: &str,
        mode: SubscriptionMode,
        target_uri: &str,
    ) -> Result<String> {
        let subscriber_id = self.generate_subscriber_id().await;
        self.subscribe(&subscriber_id, feed_uri, mode, target_uri)
            .await?;
        Ok(subscriber_id)
    }

    /// Remove one subscription
    ///
    /// Returns false if the subscriber is unknown or holds no subscription
    /// to `feed_uri`. A subscriber left without subscriptions, and a feed
    /// left without subscribers, are removed as well.
    pub async fn unsubscribe(&self, subscriber_id: &str, feed_uri: &str) -> Result<bool> {
        require("subscriber id", subscriber_id)?;
        require("feed uri", feed_uri)?;

        let mut registry = self.registry.write().await;

        let Some(subscriber) = registry.subscribers.get_mut(subscriber_id) else {
            return Ok(false);
        };
        if subscriber.remove_subscription(feed_uri).is_none() {
            return Ok(false);
        }
        if subscriber.is_empty() {
            registry.subscribers.remove(subscriber_id);
            tracing::info!(subscriber = %subscriber_id, "Subscriber removed");
        }

        registry.detach(subscriber_id, feed_uri).await;

        tracing::info!(subscriber = %subscriber_id, feed = %feed_uri, "Subscription removed");

        self.persist(&registry).await?;
        Ok(true)
    }

    /// Remove a subscriber and all of its subscriptions
    pub async fn unsubscribe_all(&self, subscriber_id: &str) -> Result<bool> {
        require("subscriber id", subscriber_id)?;

        let mut registry = self.registry.write().await;

        let Some(subscriber) = registry.subscribers.remove(subscriber_id) else {
            return Ok(false);
        };
        for subscription in subscriber.subscriptions() {
            registry.detach(subscriber_id, &subscription.feed_uri).await;
        }

        tracing::info!(
            subscriber = %subscriber_id,
            subscriptions = subscriber.subscriptions().len(),
            "Subscriber removed"
        );

        self.persist(&registry).await?;
        Ok(true)
    }

    /// Collect unseen events from every poll subscription of a subscriber
    ///
    /// Events reaching the subscriber through several feeds are returned
    /// once. The result is in publish order, oldest first, and every event
    /// of one pull is older than those of the next.
    ///
    /// All of the subscriber's poll feeds are drained together. If the new
    /// state cannot be saved they are put back as they were, and the next
    /// pull returns the same events.
    pub async fn pull(&self, subscriber_id: &str) -> Result<Vec<Arc<Event>>> {
        let registry = self.registry.read().await;

        let subscriber = registry.subscribers.get(subscriber_id).ok_or_else(|| {
            HubError::NotFound(format!("Subscriber '{}' does not exist", subscriber_id))
        })?;

        let mut polled = BTreeSet::new();
        for subscription in subscriber.poll_subscriptions() {
            if !registry.feeds.contains_key(&subscription.feed_uri) {
                return Err(HubError::InvariantViolation(format!(
                    "Subscriber '{}' is subscribed to unknown feed {}",
                    subscriber_id, subscription.feed_uri
                )));
            }
            polled.insert(subscription.feed_uri.as_str());
        }

        // Saving needs every feed, so with a store all of them stay locked
        // until the save is done.
        let _persisting = match &self.state_store {
            Some(_) => Some(self.persist_lock.lock().await),
            None => None,
        };
        let mut scope: Vec<(&str, &Arc<Mutex<Feed>>)> = registry
            .feeds
            .iter()
            .filter(|(uri, _)| self.state_store.is_some() || polled.contains(uri.as_str()))
            .map(|(uri, feed)| (uri.as_str(), feed))
            .collect();
        scope.sort_by_key(|(uri, _)| *uri);

        let mut locked = Vec::with_capacity(scope.len());
        for (uri, feed) in scope {
            locked.push((uri, feed.lock().await));
        }
        let previous: Vec<(usize, Feed)> = match &self.state_store {
            Some(_) => locked
                .iter()
                .enumerate()
                .filter(|(_, (uri, _))| polled.contains(uri))
                .map(|(i, (_, feed))| (i, Feed::clone(feed)))
                .collect(),
            None => Vec::new(),
        };

        let outcome = match drain_each(&mut locked, &polled, subscriber_id) {
            Ok(drained) => match &self.state_store {
                Some(store) => {
                    let held: HashMap<&str, &Feed> =
                        locked.iter().map(|(uri, feed)| (*uri, &**feed)).collect();
                    let snapshot = self.snapshot_of(&registry, &held).await;
                    store.save(&snapshot).map(|()| drained)
                }
                None => Ok(drained),
            },
            Err(e) => Err(e),
        };
        let drained = match outcome {
            Ok(drained) => drained,
            Err(e) => {
                for (i, before) in previous {
                    *locked[i].1 = before;
                }
                tracing::warn!(subscriber = %subscriber_id, error = %e, "Pull failed, feeds left unread");
                return Err(e);
            }
        };
        drop(locked);

        let mut collected: BTreeMap<u64, Arc<Event>> = BTreeMap::new();
        let mut unidentified = Vec::new();
        for event in drained {
            match event.id() {
                Some(id) => {
                    collected.entry(id).or_insert(event);
                }
                None => unidentified.push(event),
            }
        }

        let mut events: Vec<Arc<Event>> = collected.into_values().collect();
        events.extend(unidentified.into_iter().rev());

        tracing::debug!(subscriber = %subscriber_id, events = events.len(), "Pulled events");
        Ok(events)
    }

    /// Identifiers of all registered subscribers, sorted
    pub async fn subscriber_ids(&self) -> Vec<String> {
        let registry = self.registry.read().await;
        let mut ids: Vec<String> = registry.subscribers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Look up a subscriber by identifier
    pub async fn subscriber(&self, subscriber_id: &str) -> Option<Subscriber> {
        let registry = self.registry.read().await;
        registry.subscribers.get(subscriber_id).cloned()
    }

    /// URIs of all live feeds, sorted
    pub async fn feed_uris(&self) -> Vec<String> {
        let registry = self.registry.read().await;
        let mut uris: Vec<String> = registry.feeds.keys().cloned().collect();
        uris.sort();
        uris
    }

    /// Number of events a feed currently retains
    pub async fn retained(&self, feed_uri: &str) -> Option<usize> {
        let registry = self.registry.read().await;
        let feed = registry.feeds.get(feed_uri)?.clone();
        drop(registry);

        let retained = feed.lock().await.retained();
        Some(retained)
    }

    /// A fresh subscriber identifier not currently in use
    pub async fn generate_subscriber_id(&self) -> String {
        let registry = self.registry.read().await;
        loop {
            let id = format!(
                "{}-{}",
                self.config.subscriber_id_prefix,
                uuid::Uuid::new_v4().simple()
            );
            if !registry.subscribers.contains_key(&id) {
                return id;
            }
        }
    }

    /// Capture the full hub state
    pub async fn snapshot(&self) -> HubSnapshot {
        let registry = self.registry.read().await;
        self.snapshot_of(&registry, &HashMap::new()).await
    }

    /// Replace in-memory state with what the state store holds
    ///
    /// Returns false when no store is configured or nothing was saved yet.
    /// Stored state whose feeds and subscribers disagree is rejected with
    /// `InvariantViolation` and leaves the hub untouched.
    pub async fn restore(&self) -> Result<bool> {
        let Some(store) = &self.state_store else {
            return Ok(false);
        };
        let Some(snapshot) = store.load()? else {
            return Ok(false);
        };

        let mut max_event_id = 0;
        let mut feeds = HashMap::new();
        for feed_snapshot in snapshot.feeds {
            max_event_id = feed_snapshot
                .events
                .iter()
                .filter_map(|r| r.event.id())
                .fold(max_event_id, u64::max);
            let feed = Feed::from_snapshot(feed_snapshot)?;
            feeds.insert(feed.uri().to_string(), feed);
        }

        let mut subscribers = HashMap::new();
        for subscriber in snapshot.subscribers {
            for subscription in subscriber.subscriptions() {
                let registered = feeds
                    .get(&subscription.feed_uri)
                    .is_some_and(|feed| match subscription.mode {
                        SubscriptionMode::Poll => feed.poll_subscribers().any(|id| id == subscriber.id()),
                        SubscriptionMode::Push => feed.push_subscribers().any(|id| id == subscriber.id()),
                    });
                if !registered {
                    return Err(HubError::InvariantViolation(format!(
                        "Stored subscription of '{}' to {} has no matching feed membership",
                        subscriber.id(),
                        subscription.feed_uri
                    )));
                }
            }
            subscribers.insert(subscriber.id().to_string(), subscriber);
        }

        for feed in feeds.values() {
            let members = feed.poll_subscribers().chain(feed.push_subscribers());
            for id in members {
                let subscribed = subscribers
                    .get(id)
                    .is_some_and(|s: &Subscriber| s.subscription(feed.uri()).is_some());
                if !subscribed {
                    return Err(HubError::InvariantViolation(format!(
                        "Stored feed {} lists '{}' without a subscription",
                        feed.uri(),
                        id
                    )));
                }
            }
        }

        let next_event_id = snapshot.next_event_id.max(max_event_id + 1).max(1);

        let mut registry = self.registry.write().await;
        registry.feeds = feeds
            .into_iter()
            .map(|(uri, feed)| (uri, Arc::new(Mutex::new(feed))))
            .collect();
        registry.subscribers = subscribers;
        self.next_event_id.store(next_event_id, Ordering::SeqCst);

        tracing::info!(
            feeds = registry.feeds.len(),
            subscribers = registry.subscribers.len(),
            next_event_id,
            "State restored"
        );
        Ok(true)
    }

    /// Snapshot the registry, reading feeds in `held` instead of locking them
    async fn snapshot_of(&self, registry: &Registry, held: &HashMap<&str, &Feed>) -> HubSnapshot {
        let mut subscribers: Vec<Subscriber> = registry.subscribers.values().cloned().collect();
        subscribers.sort_by(|a, b| a.id().cmp(b.id()));

        let mut uris: Vec<&String> = registry.feeds.keys().collect();
        uris.sort();
        let mut feeds = Vec::with_capacity(uris.len());
        for uri in uris {
            if let Some(feed) = held.get(uri.as_str()) {
                feeds.push(feed.snapshot());
            } else if let Some(feed) = registry.feeds.get(uri) {
                feeds.push(feed.lock().await.snapshot());
            }
        }

        HubSnapshot {
            next_event_id: self.next_event_id.load(Ordering::SeqCst),
            subscribers,
            feeds,
        }
    }

    async fn persist(&self, registry: &Registry) -> Result<()> {
        let Some(store) = &self.state_store else {
            return Ok(());
        };

        let _guard = self.persist_lock.lock().await;
        let snapshot = self.snapshot_of(registry, &HashMap::new()).await;
        store.save(&snapshot).map_err(|e| {
            tracing::warn!(error = %e, "Failed to save hub state");
            e
        })
    }
}

fn drain_each(
    feeds: &mut [(&str, MutexGuard<'_, Feed>)],
    polled: &BTreeSet<&str>,
    subscriber_id: &str,
) -> Result<Vec<Arc<Event>>> {
    let mut events = Vec::new();
    for (uri, feed) in feeds.iter_mut() {
        if polled.contains(*uri) {
            events.extend(feed.drain(subscriber_id)?);
        }
    }
    Ok(events)
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(HubError::InvalidInput(format!("{} cannot be empty", what)));
    }
    Ok(())
}
