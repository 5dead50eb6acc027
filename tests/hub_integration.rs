//! Hub integration tests
//!
//! End-to-end tests exercising the full Manager lifecycle: publish, poll and
//! push subscriptions, cascade cleanup, persistence through a state file,
//! channel push delivery, and concurrent callers.

use notify_hub::{
    Event, EventKind, FileStateStore, HubConfig, Manager, MemoryDelivery, StateStore,
    SubscriptionMode, EVENT_SCHEMA, POLL_URN, WEB_CALLBACK_URN,
};
use std::sync::Arc;

const FEED: &str = "https://hub.example.org/feeds/mailman";
const FEED_A: &str = "https://hub.example.org/feeds/a";
const FEED_B: &str = "https://hub.example.org/feeds/b";

fn test_hub() -> (Manager, Arc<MemoryDelivery>) {
    let delivery = Arc::new(MemoryDelivery::default());
    (Manager::with_shared_delivery(delivery.clone()), delivery)
}

fn message(feed: &str, label: &str) -> Event {
    Event::new("https://idm.example.org/scim", EventKind::Modify)
        .with_feed(feed)
        .with_resource("https://idm.example.org/scim/Users/44")
        .with_value("label", serde_json::json!(label))
}

fn labels(events: &[Arc<Event>]) -> Vec<String> {
    events
        .iter()
        .map(|e| e.values()["label"].as_str().unwrap().to_string())
        .collect()
}

fn temp_path() -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("notify-hub-it-{}", uuid::Uuid::new_v4()))
        .join("state.json")
}

// ─── Scenarios ───────────────────────────────────────────────────

#[tokio::test]
async fn test_single_poller_receives_then_nothing() {
    let (hub, _) = test_hub();
    hub.subscribe("s1", FEED, SubscriptionMode::Poll, FEED).await.unwrap();

    hub.publish(message(FEED, "m1")).await.unwrap();
    hub.publish(message(FEED, "m2")).await.unwrap();

    assert_eq!(labels(&hub.pull("s1").await.unwrap()), vec!["m1", "m2"]);
    assert!(hub.pull("s1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_two_pollers_share_retention() {
    let (hub, _) = test_hub();
    hub.subscribe("s1", FEED, SubscriptionMode::Poll, FEED).await.unwrap();
    hub.subscribe("s2", FEED, SubscriptionMode::Poll, FEED).await.unwrap();

    hub.publish(message(FEED, "m1")).await.unwrap();

    assert_eq!(labels(&hub.pull("s1").await.unwrap()), vec!["m1"]);
    assert_eq!(hub.retained(FEED).await, Some(1));

    assert_eq!(labels(&hub.pull("s2").await.unwrap()), vec!["m1"]);
    assert_eq!(hub.retained(FEED).await, Some(0));
}

#[tokio::test]
async fn test_mixed_poll_and_push() {
    let (hub, delivery) = test_hub();
    hub.subscribe("s1", FEED, SubscriptionMode::Poll, FEED).await.unwrap();
    hub.subscribe("s2", FEED, SubscriptionMode::Push, "https://s2.example.org/cb")
        .await
        .unwrap();

    let published = hub.publish(message(FEED, "m1")).await.unwrap();

    let pushed = delivery.delivered().await;
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].target.subscriber_id, "s2");
    assert_eq!(pushed[0].target.target_uri, "https://s2.example.org/cb");
    assert_eq!(pushed[0].event.id(), published.id());

    assert_eq!(labels(&hub.pull("s1").await.unwrap()), vec!["m1"]);
}

#[tokio::test]
async fn test_pull_spans_feeds() {
    let (hub, _) = test_hub();
    hub.subscribe("s", FEED_A, SubscriptionMode::Poll, FEED_A).await.unwrap();
    hub.subscribe("s", FEED_B, SubscriptionMode::Poll, FEED_B).await.unwrap();

    hub.publish(message(FEED_A, "m1")).await.unwrap();
    hub.publish(message(FEED_B, "m2")).await.unwrap();

    assert_eq!(labels(&hub.pull("s").await.unwrap()), vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_last_unsubscribe_removes_feed() {
    let (hub, _) = test_hub();
    hub.subscribe("s", FEED, SubscriptionMode::Poll, FEED).await.unwrap();
    hub.publish(message(FEED, "m1")).await.unwrap();
    assert_eq!(hub.retained(FEED).await, Some(1));

    assert!(hub.unsubscribe("s", FEED).await.unwrap());

    assert!(hub.feed_uris().await.is_empty());
    assert!(hub.retained(FEED).await.is_none());
    assert!(hub.subscriber_ids().await.is_empty());
    assert!(hub.pull("s").await.unwrap_err().is_not_found());
}

// ─── Ingestion ───────────────────────────────────────────────────

#[tokio::test]
async fn test_publish_json_wire_form() {
    let (hub, _) = test_hub();
    hub.subscribe("s", FEED, SubscriptionMode::from_urn(POLL_URN).unwrap(), FEED)
        .await
        .unwrap();

    let json = serde_json::json!({
        "schemas": [EVENT_SCHEMA],
        "feedUris": [FEED],
        "publisherUri": "https://idm.example.org/scim",
        "resourceUris": ["https://idm.example.org/scim/Groups/7"],
        "type": "add",
        "attributes": ["members"],
        "values": {"members": [{"value": "44"}]}
    })
    .to_string();

    let published = hub.publish_json(&json).await.unwrap();
    assert!(published.id().is_some());

    let events = hub.pull("s").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), EventKind::Add);
    assert_eq!(events[0].values()["members"][0]["value"], "44");
}

#[tokio::test]
async fn test_publish_json_rejects_garbage() {
    let (hub, _) = test_hub();
    assert!(hub.publish_json("").await.unwrap_err().is_invalid_input());
    assert!(hub.publish_json("[]").await.unwrap_err().is_invalid_input());
    assert!(hub.feed_uris().await.is_empty());
}

// ─── Push Delivery ───────────────────────────────────────────────

#[tokio::test]
async fn test_channel_delivery_from_config() {
    let config = HubConfig {
        delivery_buffer: 4,
        ..Default::default()
    };
    let (hub, mut rx) = Manager::from_config_with_channel(config).await.unwrap();
    assert_eq!(hub.delivery_name(), "channel");

    hub.subscribe(
        "cb",
        FEED,
        SubscriptionMode::from_urn(WEB_CALLBACK_URN).unwrap(),
        "https://cb.example.org",
    )
    .await
    .unwrap();

    hub.publish(message(FEED, "m1")).await.unwrap();

    let notification = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.target.subscriber_id, "cb");
    assert_eq!(labels(&[notification.event]), vec!["m1"]);

    // push subscribers never cause retention
    assert_eq!(hub.retained(FEED).await, Some(0));
}

#[tokio::test]
async fn test_publish_succeeds_when_push_receiver_is_gone() {
    let (hub, rx) = Manager::from_config_with_channel(HubConfig::default())
        .await
        .unwrap();
    drop(rx);

    hub.subscribe("cb", FEED, SubscriptionMode::Push, "https://cb.example.org")
        .await
        .unwrap();
    assert!(hub.publish(message(FEED, "m1")).await.is_ok());
}

// ─── Persistence ─────────────────────────────────────────────────

#[tokio::test]
async fn test_state_file_survives_restart() {
    let path = temp_path();
    let config = HubConfig::default().with_state_path(&path);

    {
        let hub = Manager::from_config(config.clone(), MemoryDelivery::default())
            .await
            .unwrap();
        hub.subscribe("s1", FEED, SubscriptionMode::Poll, FEED).await.unwrap();
        hub.subscribe("s2", FEED, SubscriptionMode::Poll, FEED).await.unwrap();
        hub.publish(message(FEED, "m1")).await.unwrap();
        assert_eq!(labels(&hub.pull("s1").await.unwrap()), vec!["m1"]);
        hub.publish(message(FEED, "m2")).await.unwrap();
    }

    let stored = FileStateStore::new(&path).load().unwrap().unwrap();
    assert_eq!(stored.subscribers.len(), 2);
    assert_eq!(stored.feeds[0].events.len(), 2);

    let hub = Manager::from_config(config, MemoryDelivery::default())
        .await
        .unwrap();
    assert_eq!(hub.subscriber_ids().await, vec!["s1".to_string(), "s2".to_string()]);
    assert_eq!(labels(&hub.pull("s1").await.unwrap()), vec!["m2"]);
    assert_eq!(labels(&hub.pull("s2").await.unwrap()), vec!["m1", "m2"]);
    assert_eq!(hub.retained(FEED).await, Some(0));

    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
}

#[tokio::test]
async fn test_unsubscribe_all_is_persisted() {
    let path = temp_path();
    let config = HubConfig::default().with_state_path(&path);

    {
        let hub = Manager::from_config(config.clone(), MemoryDelivery::default())
            .await
            .unwrap();
        hub.subscribe("s", FEED_A, SubscriptionMode::Poll, FEED_A).await.unwrap();
        hub.subscribe("s", FEED_B, SubscriptionMode::Push, "https://cb").await.unwrap();
        assert!(hub.unsubscribe_all("s").await.unwrap());
    }

    let hub = Manager::from_config(config, MemoryDelivery::default())
        .await
        .unwrap();
    assert!(hub.subscriber_ids().await.is_empty());
    assert!(hub.feed_uris().await.is_empty());

    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
}

// ─── Concurrency ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publish_and_pull_loses_nothing() {
    let hub = Arc::new(Manager::new(MemoryDelivery::default()));
    hub.subscribe("reader", FEED, SubscriptionMode::Poll, FEED).await.unwrap();

    let mut publishers = Vec::new();
    for p in 0..4 {
        let hub = hub.clone();
        publishers.push(tokio::spawn(async move {
            for i in 0..50 {
                hub.publish(message(FEED, &format!("p{}-{}", p, i)))
                    .await
                    .unwrap();
            }
        }));
    }

    let reader = {
        let hub = hub.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..20 {
                seen.extend(hub.pull("reader").await.unwrap());
                tokio::task::yield_now().await;
            }
            seen
        })
    };

    for publisher in publishers {
        publisher.await.unwrap();
    }
    let mut seen = reader.await.unwrap();
    seen.extend(hub.pull("reader").await.unwrap());

    let mut ids: Vec<u64> = seen.iter().map(|e| e.id().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 200);
    assert_eq!(hub.retained(FEED).await, Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subscribe_creates_single_feed() {
    let hub = Arc::new(Manager::new(MemoryDelivery::default()));

    let mut handles = Vec::new();
    for i in 0..16 {
        let hub = hub.clone();
        handles.push(tokio::spawn(async move {
            hub.subscribe(&format!("s{}", i), FEED, SubscriptionMode::Poll, FEED)
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(hub.feed_uris().await, vec![FEED.to_string()]);
    assert_eq!(hub.subscriber_ids().await.len(), 16);

    hub.publish(message(FEED, "m1")).await.unwrap();
    for i in 0..16 {
        assert_eq!(hub.pull(&format!("s{}", i)).await.unwrap().len(), 1);
    }
    assert_eq!(hub.retained(FEED).await, Some(0));
}
