//! Performance benchmarks for notify-hub
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use notify_hub::{Event, EventKind, Feed, Manager, NoopDelivery, Subscriber, Subscription, SubscriptionMode};
use std::sync::Arc;

const FEED: &str = "https://hub.example.org/feeds/mailman";

fn sample_event(i: u64) -> Event {
    Event::new("https://idm.example.org/scim", EventKind::Modify)
        .with_feed(FEED)
        .with_resource(format!("https://idm.example.org/scim/Users/{}", i))
        .with_attribute("emails")
        .with_value("i", serde_json::json!(i))
}

fn bench_event_parsing(c: &mut Criterion) {
    let json = sample_event(1).to_json().unwrap();
    c.bench_function("Event::from_json", |b| {
        b.iter(|| Event::from_json(&json).unwrap());
    });
}

fn bench_feed_ingest_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("feed_ingest_drain");
    for pollers in [1usize, 10, 100] {
        group.bench_function(format!("{} pollers, 100 events", pollers), |b| {
            b.iter(|| {
                let mut feed = Feed::new(FEED);
                for p in 0..pollers {
                    let mut s = Subscriber::new(format!("p{}", p));
                    s.add_subscription(Subscription::new(FEED, SubscriptionMode::Poll, FEED))
                        .unwrap();
                    feed.add_subscriber(&s).unwrap();
                }
                for i in 0..100 {
                    feed.ingest(Arc::new(sample_event(i)));
                    let reader = format!("p{}", i as usize % pollers);
                    feed.drain(&reader).unwrap();
                }
                feed.retained()
            });
        });
    }
    group.finish();
}

fn bench_publish_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("publish_throughput");
    for count in [10u64, 100, 1000] {
        group.bench_function(format!("{} events", count), |b| {
            b.to_async(&rt).iter(|| async {
                let hub = Manager::new(NoopDelivery);
                hub.subscribe("poller", FEED, SubscriptionMode::Poll, FEED)
                    .await
                    .unwrap();
                hub.subscribe("cb", FEED, SubscriptionMode::Push, "https://cb")
                    .await
                    .unwrap();
                for i in 0..count {
                    hub.publish(sample_event(i)).await.unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_pull(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("pull (1000 retained)", |b| {
        b.to_async(&rt).iter(|| async {
            let hub = Manager::new(NoopDelivery);
            hub.subscribe("poller", FEED, SubscriptionMode::Poll, FEED)
                .await
                .unwrap();
            for i in 0..1000 {
                hub.publish(sample_event(i)).await.unwrap();
            }
            hub.pull("poller").await.unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_event_parsing,
    bench_feed_ingest_drain,
    bench_publish_throughput,
    bench_pull,
);
criterion_main!(benches);
