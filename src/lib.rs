//! # notify-hub
//!
//! SCIM event notification hub: publishers emit change events tagged with
//! destination feeds; subscribers receive them pushed as they arrive, or
//! pull whatever they have not seen yet.
//!
//! ## Quick Start
//!
//! ```rust
//! use notify_hub::{Event, EventKind, Manager, NoopDelivery, SubscriptionMode};
//!
//! # async fn example() -> notify_hub::Result<()> {
//! let hub = Manager::new(NoopDelivery);
//!
//! let feed = "https://hub.example.org/feeds/mailman";
//! hub.subscribe("analyst", feed, SubscriptionMode::Poll, feed).await?;
//!
//! hub.publish(
//!     Event::new("https://idm.example.org/scim", EventKind::Modify)
//!         .with_feed(feed)
//!         .with_resource("https://idm.example.org/scim/Users/44")
//!         .with_attribute("emails"),
//! )
//! .await?;
//!
//! let events = hub.pull("analyst").await?;
//! assert_eq!(events.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Feed** — per-topic retention queue; tracks each poll subscriber's
//!   read position and lazily drops events everybody has seen
//! - **Manager** — routes events to feeds, owns subscriber/feed lifecycle,
//!   aggregates pulls across a subscriber's feeds
//! - **PushDelivery** trait — best-effort transport for push subscribers
//! - **StateStore** trait — write-through persistence of the hub state

pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod feed;
pub mod manager;
pub mod state;
pub mod subscription;

// Re-export core types
pub use config::HubConfig;
pub use delivery::{
    ChannelDelivery, MemoryDelivery, NoopDelivery, PushDelivery, PushNotification, PushTarget,
};
pub use error::{HubError, Result};
pub use event::{Event, EventKind, EVENT_SCHEMA};
pub use feed::{Feed, FeedSnapshot, RetainedEvent};
pub use manager::Manager;
pub use state::{FileStateStore, HubSnapshot, MemoryStateStore, StateStore};
pub use subscription::{Subscriber, Subscription, SubscriptionMode, POLL_URN, WEB_CALLBACK_URN};
