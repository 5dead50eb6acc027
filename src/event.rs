//! Event notification type and its JSON wire form
//!
//! All types use camelCase JSON serialization for wire compatibility.
//! An event must declare [`EVENT_SCHEMA`] in its `schemas` list; both the
//! builder and the deserializer enforce it.

use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical schema marker every event notification must carry
pub const EVENT_SCHEMA: &str = "urn:ietf:params:scim:schemas:notify:2.0:Event";

/// Kind of change an event notifies about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Add,
    Create,
    Activate,
    Modify,
    Deactivate,
    Delete,
    Remove,
    Password,
    Confirmation,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Add => "add",
            EventKind::Create => "create",
            EventKind::Activate => "activate",
            EventKind::Modify => "modify",
            EventKind::Deactivate => "deactivate",
            EventKind::Delete => "delete",
            EventKind::Remove => "remove",
            EventKind::Password => "password",
            EventKind::Confirmation => "confirmation",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(EventKind::Add),
            "create" => Ok(EventKind::Create),
            "activate" => Ok(EventKind::Activate),
            "modify" => Ok(EventKind::Modify),
            "deactivate" => Ok(EventKind::Deactivate),
            "delete" => Ok(EventKind::Delete),
            "remove" => Ok(EventKind::Remove),
            "password" => Ok(EventKind::Password),
            "confirmation" => Ok(EventKind::Confirmation),
            other => Err(HubError::InvalidInput(format!("Unknown event type: {}", other))),
        }
    }
}

/// A single event notification
///
/// Immutable once built. The hub assigns `id` when the event is published;
/// a freshly parsed or built event has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawEvent")]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,

    schemas: Vec<String>,

    /// Destination feeds
    feed_uris: Vec<String>,

    publisher_uri: String,

    /// Resources affected by the change
    resource_uris: Vec<String>,

    #[serde(rename = "type")]
    kind: EventKind,

    /// Names of changed attributes
    attributes: Vec<String>,

    /// Free-form payload
    values: serde_json::Map<String, serde_json::Value>,
}

/// Unvalidated wire form; converted into [`Event`] through `TryFrom`
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    schemas: Vec<String>,
    #[serde(default)]
    feed_uris: Vec<String>,
    publisher_uri: String,
    #[serde(default)]
    resource_uris: Vec<String>,
    #[serde(rename = "type")]
    kind: EventKind,
    #[serde(default)]
    attributes: Vec<String>,
    #[serde(default)]
    values: serde_json::Map<String, serde_json::Value>,
}

impl TryFrom<RawEvent> for Event {
    type Error = HubError;

    fn try_from(raw: RawEvent) -> Result<Self> {
        if !raw.schemas.iter().any(|s| s == EVENT_SCHEMA) {
            return Err(HubError::InvalidInput(format!(
                "Schemas must contain schema: {}",
                EVENT_SCHEMA
            )));
        }
        Ok(Self {
            id: raw.id,
            schemas: raw.schemas,
            feed_uris: raw.feed_uris,
            publisher_uri: raw.publisher_uri,
            resource_uris: raw.resource_uris,
            kind: raw.kind,
            attributes: raw.attributes,
            values: raw.values,
        })
    }
}

impl Event {
    /// Create a new event carrying the canonical schema and no destinations yet
    pub fn new(publisher_uri: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: None,
            schemas: vec![EVENT_SCHEMA.to_string()],
            feed_uris: Vec::new(),
            publisher_uri: publisher_uri.into(),
            resource_uris: Vec::new(),
            kind,
            attributes: Vec::new(),
            values: serde_json::Map::new(),
        }
    }

    /// Parse an event from its JSON wire form
    ///
    /// Any structural problem, including a missing schema marker or an
    /// unknown `type`, is reported as `InvalidInput`.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| HubError::InvalidInput(format!("Malformed event: {}", e)))
    }

    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Add a destination feed
    pub fn with_feed(mut self, feed_uri: impl Into<String>) -> Self {
        self.feed_uris.push(feed_uri.into());
        self
    }

    /// Add an affected resource
    pub fn with_resource(mut self, resource_uri: impl Into<String>) -> Self {
        self.resource_uris.push(resource_uri.into());
        self
    }

    /// Add a changed attribute name
    pub fn with_attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(name.into());
        self
    }

    /// Add a payload entry
    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Declare an additional schema next to the canonical one
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        if !self.schemas.contains(&schema) {
            self.schemas.push(schema);
        }
        self
    }

    pub(crate) fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Check that the event can be routed
    pub fn validate(&self) -> Result<()> {
        if !self.schemas.iter().any(|s| s == EVENT_SCHEMA) {
            return Err(HubError::InvalidInput(format!(
                "Schemas must contain schema: {}",
                EVENT_SCHEMA
            )));
        }
        if self.feed_uris.is_empty() {
            return Err(HubError::InvalidInput(
                "Event must name at least one feed".to_string(),
            ));
        }
        if self.feed_uris.iter().any(|uri| uri.is_empty()) {
            return Err(HubError::InvalidInput("Feed uri cannot be empty".to_string()));
        }
        if self.publisher_uri.is_empty() {
            return Err(HubError::InvalidInput(
                "Publisher uri cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Hub-assigned identity, absent until published
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn schemas(&self) -> &[String] {
        &self.schemas
    }

    pub fn feed_uris(&self) -> &[String] {
        &self.feed_uris
    }

    pub fn publisher_uri(&self) -> &str {
        &self.publisher_uri
    }

    pub fn resource_uris(&self) -> &[String] {
        &self.resource_uris
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn values(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.values
    }
}
