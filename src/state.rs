//! Hub state persistence
//!
//! Provides pluggable persistence for the manager's registries so feeds,
//! subscribers and poll offsets survive process restarts. The `Manager`
//! saves after every state-changing operation and restores on demand when
//! a `StateStore` is configured.

use crate::error::{HubError, Result};
use crate::feed::FeedSnapshot;
use crate::subscription::Subscriber;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything needed to rebuild a manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubSnapshot {
    /// Next hub-assigned event id
    #[serde(default)]
    pub next_event_id: u64,

    #[serde(default)]
    pub subscribers: Vec<Subscriber>,

    #[serde(default)]
    pub feeds: Vec<FeedSnapshot>,
}

/// Trait for persisting hub state
pub trait StateStore: Send + Sync {
    /// Replace the stored state
    fn save(&self, snapshot: &HubSnapshot) -> Result<()>;

    /// Load the stored state, `None` if nothing was saved yet
    fn load(&self) -> Result<Option<HubSnapshot>>;
}

/// Keeps the snapshot as pretty-printed JSON in a single file
///
/// A save goes to a sibling `.tmp` file first and is renamed over the
/// state file, so readers see either the old or the new snapshot.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn save(&self, snapshot: &HubSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        let staged = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HubError::Storage(format!(
                    "Could not create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        std::fs::write(&staged, json)
            .and_then(|()| std::fs::rename(&staged, &self.path))
            .map_err(|e| {
                HubError::Storage(format!(
                    "Could not store hub state at {}: {}",
                    self.path.display(),
                    e
                ))
            })?;

        tracing::debug!(
            path = %self.path.display(),
            feeds = snapshot.feeds.len(),
            subscribers = snapshot.subscribers.len(),
            "State saved"
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<HubSnapshot>> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HubError::Storage(format!(
                    "Could not read hub state at {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let snapshot = serde_json::from_str::<HubSnapshot>(&json).map_err(|e| {
            HubError::Storage(format!(
                "Hub state at {} is not a valid snapshot: {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!(
            path = %self.path.display(),
            feeds = snapshot.feeds.len(),
            subscribers = snapshot.subscribers.len(),
            "State loaded"
        );
        Ok(Some(snapshot))
    }
}

/// In-memory state store for testing
#[derive(Default)]
pub struct MemoryStateStore {
    state: std::sync::RwLock<Option<HubSnapshot>>,
}

impl StateStore for MemoryStateStore {
    fn save(&self, snapshot: &HubSnapshot) -> Result<()> {
        let mut state = self.state.write().map_err(|e| {
            HubError::Storage(format!("Failed to acquire state lock: {}", e))
        })?;
        *state = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<HubSnapshot>> {
        let state = self.state.read().map_err(|e| {
            HubError::Storage(format!("Failed to acquire state lock: {}", e))
        })?;
        Ok(state.clone())
    }
}
