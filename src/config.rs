//! Hub configuration

use crate::error::{HubError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    /// JSON state file; persistence is off when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,

    /// Prefix for generated subscriber identifiers
    #[serde(default = "default_subscriber_id_prefix")]
    pub subscriber_id_prefix: String,

    /// Capacity of the in-process push channel
    #[serde(default = "default_delivery_buffer")]
    pub delivery_buffer: usize,
}

fn default_subscriber_id_prefix() -> String {
    "sbsc".into()
}

fn default_delivery_buffer() -> usize {
    1024
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            state_path: None,
            subscriber_id_prefix: default_subscriber_id_prefix(),
            delivery_buffer: default_delivery_buffer(),
        }
    }
}

impl HubConfig {
    /// Parse a JSON config document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| HubError::InvalidInput(format!("Invalid hub config: {}", e)))?;
        if config.subscriber_id_prefix.is_empty() {
            return Err(HubError::InvalidInput(
                "subscriberIdPrefix cannot be empty".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }
}
