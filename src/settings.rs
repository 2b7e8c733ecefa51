//! Persisted station configuration.
//!
//! A KDS station carries a handful of settings that survive restarts: the
//! station name announced to the feed (the browser clients kept this in
//! localStorage), the feed URL, and the timing knobs for reconnect and
//! pending-action expiry. They live in a single JSON file next to the
//! binary; a missing file or missing field falls back to defaults so a
//! factory-fresh station comes up unconfigured but working.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::error::KdsError;

/// Station name used when none has been configured yet.
pub const DEFAULT_STATION_NAME: &str = "NONE";

fn default_station_name() -> String {
    DEFAULT_STATION_NAME.to_string()
}

fn default_feed_url() -> String {
    "ws://127.0.0.1:9999".to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    3
}

fn default_pending_action_timeout_secs() -> u64 {
    10
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationSettings {
    /// Identity announced via `init_station` on every (re)connect.
    #[serde(default = "default_station_name")]
    pub station_name: String,

    /// Push-feed endpoint.
    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    /// Fixed delay between reconnect attempts.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// How long an optimistic action overrides the feed before it is assumed
    /// lost and the next snapshot wins again.
    #[serde(default = "default_pending_action_timeout_secs")]
    pub pending_action_timeout_secs: u64,

    /// Age-band recomputation cadence.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for StationSettings {
    fn default() -> Self {
        Self {
            station_name: default_station_name(),
            feed_url: default_feed_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            pending_action_timeout_secs: default_pending_action_timeout_secs(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl StationSettings {
    /// Load settings from `path`. A missing file yields defaults; a file
    /// that fails to parse is treated the same way after a warning, so a
    /// corrupted settings file never keeps the display from starting.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No settings file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read settings, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str::<Self>(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Settings file unparsable, using defaults");
                Self::default()
            }
        }
    }

    /// Write settings to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), KdsError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| KdsError::Settings(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| KdsError::Settings(format!("write {}: {e}", path.display())))
    }
}
