//! Configuration
//!
//! `TrackerConfig` is per tracker instance, `TrackingConfig` is the shared
//! backend/identity snapshot the senders read before every request, and
//! `SenderConfig` tunes delivery.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-tracker configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Content is played back from a download; selects the offline ping interval
    pub downloaded_content: bool,
    /// Channel override reported on session start
    pub channel: Option<String>,
}

/// Backend and identity configuration required to deliver hits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Media collection server host
    pub collection_server: Option<String>,
    /// Analytics tracking server host
    pub analytics_server: Option<String>,
    pub report_suite_id: Option<String>,
    /// Experience cloud organization id
    pub org_id: Option<String>,
    /// Marketing cloud visitor id
    pub visitor_id: Option<String>,
    pub ssl: bool,
    pub analytics_visitor_id: Option<String>,
    pub aid: Option<String>,
    pub location_hint: Option<i64>,
    /// Default channel when the tracker does not set one
    pub channel: Option<String>,
    pub player_name: Option<String>,
    pub app_version: Option<String>,
    /// Sent as a validation header when present
    pub validation_token: Option<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            collection_server: None,
            analytics_server: None,
            report_suite_id: None,
            org_id: None,
            visitor_id: None,
            ssl: true,
            analytics_visitor_id: None,
            aid: None,
            location_hint: None,
            channel: None,
            player_name: None,
            app_version: None,
            validation_token: None,
        }
    }
}

impl TrackingConfig {
    /// Name of the first required field that is missing or empty
    pub fn missing_field(&self) -> Option<&'static str> {
        let required = [
            ("collection_server", &self.collection_server),
            ("analytics_server", &self.analytics_server),
            ("report_suite_id", &self.report_suite_id),
            ("org_id", &self.org_id),
            ("visitor_id", &self.visitor_id),
        ];
        required
            .into_iter()
            .find(|(_, value)| value.as_deref().map_or(true, str::is_empty))
            .map(|(name, _)| name)
    }

    pub fn is_complete(&self) -> bool {
        self.missing_field().is_none()
    }
}

/// Delivery tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Interval between sender queue sweeps (ms)
    pub tick_interval_ms: u64,
    /// Connect and read timeout for each request (seconds)
    pub http_timeout_secs: u64,
    /// Additional attempts for a failed session start before the session is abandoned
    pub session_start_retries: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 250,
            http_timeout_secs: 5,
            session_start_retries: 2,
        }
    }
}

/// Complete configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub tracker: TrackerConfig,
    pub tracking: TrackingConfig,
    pub sender: SenderConfig,
}

impl AnalyticsConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    fn validate(&self) -> Result<()> {
        if self.sender.tick_interval_ms == 0 {
            return Err(Error::InvalidConfig("tick_interval_ms must be greater than zero".into()));
        }
        if self.sender.http_timeout_secs == 0 {
            return Err(Error::InvalidConfig("http_timeout_secs must be greater than zero".into()));
        }
        Ok(())
    }
}
