//! Shared delivery state
//!
//! Privacy status, connectivity and the tracking configuration snapshot the
//! senders consult before every request.

use crate::config::TrackingConfig;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

/// User privacy status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    OptIn,
    OptOut,
    #[default]
    Unknown,
}

impl PrivacyStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "optin" | "optedin" => Some(PrivacyStatus::OptIn),
            "optout" | "optedout" => Some(PrivacyStatus::OptOut),
            "unknown" => Some(PrivacyStatus::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for PrivacyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivacyStatus::OptIn => write!(f, "optin"),
            PrivacyStatus::OptOut => write!(f, "optout"),
            PrivacyStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Source of privacy, connectivity and tracking configuration
pub trait StateProvider: Send + Sync {
    fn privacy_status(&self) -> PrivacyStatus;

    fn is_connected(&self) -> bool;

    /// Snapshot of the current tracking configuration
    fn tracking_config(&self) -> TrackingConfig;
}

#[derive(Debug)]
struct MediaStateInner {
    privacy: PrivacyStatus,
    connected: bool,
    config: TrackingConfig,
}

/// Mutable `StateProvider` updated by the host
#[derive(Debug)]
pub struct MediaState {
    inner: RwLock<MediaStateInner>,
}

impl MediaState {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            inner: RwLock::new(MediaStateInner {
                privacy: PrivacyStatus::Unknown,
                connected: true,
                config,
            }),
        }
    }

    pub fn set_privacy_status(&self, status: PrivacyStatus) {
        let mut inner = self.inner.write();
        if inner.privacy != status {
            info!(from = %inner.privacy, to = %status, "Privacy status changed");
            inner.privacy = status;
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.write().connected = connected;
    }

    /// Update the tracking configuration in place
    pub fn update_tracking_config(&self, update: impl FnOnce(&mut TrackingConfig)) {
        update(&mut self.inner.write().config);
    }
}

impl Default for MediaState {
    fn default() -> Self {
        Self::new(TrackingConfig::default())
    }
}

impl StateProvider for MediaState {
    fn privacy_status(&self) -> PrivacyStatus {
        self.inner.read().privacy
    }

    fn is_connected(&self) -> bool {
        self.inner.read().connected
    }

    fn tracking_config(&self) -> TrackingConfig {
        self.inner.read().config.clone()
    }
}
