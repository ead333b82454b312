//! Raw tracker events
//!
//! The shape in which an event source hands player lifecycle calls to the
//! tracker, and the validated per-call context the rules run against.

use crate::types::{keys, opt_f64, opt_str, InfoMap, Metadata};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

static METADATA_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.]+$").expect("metadata key pattern is valid"));

/// A raw lifecycle event as produced by the player integration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerEvent {
    #[serde(rename = "event.name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Event time in ms on the caller's clock
    #[serde(rename = "event.timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Caller correlation id, joined with the backend session id later
    #[serde(rename = "sessionid", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "event.param", default, skip_serializing_if = "Option::is_none")]
    pub info: Option<InfoMap>,
    #[serde(rename = "event.metadata", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Option<String>>>,
}

impl TrackerEvent {
    pub fn new(name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: Some(name.into()),
            timestamp: Some(timestamp),
            ..Default::default()
        }
    }

    pub fn with_info(mut self, info: InfoMap) -> Self {
        self.info = Some(info);
        self
    }

    pub fn with_metadata<K, V>(mut self, metadata: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata = Some(
            metadata
                .into_iter()
                .map(|(k, v)| (k.into(), Some(v.into())))
                .collect(),
        );
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Tracker rules, one per event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleName {
    MediaStart,
    MediaComplete,
    MediaSkip,
    AdBreakStart,
    AdBreakComplete,
    AdStart,
    AdComplete,
    AdSkip,
    ChapterStart,
    ChapterComplete,
    ChapterSkip,
    Play,
    Pause,
    SeekStart,
    SeekComplete,
    BufferStart,
    BufferComplete,
    BitrateChange,
    QoEUpdate,
    Error,
    PlayheadUpdate,
    StateStart,
    StateEnd,
}

impl RuleName {
    pub const ALL: [RuleName; 23] = [
        RuleName::MediaStart,
        RuleName::MediaComplete,
        RuleName::MediaSkip,
        RuleName::AdBreakStart,
        RuleName::AdBreakComplete,
        RuleName::AdStart,
        RuleName::AdComplete,
        RuleName::AdSkip,
        RuleName::ChapterStart,
        RuleName::ChapterComplete,
        RuleName::ChapterSkip,
        RuleName::Play,
        RuleName::Pause,
        RuleName::SeekStart,
        RuleName::SeekComplete,
        RuleName::BufferStart,
        RuleName::BufferComplete,
        RuleName::BitrateChange,
        RuleName::QoEUpdate,
        RuleName::Error,
        RuleName::PlayheadUpdate,
        RuleName::StateStart,
        RuleName::StateEnd,
    ];

    /// Event name that selects this rule
    pub fn event_name(&self) -> &'static str {
        match self {
            RuleName::MediaStart => "sessionstart",
            RuleName::MediaComplete => "complete",
            RuleName::MediaSkip => "sessionend",
            RuleName::AdBreakStart => "adbreakstart",
            RuleName::AdBreakComplete => "adbreakcomplete",
            RuleName::AdStart => "adstart",
            RuleName::AdComplete => "adcomplete",
            RuleName::AdSkip => "adskip",
            RuleName::ChapterStart => "chapterstart",
            RuleName::ChapterComplete => "chaptercomplete",
            RuleName::ChapterSkip => "chapterskip",
            RuleName::Play => "play",
            RuleName::Pause => "pause",
            RuleName::SeekStart => "seekstart",
            RuleName::SeekComplete => "seekcomplete",
            RuleName::BufferStart => "bufferstart",
            RuleName::BufferComplete => "buffercomplete",
            RuleName::BitrateChange => "bitratechange",
            RuleName::QoEUpdate => "qoeupdate",
            RuleName::Error => "error",
            RuleName::PlayheadUpdate => "playheadupdate",
            RuleName::StateStart => "statestart",
            RuleName::StateEnd => "stateend",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|rule| rule.event_name() == name)
    }
}

impl std::fmt::Display for RuleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Validated data of the event currently being processed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventContext {
    pub ts: i64,
    pub session_id: Option<String>,
    pub info: Option<InfoMap>,
    pub metadata: Option<Metadata>,
}

impl EventContext {
    pub fn new(ts: i64) -> Self {
        Self {
            ts,
            ..Default::default()
        }
    }

    pub fn metadata(&self) -> Metadata {
        self.metadata.clone().unwrap_or_default()
    }

    /// Playhead carried by the event, if any
    pub fn playhead(&self) -> Option<f64> {
        self.info.as_ref().and_then(|info| opt_f64(info, keys::PLAYHEAD))
    }

    pub fn error_id(&self) -> Option<&str> {
        self.info.as_ref().and_then(|info| opt_str(info, keys::ERROR_ID))
    }
}

/// Drop metadata entries with a missing value or a key outside `[A-Za-z0-9_.]`
pub fn clean_metadata(metadata: &HashMap<String, Option<String>>) -> Metadata {
    let mut cleaned = Metadata::new();
    for (key, value) in metadata {
        let Some(value) = value else {
            debug!(%key, "Dropping metadata entry with null value");
            continue;
        };
        if !METADATA_KEY_PATTERN.is_match(key) {
            debug!(
                %key,
                %value,
                "Dropping metadata entry; key should contain only alphabets, digits, '_' and '.'"
            );
            continue;
        }
        cleaned.insert(key.clone(), value.clone());
    }
    cleaned
}
