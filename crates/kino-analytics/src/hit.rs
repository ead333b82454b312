//! Media hits
//!
//! A hit is one discrete analytics record produced by the hit generator and
//! queued for delivery by the session registry.

use crate::types::Metadata;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key/value payload of a hit (params or QoE data)
pub type HitParams = Map<String, Value>;

/// Hit event types understood by the collection backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HitEventType {
    SessionStart,
    SessionComplete,
    SessionEnd,
    AdBreakStart,
    AdBreakComplete,
    AdStart,
    AdComplete,
    AdSkip,
    ChapterStart,
    ChapterComplete,
    ChapterSkip,
    Play,
    Ping,
    BufferStart,
    PauseStart,
    BitrateChange,
    Error,
    StateStart,
    StateEnd,
}

impl HitEventType {
    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            HitEventType::SessionStart => "sessionStart",
            HitEventType::SessionComplete => "sessionComplete",
            HitEventType::SessionEnd => "sessionEnd",
            HitEventType::AdBreakStart => "adBreakStart",
            HitEventType::AdBreakComplete => "adBreakComplete",
            HitEventType::AdStart => "adStart",
            HitEventType::AdComplete => "adComplete",
            HitEventType::AdSkip => "adSkip",
            HitEventType::ChapterStart => "chapterStart",
            HitEventType::ChapterComplete => "chapterComplete",
            HitEventType::ChapterSkip => "chapterSkip",
            HitEventType::Play => "play",
            HitEventType::Ping => "ping",
            HitEventType::BufferStart => "bufferStart",
            HitEventType::PauseStart => "pauseStart",
            HitEventType::BitrateChange => "bitrateChange",
            HitEventType::Error => "error",
            HitEventType::StateStart => "stateStart",
            HitEventType::StateEnd => "stateEnd",
        }
    }
}

impl std::fmt::Display for HitEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analytics hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaHit {
    pub event_type: HitEventType,
    pub params: HitParams,
    pub custom_metadata: Metadata,
    /// QoE payload, empty unless it changed since it was last attached
    pub qoe_data: HitParams,
    /// Playhead in seconds when the hit was generated
    pub playhead: f64,
    /// Caller-supplied event timestamp (ms)
    pub ts: i64,
}

impl MediaHit {
    pub fn new(
        event_type: HitEventType,
        params: HitParams,
        custom_metadata: Metadata,
        qoe_data: HitParams,
        playhead: f64,
        ts: i64,
    ) -> Self {
        Self {
            event_type,
            params,
            custom_metadata,
            qoe_data,
            playhead,
            ts,
        }
    }

    pub fn is_session_start(&self) -> bool {
        self.event_type == HitEventType::SessionStart
    }
}
