//! Core types for Kino Analytics
//!
//! Descriptors for the media, ad break, ad, chapter, QoE and custom state
//! payloads carried by tracker events. Each descriptor parses from the raw
//! info object of an event and serializes back to the same keys.

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use uuid::Uuid;

/// Raw info payload attached to a tracker event
pub type InfoMap = Map<String, Value>;

/// String-valued metadata attached to media, ads and chapters
pub type Metadata = BTreeMap<String, String>;

/// Maximum number of distinct custom states tracked per session
pub const STATE_LIMIT: usize = 10;

/// Preroll wait time applied when the media info does not carry one (ms)
pub const DEFAULT_PREROLL_WAIT_TIME_MS: i64 = 250;

static STATE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.]{1,64}$").expect("state name pattern is valid")
});

/// Info payload keys
pub mod keys {
    pub const MEDIA_ID: &str = "media.id";
    pub const MEDIA_NAME: &str = "media.name";
    pub const MEDIA_LENGTH: &str = "media.length";
    pub const MEDIA_TYPE: &str = "media.type";
    pub const MEDIA_STREAM_TYPE: &str = "media.streamtype";
    pub const MEDIA_RESUMED: &str = "media.resumed";
    pub const MEDIA_PREROLL_WAIT_TIME: &str = "media.prerollwaitingtime";
    pub const MEDIA_GRANULAR_AD_TRACKING: &str = "media.granularadtracking";

    pub const AD_BREAK_NAME: &str = "adbreak.name";
    pub const AD_BREAK_POSITION: &str = "adbreak.position";
    pub const AD_BREAK_START_TIME: &str = "adbreak.starttime";

    pub const AD_ID: &str = "ad.id";
    pub const AD_NAME: &str = "ad.name";
    pub const AD_POSITION: &str = "ad.position";
    pub const AD_LENGTH: &str = "ad.length";

    pub const CHAPTER_NAME: &str = "chapter.name";
    pub const CHAPTER_POSITION: &str = "chapter.position";
    pub const CHAPTER_START_TIME: &str = "chapter.starttime";
    pub const CHAPTER_LENGTH: &str = "chapter.length";

    pub const QOE_BITRATE: &str = "qoe.bitrate";
    pub const QOE_DROPPED_FRAMES: &str = "qoe.droppedframes";
    pub const QOE_FPS: &str = "qoe.fps";
    pub const QOE_STARTUP_TIME: &str = "qoe.startuptime";

    pub const STATE_NAME: &str = "state.name";

    pub const ERROR_ID: &str = "error.id";
    pub const PLAYHEAD: &str = "time.playhead";
}

/// Unique identifier for a local tracking session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Playback states a tracked player can be in
///
/// Play, Pause, Stall and Init are mutually exclusive; Buffer and Seek are
/// flags layered on top of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    Init,
    Play,
    Pause,
    Buffer,
    Seek,
    Stall,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Init => write!(f, "Init"),
            PlaybackState::Play => write!(f, "Play"),
            PlaybackState::Pause => write!(f, "Pause"),
            PlaybackState::Buffer => write!(f, "Buffer"),
            PlaybackState::Seek => write!(f, "Seek"),
            PlaybackState::Stall => write!(f, "Stall"),
        }
    }
}

/// Media content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("audio") {
            Some(MediaType::Audio)
        } else if value.eq_ignore_ascii_case("video") {
            Some(MediaType::Video)
        } else {
            None
        }
    }
}

/// Main content descriptor passed with session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub name: String,
    pub stream_type: String,
    pub media_type: MediaType,
    /// Content length in seconds
    pub length: f64,
    pub resumed: bool,
    /// Grace period after session start during which events are queued (ms)
    pub preroll_wait_time: i64,
    pub granular_ad_tracking: bool,
}

impl MediaInfo {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        stream_type: impl Into<String>,
        media_type: MediaType,
        length: f64,
    ) -> Result<Self> {
        let info = Self {
            id: id.into(),
            name: name.into(),
            stream_type: stream_type.into(),
            media_type,
            length,
            resumed: false,
            preroll_wait_time: DEFAULT_PREROLL_WAIT_TIME_MS,
            granular_ad_tracking: false,
        };
        info.validate()?;
        Ok(info)
    }

    pub fn with_resumed(mut self, resumed: bool) -> Self {
        self.resumed = resumed;
        self
    }

    pub fn with_preroll_wait_time(mut self, wait_ms: i64) -> Self {
        self.preroll_wait_time = wait_ms;
        self
    }

    pub fn with_granular_ad_tracking(mut self, enabled: bool) -> Self {
        self.granular_ad_tracking = enabled;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::invalid("MediaInfo", "id must not be empty"));
        }
        if self.name.is_empty() {
            return Err(Error::invalid("MediaInfo", "name must not be empty"));
        }
        if self.stream_type.is_empty() {
            return Err(Error::invalid("MediaInfo", "stream type must not be empty"));
        }
        if self.length < 0.0 {
            return Err(Error::invalid("MediaInfo", "length must not be less than zero"));
        }
        Ok(())
    }

    pub fn from_info(info: &InfoMap) -> Result<Self> {
        let media_type = opt_str(info, keys::MEDIA_TYPE)
            .and_then(MediaType::parse)
            .ok_or_else(|| Error::invalid("MediaInfo", "invalid media type"))?;

        let parsed = Self {
            id: opt_str(info, keys::MEDIA_ID).unwrap_or_default().to_string(),
            name: opt_str(info, keys::MEDIA_NAME).unwrap_or_default().to_string(),
            stream_type: opt_str(info, keys::MEDIA_STREAM_TYPE)
                .unwrap_or_default()
                .to_string(),
            media_type,
            length: opt_f64(info, keys::MEDIA_LENGTH).unwrap_or(-1.0),
            resumed: opt_bool(info, keys::MEDIA_RESUMED).unwrap_or(false),
            preroll_wait_time: opt_i64(info, keys::MEDIA_PREROLL_WAIT_TIME)
                .unwrap_or(DEFAULT_PREROLL_WAIT_TIME_MS),
            granular_ad_tracking: opt_bool(info, keys::MEDIA_GRANULAR_AD_TRACKING)
                .unwrap_or(false),
        };
        parsed.validate()?;
        Ok(parsed)
    }
}

/// Ad break (pod) descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdBreakInfo {
    pub name: String,
    /// 1-based index of the break within the content
    pub position: i64,
    /// Playhead at which the break starts (seconds)
    pub start_time: f64,
}

impl AdBreakInfo {
    pub fn new(name: impl Into<String>, position: i64, start_time: f64) -> Result<Self> {
        let info = Self {
            name: name.into(),
            position,
            start_time,
        };
        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid("AdBreakInfo", "name must not be empty"));
        }
        if self.position < 1 {
            return Err(Error::invalid("AdBreakInfo", "position must be greater than zero"));
        }
        if self.start_time < 0.0 {
            return Err(Error::invalid("AdBreakInfo", "start time must not be less than zero"));
        }
        Ok(())
    }

    pub fn from_info(info: &InfoMap) -> Result<Self> {
        let parsed = Self {
            name: opt_str(info, keys::AD_BREAK_NAME).unwrap_or_default().to_string(),
            position: opt_i64(info, keys::AD_BREAK_POSITION).unwrap_or(-1),
            start_time: opt_f64(info, keys::AD_BREAK_START_TIME).unwrap_or(-1.0),
        };
        parsed.validate()?;
        Ok(parsed)
    }
}

/// Individual ad descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdInfo {
    pub id: String,
    pub name: String,
    /// 1-based position of the ad within its break
    pub position: i64,
    /// Ad length in seconds
    pub length: f64,
}

impl AdInfo {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        position: i64,
        length: f64,
    ) -> Result<Self> {
        let info = Self {
            id: id.into(),
            name: name.into(),
            position,
            length,
        };
        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::invalid("AdInfo", "id must not be empty"));
        }
        if self.name.is_empty() {
            return Err(Error::invalid("AdInfo", "name must not be empty"));
        }
        if self.position < 1 {
            return Err(Error::invalid("AdInfo", "position must be greater than zero"));
        }
        if self.length < 0.0 {
            return Err(Error::invalid("AdInfo", "length cannot be less than zero"));
        }
        Ok(())
    }

    pub fn from_info(info: &InfoMap) -> Result<Self> {
        let parsed = Self {
            id: opt_str(info, keys::AD_ID).unwrap_or_default().to_string(),
            name: opt_str(info, keys::AD_NAME).unwrap_or_default().to_string(),
            position: opt_i64(info, keys::AD_POSITION).unwrap_or(-1),
            length: opt_f64(info, keys::AD_LENGTH).unwrap_or(-1.0),
        };
        parsed.validate()?;
        Ok(parsed)
    }
}

/// Chapter (segment of main content) descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterInfo {
    pub name: String,
    pub position: i64,
    pub start_time: f64,
    pub length: f64,
}

impl ChapterInfo {
    pub fn new(name: impl Into<String>, position: i64, start_time: f64, length: f64) -> Result<Self> {
        let info = Self {
            name: name.into(),
            position,
            start_time,
            length,
        };
        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid("ChapterInfo", "name must not be empty"));
        }
        if self.position < 1 {
            return Err(Error::invalid("ChapterInfo", "position must be greater than zero"));
        }
        if self.start_time < 0.0 {
            return Err(Error::invalid("ChapterInfo", "start time must not be less than zero"));
        }
        if self.length < 0.0 {
            return Err(Error::invalid("ChapterInfo", "length must not be less than zero"));
        }
        Ok(())
    }

    pub fn from_info(info: &InfoMap) -> Result<Self> {
        let parsed = Self {
            name: opt_str(info, keys::CHAPTER_NAME).unwrap_or_default().to_string(),
            position: opt_i64(info, keys::CHAPTER_POSITION).unwrap_or(-1),
            start_time: opt_f64(info, keys::CHAPTER_START_TIME).unwrap_or(-1.0),
            length: opt_f64(info, keys::CHAPTER_LENGTH).unwrap_or(-1.0),
        };
        parsed.validate()?;
        Ok(parsed)
    }
}

/// Quality of experience snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QoeInfo {
    pub bitrate: f64,
    pub dropped_frames: f64,
    pub fps: f64,
    pub startup_time: f64,
}

impl QoeInfo {
    pub fn new(bitrate: f64, dropped_frames: f64, fps: f64, startup_time: f64) -> Result<Self> {
        let info = Self {
            bitrate,
            dropped_frames,
            fps,
            startup_time,
        };
        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> Result<()> {
        if self.bitrate < 0.0 {
            return Err(Error::invalid("QoEInfo", "bitrate must not be less than zero"));
        }
        if self.dropped_frames < 0.0 {
            return Err(Error::invalid("QoEInfo", "dropped frames must not be less than zero"));
        }
        if self.fps < 0.0 {
            return Err(Error::invalid("QoEInfo", "fps must not be less than zero"));
        }
        if self.startup_time < 0.0 {
            return Err(Error::invalid("QoEInfo", "startup time must not be less than zero"));
        }
        Ok(())
    }

    pub fn from_info(info: &InfoMap) -> Result<Self> {
        let parsed = Self {
            bitrate: opt_f64(info, keys::QOE_BITRATE).unwrap_or(-1.0),
            dropped_frames: opt_f64(info, keys::QOE_DROPPED_FRAMES).unwrap_or(-1.0),
            fps: opt_f64(info, keys::QOE_FPS).unwrap_or(-1.0),
            startup_time: opt_f64(info, keys::QOE_STARTUP_TIME).unwrap_or(-1.0),
        };
        parsed.validate()?;
        Ok(parsed)
    }
}

/// Custom player state (fullscreen, mute, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateInfo {
    pub name: String,
}

impl StateInfo {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid("StateInfo", "state name cannot be empty"));
        }
        if !STATE_NAME_PATTERN.is_match(&name) {
            return Err(Error::invalid(
                "StateInfo",
                "state name cannot contain special characters. Only alphabets, digits, '_' and '.' are allowed",
            ));
        }
        Ok(Self { name })
    }

    pub fn from_info(info: &InfoMap) -> Result<Self> {
        Self::new(opt_str(info, keys::STATE_NAME).unwrap_or_default())
    }
}

pub(crate) fn opt_str<'a>(info: &'a InfoMap, key: &str) -> Option<&'a str> {
    info.get(key).and_then(Value::as_str)
}

pub(crate) fn opt_f64(info: &InfoMap, key: &str) -> Option<f64> {
    info.get(key).and_then(Value::as_f64)
}

/// Integer value of `key`. Floats are accepted only when integral and in range.
pub(crate) fn opt_i64(info: &InfoMap, key: &str) -> Option<i64> {
    let value = info.get(key)?;
    value.as_i64().or_else(|| {
        let f = value.as_f64()?;
        // i64::MAX rounds up to 2^63 as f64
        let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
        (f.fract() == 0.0 && in_range).then_some(f as i64)
    })
}

pub(crate) fn opt_bool(info: &InfoMap, key: &str) -> Option<bool> {
    info.get(key).and_then(Value::as_bool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(value: Value) -> InfoMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_media_info_from_info() {
        let parsed = MediaInfo::from_info(&info(json!({
            "media.id": "id1",
            "media.name": "Episode 1",
            "media.streamtype": "vod",
            "media.type": "VIDEO",
            "media.length": 60.0,
        })))
        .unwrap();

        assert_eq!(parsed.media_type, MediaType::Video);
        assert_eq!(parsed.preroll_wait_time, DEFAULT_PREROLL_WAIT_TIME_MS);
        assert!(!parsed.granular_ad_tracking);
        assert!(!parsed.resumed);
    }

    #[test]
    fn test_media_info_rejects_bad_type() {
        let result = MediaInfo::from_info(&info(json!({
            "media.id": "id1",
            "media.name": "Episode 1",
            "media.streamtype": "vod",
            "media.type": "hologram",
            "media.length": 60.0,
        })));
        assert!(matches!(result, Err(Error::InvalidDescriptor { kind: "MediaInfo", .. })));
    }

    #[test]
    fn test_media_info_optional_fields() {
        let parsed = MediaInfo::from_info(&info(json!({
            "media.id": "id",
            "media.name": "name",
            "media.streamtype": "live",
            "media.type": "audio",
            "media.length": 0.0,
            "media.prerollwaitingtime": 0.0,
            "media.granularadtracking": true,
        })))
        .unwrap();
        let expected = MediaInfo::new("id", "name", "live", MediaType::Audio, 0.0)
            .unwrap()
            .with_preroll_wait_time(0)
            .with_granular_ad_tracking(true);
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_integer_fields_reject_fractions() {
        let map = info(json!({ "a": 2, "b": 2.0, "c": 1.5, "d": 1e20, "e": -3.0, "f": "2" }));
        assert_eq!(opt_i64(&map, "a"), Some(2));
        assert_eq!(opt_i64(&map, "b"), Some(2));
        assert_eq!(opt_i64(&map, "c"), None);
        assert_eq!(opt_i64(&map, "d"), None);
        assert_eq!(opt_i64(&map, "e"), Some(-3));
        assert_eq!(opt_i64(&map, "f"), None);
        assert_eq!(opt_i64(&map, "missing"), None);

        let fractional_position = AdBreakInfo::from_info(&info(json!({
            "adbreak.name": "preroll",
            "adbreak.position": 1.5,
            "adbreak.starttime": 0,
        })));
        assert!(fractional_position.is_err());
    }

    #[test]
    fn test_ad_info_validation() {
        assert!(AdInfo::new("ad1", "Ad", 1, 15.0).is_ok());
        assert!(AdInfo::new("", "Ad", 1, 15.0).is_err());
        assert!(AdInfo::new("ad1", "Ad", 0, 15.0).is_err());
        assert!(AdInfo::new("ad1", "Ad", 1, -1.0).is_err());
    }

    #[test]
    fn test_ad_break_missing_fields() {
        assert!(AdBreakInfo::from_info(&info(json!({ "adbreak.name": "preroll" }))).is_err());
        let parsed = AdBreakInfo::from_info(&info(json!({
            "adbreak.name": "preroll",
            "adbreak.position": 1,
            "adbreak.starttime": 0,
        })))
        .unwrap();
        assert_eq!(parsed.position, 1);
    }

    #[test]
    fn test_chapter_validation() {
        assert!(ChapterInfo::new("ch1", 1, 0.0, 30.0).is_ok());
        assert!(ChapterInfo::new("ch1", 1, -5.0, 30.0).is_err());
    }

    #[test]
    fn test_qoe_validation() {
        assert!(QoeInfo::new(1_000_000.0, 0.0, 30.0, 1.5).is_ok());
        assert!(QoeInfo::new(-1.0, 0.0, 30.0, 1.5).is_err());
        assert!(QoeInfo::from_info(&info(json!({ "qoe.bitrate": 10 }))).is_err());
    }

    #[test]
    fn test_state_name_pattern() {
        assert!(StateInfo::new("fullscreen").is_ok());
        assert!(StateInfo::new("closed_caption.v2").is_ok());
        assert!(StateInfo::new("a".repeat(64)).is_ok());
        assert!(StateInfo::new("a".repeat(65)).is_err());
        assert!(StateInfo::new("").is_err());
        assert!(StateInfo::new("picture-in-picture").is_err());
        assert!(StateInfo::new("mute!").is_err());
    }

    #[test]
    fn test_session_id_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
