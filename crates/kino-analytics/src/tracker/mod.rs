//! Session tracker
//!
//! Turns a stream of raw player events into legal transitions of a
//! `PlaybackContext` and feeds the resulting hits to a `SessionRegistry`.
//! On top of the rule table it detects long idle periods, splits sessions
//! that run past 24 hours, reports content start once main content has
//! played for a second, and holds back events for a short preroll window
//! after session start so a pending ad break wins over an early play.

pub mod event;
pub mod preroll;
pub mod rules;

use crate::config::TrackerConfig;
use crate::context::PlaybackContext;
use crate::hit_generator::HitGenerator;
use crate::registry::SessionRegistry;
use crate::rules::RuleEngine;
use crate::{Error, Result};
use event::{clean_metadata, EventContext, RuleName, TrackerEvent};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Idle time after which the session is closed (ms)
pub const IDLE_TIMEOUT_MS: i64 = 30 * 60 * 1000;

/// Session length after which a new session is started (ms)
pub const SESSION_TIMEOUT_MS: i64 = 24 * 60 * 60 * 1000;

/// Uninterrupted main content playback needed to report content start (ms)
pub const CONTENT_START_DURATION_MS: i64 = 1000;

const INVALID_TS: i64 = -1;

/// Mutable state the tracker rules operate on
pub struct TrackerState {
    pub(crate) event: EventContext,
    pub(crate) context: Option<PlaybackContext>,
    pub(crate) generator: Option<HitGenerator>,
    pub(crate) registry: Arc<dyn SessionRegistry>,
    pub(crate) config: TrackerConfig,

    is_tracker_idle: bool,
    is_media_idle: bool,
    media_idle_start_ts: i64,
    session_ref_ts: i64,

    content_started: bool,
    content_start_ref_ts: i64,

    in_preroll: bool,
    preroll_wait_time: i64,
    preroll_ref_ts: i64,
    preroll_queue: Vec<(RuleName, EventContext)>,
}

impl TrackerState {
    fn new(registry: Arc<dyn SessionRegistry>, config: TrackerConfig) -> Self {
        Self {
            event: EventContext::default(),
            context: None,
            generator: None,
            registry,
            config,
            is_tracker_idle: false,
            is_media_idle: false,
            media_idle_start_ts: INVALID_TS,
            session_ref_ts: INVALID_TS,
            content_started: false,
            content_start_ref_ts: INVALID_TS,
            in_preroll: false,
            preroll_wait_time: 0,
            preroll_ref_ts: INVALID_TS,
            preroll_queue: Vec::new(),
        }
    }

    pub(crate) fn start_session_clock(&mut self, ts: i64) {
        self.session_ref_ts = ts;
        self.is_tracker_idle = false;
        self.is_media_idle = false;
        self.media_idle_start_ts = INVALID_TS;
        self.reset_content_start();
    }

    pub(crate) fn open_preroll(&mut self, wait_time: i64, ts: i64) {
        self.in_preroll = wait_time > 0;
        self.preroll_wait_time = wait_time;
        self.preroll_ref_ts = ts;
        self.preroll_queue.clear();
    }

    pub(crate) fn close_session(&mut self) {
        self.context = None;
        self.generator = None;
        self.in_preroll = false;
        self.preroll_queue.clear();
    }

    fn reset_content_start(&mut self) {
        self.content_started = false;
        self.content_start_ref_ts = INVALID_TS;
    }

    /// Close the session after a long idle period and reopen it when
    /// playback resumes
    pub(crate) fn detect_idle(&mut self, ts: i64) {
        let (Some(ctx), Some(generator)) = (self.context.as_ref(), self.generator.as_mut()) else {
            return;
        };

        if ctx.is_idle() {
            if self.is_media_idle {
                let idle_ms = ts.saturating_sub(self.media_idle_start_ts);
                if !self.is_tracker_idle && idle_ms >= IDLE_TIMEOUT_MS {
                    debug!(idle_ms, "Media idle timeout, ending session");
                    generator.process_session_abort(ctx);
                    self.is_tracker_idle = true;
                }
            } else {
                self.is_media_idle = true;
                self.media_idle_start_ts = ts;
            }
            return;
        }

        if self.is_tracker_idle {
            debug!("Playback resumed after idle timeout, restarting session");
            generator.process_session_restart(ctx);
            self.is_tracker_idle = false;
            self.session_ref_ts = ts;
            self.content_started = false;
            self.content_start_ref_ts = INVALID_TS;
        }
        self.is_media_idle = false;
    }

    /// Split sessions that have been open for 24 hours
    pub(crate) fn detect_session_timeout(&mut self, ts: i64) {
        let session_ms = ts.saturating_sub(self.session_ref_ts);
        if self.is_tracker_idle || session_ms < SESSION_TIMEOUT_MS {
            return;
        }
        let (Some(ctx), Some(generator)) = (self.context.as_ref(), self.generator.as_mut()) else {
            return;
        };

        debug!(session_ms, "Session timeout, starting new session");
        generator.process_session_abort(ctx);
        generator.process_session_restart(ctx);
        self.session_ref_ts = ts;
        self.reset_content_start();
    }

    /// Report content start once main content played uninterrupted for
    /// `CONTENT_START_DURATION_MS`
    pub(crate) fn detect_content_start(&mut self, ts: i64) {
        if self.content_started {
            return;
        }
        let (Some(ctx), Some(generator)) = (self.context.as_ref(), self.generator.as_mut()) else {
            return;
        };
        if ctx.is_idle() {
            return;
        }

        if ctx.is_in_ad_break() {
            self.content_start_ref_ts = INVALID_TS;
            return;
        }

        if self.content_start_ref_ts == INVALID_TS {
            self.content_start_ref_ts = ts;
        }

        if ts.saturating_sub(self.content_start_ref_ts) >= CONTENT_START_DURATION_MS {
            trace!("Content started");
            generator.process_playback(ctx, true);
            self.content_started = true;
        }
    }
}

/// Validates raw events and drives a single media session at a time
pub struct SessionTracker {
    engine: RuleEngine<RuleName, TrackerState>,
    state: TrackerState,
}

impl SessionTracker {
    pub fn new(registry: Arc<dyn SessionRegistry>, config: TrackerConfig) -> Self {
        Self {
            engine: rules::build_engine(),
            state: TrackerState::new(registry, config),
        }
    }

    /// Track an event, logging rejections. Returns whether it was accepted.
    pub fn track(&mut self, event: &TrackerEvent) -> bool {
        match self.try_track(event) {
            Ok(()) => true,
            Err(Error::RuleRejected(message)) => {
                warn!(event = ?event.name, "{message}");
                false
            }
            Err(e) => {
                debug!(error = %e, "Dropping event");
                false
            }
        }
    }

    /// Track an event
    ///
    /// Events arriving inside the preroll window are queued and count as
    /// accepted; they are validated when the window closes.
    pub fn try_track(&mut self, event: &TrackerEvent) -> Result<()> {
        let name = event.name.as_deref().ok_or(Error::MissingEventName)?;
        let rule =
            RuleName::from_event_name(name).ok_or_else(|| Error::UnknownEvent(name.to_string()))?;
        let ts = event.timestamp.ok_or(Error::MissingTimestamp)?;

        if rule != RuleName::PlayheadUpdate {
            trace!(%rule, ts, "Tracking event");
        }

        let context = EventContext {
            ts,
            session_id: event.session_id.clone(),
            info: event.info.clone(),
            metadata: event.metadata.as_ref().map(clean_metadata),
        };

        if self.defer_preroll(rule, &context) {
            return Ok(());
        }
        self.dispatch(rule, context)
    }

    fn dispatch(&mut self, rule: RuleName, context: EventContext) -> Result<()> {
        self.state.event = context;
        let response = self.engine.process_rule(rule, &mut self.state);
        if response.valid {
            Ok(())
        } else {
            Err(Error::RuleRejected(response.message))
        }
    }

    /// Queue the event while the preroll window is open. Returns true when
    /// the event was consumed by the queue.
    fn defer_preroll(&mut self, rule: RuleName, context: &EventContext) -> bool {
        if !self.state.in_preroll || self.state.context.is_none() {
            return false;
        }

        self.state.preroll_queue.push((rule, context.clone()));

        let elapsed = context.ts.saturating_sub(self.state.preroll_ref_ts);
        let flush = elapsed >= self.state.preroll_wait_time
            || matches!(
                rule,
                RuleName::AdBreakStart | RuleName::MediaComplete | RuleName::MediaSkip
            );
        if flush {
            self.flush_preroll();
        }
        true
    }

    fn flush_preroll(&mut self) {
        self.state.in_preroll = false;
        let queue = std::mem::take(&mut self.state.preroll_queue);
        debug!(queued = queue.len(), "Flushing preroll queue");

        for (rule, context) in preroll::reorder(queue) {
            if let Err(e) = self.dispatch(rule, context) {
                warn!(%rule, error = %e, "Queued preroll event rejected");
            }
        }
    }

    pub fn is_tracker_idle(&self) -> bool {
        self.state.is_tracker_idle
    }

    pub fn in_preroll(&self) -> bool {
        self.state.in_preroll
    }

    /// Playback context of the active session
    pub fn context(&self) -> Option<&PlaybackContext> {
        self.state.context.as_ref()
    }

    /// Local id of the session hits are currently routed to
    pub fn session_id(&self) -> Option<crate::types::SessionId> {
        self.state.generator.as_ref().and_then(HitGenerator::session_id)
    }

    /// Drop the active session without emitting any hit
    pub fn reset(&mut self) {
        self.state.close_session();
        self.state.is_tracker_idle = false;
        self.state.is_media_idle = false;
        self.state.reset_content_start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hit::HitEventType;
    use crate::registry::HitRecorder;
    use serde_json::json;

    fn tracker() -> (SessionTracker, Arc<HitRecorder>) {
        let recorder = Arc::new(HitRecorder::new());
        let tracker = SessionTracker::new(recorder.clone(), TrackerConfig::default());
        (tracker, recorder)
    }

    fn media(wait: i64) -> serde_json::Map<String, serde_json::Value> {
        json!({
            "media.id": "m1",
            "media.name": "Movie",
            "media.length": 3600.0,
            "media.streamtype": "vod",
            "media.type": "video",
            "media.prerollwaitingtime": wait,
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn ad_break() -> serde_json::Map<String, serde_json::Value> {
        json!({ "adbreak.name": "preroll", "adbreak.position": 1, "adbreak.starttime": 0.0 })
            .as_object()
            .cloned()
            .unwrap()
    }

    fn event_types(recorder: &HitRecorder) -> Vec<HitEventType> {
        recorder.hits().iter().map(|h| h.event_type).collect()
    }

    #[test]
    fn test_missing_fields_rejected() {
        let (mut tracker, _) = tracker();

        let unnamed = TrackerEvent { timestamp: Some(0), ..Default::default() };
        assert!(matches!(tracker.try_track(&unnamed), Err(Error::MissingEventName)));

        let unknown = TrackerEvent::new("rewind", 0);
        assert!(matches!(tracker.try_track(&unknown), Err(Error::UnknownEvent(_))));

        let untimed = TrackerEvent { name: Some("play".into()), ..Default::default() };
        assert!(matches!(tracker.try_track(&untimed), Err(Error::MissingTimestamp)));
    }

    #[test]
    fn test_events_outside_session_rejected() {
        let (mut tracker, recorder) = tracker();
        let err = tracker.try_track(&TrackerEvent::new("play", 0)).unwrap_err();
        assert_eq!(err.to_string(), rules::messages::NOT_IN_MEDIA);
        assert!(!tracker.track(&TrackerEvent::new("play", 0)));
        assert_eq!(recorder.session_count(), 0);
    }

    #[test]
    fn test_second_session_start_rejected() {
        let (mut tracker, recorder) = tracker();
        let start = TrackerEvent::new("sessionstart", 0).with_info(media(0));
        assert!(tracker.track(&start));
        let err = tracker.try_track(&start).unwrap_err();
        assert_eq!(err.to_string(), rules::messages::IN_MEDIA);
        assert_eq!(recorder.session_count(), 1);
    }

    #[test]
    fn test_preroll_defers_until_ad_break() {
        let (mut tracker, recorder) = tracker();
        tracker.track(&TrackerEvent::new("sessionstart", 0).with_info(media(250)));
        assert!(tracker.in_preroll());

        assert!(tracker.track(&TrackerEvent::new("play", 10)));
        assert_eq!(event_types(&recorder), vec![HitEventType::SessionStart]);

        tracker.track(&TrackerEvent::new("adbreakstart", 20).with_info(ad_break()));
        assert!(!tracker.in_preroll());
        assert!(tracker.context().unwrap().is_in_ad_break());
        assert_eq!(
            event_types(&recorder),
            vec![HitEventType::SessionStart, HitEventType::AdBreakStart]
        );
    }

    #[test]
    fn test_preroll_flushes_after_wait_time() {
        let (mut tracker, recorder) = tracker();
        tracker.track(&TrackerEvent::new("sessionstart", 0).with_info(media(250)));
        tracker.track(&TrackerEvent::new("play", 10));
        tracker.track(&TrackerEvent::new("playheadupdate", 300));

        assert!(!tracker.in_preroll());
        assert!(tracker.context().unwrap().is_in_state(crate::types::PlaybackState::Play));
        assert_eq!(
            event_types(&recorder),
            vec![HitEventType::SessionStart, HitEventType::Play]
        );
    }

    #[test]
    fn test_reset_drops_session() {
        let (mut tracker, recorder) = tracker();
        tracker.track(&TrackerEvent::new("sessionstart", 0).with_info(media(0)));
        tracker.reset();
        assert!(tracker.context().is_none());
        assert!(tracker.track(&TrackerEvent::new("sessionstart", 10).with_info(media(0))));
        assert_eq!(recorder.session_count(), 2);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let (mut tracker, recorder) = tracker();
        tracker.track(&TrackerEvent::new("sessionstart", i64::MIN).with_info(media(0)));
        tracker.track(&TrackerEvent::new("play", i64::MIN + 10));
        assert!(tracker.track(&TrackerEvent::new("playheadupdate", i64::MAX)));

        assert_eq!(recorder.session_count(), 2);
    }
}
