//! Hit generation
//!
//! Turns playback context state and explicit lifecycle calls into
//! `MediaHit`s. Owns the ping cadence and QoE change detection for one
//! local session lineage.

use crate::collection::{self, params};
use crate::config::TrackerConfig;
use crate::context::PlaybackContext;
use crate::hit::{HitEventType, HitParams, MediaHit};
use crate::registry::SessionRegistry;
use crate::types::{Metadata, PlaybackState, SessionId, StateInfo};
use std::sync::Arc;
use tracing::{debug, trace};

/// Ping interval for downloaded content (ms)
pub const OFFLINE_PING_INTERVAL_MS: i64 = 50_000;
/// Ping interval for streamed content (ms)
pub const ONLINE_PING_INTERVAL_MS: i64 = 10_000;
/// Ping interval inside an ad with granular ad tracking (ms)
pub const GRANULAR_AD_PING_INTERVAL_MS: i64 = 1_000;

/// Generates hits for one tracked playback
pub struct HitGenerator {
    registry: Arc<dyn SessionRegistry>,
    downloaded: bool,
    channel: Option<String>,
    /// Current ping interval (ms)
    interval: i64,
    /// Timestamp stamped on generated hits
    ref_ts: i64,
    /// Last playback state a transition hit was emitted for
    previous_state: PlaybackState,
    previous_state_ts: i64,
    /// QoE payload last attached to a hit
    last_qoe: HitParams,
    session_id: Option<SessionId>,
    is_tracking: bool,
    /// Caller correlation id, tagged on session start hits
    ref_session_id: Option<String>,
}

impl HitGenerator {
    /// Create a generator and open its first local session
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        config: &TrackerConfig,
        ref_ts: i64,
        ref_session_id: Option<String>,
    ) -> Self {
        let downloaded = config.downloaded_content;
        let mut generator = Self {
            registry,
            downloaded,
            channel: config.channel.clone(),
            interval: default_interval(downloaded),
            ref_ts,
            previous_state: PlaybackState::Init,
            previous_state_ts: ref_ts,
            last_qoe: HitParams::new(),
            session_id: None,
            is_tracking: false,
            ref_session_id,
        };
        generator.start_tracking_session();
        generator
    }

    pub fn is_tracking(&self) -> bool {
        self.is_tracking
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn set_ref_ts(&mut self, ts: i64) {
        self.ref_ts = ts;
    }

    // Session lifecycle

    pub fn process_media_start(&mut self, ctx: &PlaybackContext, force_resume: bool) {
        let mut params = collection::media_params(ctx);
        if force_resume {
            params.insert(params::MEDIA_RESUME.into(), true.into());
        }
        params.insert(params::MEDIA_DOWNLOADED.into(), self.downloaded.into());
        if let Some(ref_session_id) = &self.ref_session_id {
            params.insert(params::SESSION_ID.into(), ref_session_id.clone().into());
        }
        if let Some(channel) = &self.channel {
            params.insert(params::MEDIA_CHANNEL.into(), channel.clone().into());
        }

        let metadata = collection::media_metadata(ctx);
        self.generate_hit(ctx, HitEventType::SessionStart, params, metadata);
    }

    pub fn process_media_complete(&mut self, ctx: &PlaybackContext) {
        self.generate_hit(ctx, HitEventType::SessionComplete, HitParams::new(), Metadata::new());
        self.end_tracking_session();
    }

    pub fn process_media_skip(&mut self, ctx: &PlaybackContext) {
        self.generate_hit(ctx, HitEventType::SessionEnd, HitParams::new(), Metadata::new());
        self.end_tracking_session();
    }

    /// End the current session without completing the content
    pub fn process_session_abort(&mut self, ctx: &PlaybackContext) {
        self.process_media_skip(ctx);
    }

    /// Open a new session and replay the current context into it
    ///
    /// Replay order: session start (resumed), chapter, ad break, ad, active
    /// custom states, then a forced playback flush.
    pub fn process_session_restart(&mut self, ctx: &PlaybackContext) {
        self.previous_state = PlaybackState::Init;
        self.previous_state_ts = self.ref_ts;
        self.last_qoe.clear();

        self.session_id = self.registry.start_session();
        self.is_tracking = self.session_id.is_some();
        debug!(session = ?self.session_id, "Restarting tracking session");

        self.process_media_start(ctx, true);

        if ctx.is_in_chapter() {
            self.process_chapter_start(ctx);
        }
        if ctx.is_in_ad_break() {
            self.process_ad_break_start(ctx);
        }
        if ctx.is_in_ad() {
            self.process_ad_start(ctx);
        }
        for state in ctx.active_tracked_states() {
            self.process_state_start(ctx, &state);
        }

        self.process_playback(ctx, true);
    }

    // Ads

    pub fn process_ad_break_start(&mut self, ctx: &PlaybackContext) {
        let params = collection::ad_break_params(ctx);
        self.generate_hit(ctx, HitEventType::AdBreakStart, params, Metadata::new());
    }

    pub fn process_ad_break_complete(&mut self, ctx: &PlaybackContext) {
        self.generate_hit(ctx, HitEventType::AdBreakComplete, HitParams::new(), Metadata::new());
    }

    /// Skipped ad breaks are reported as completed
    pub fn process_ad_break_skip(&mut self, ctx: &PlaybackContext) {
        self.generate_hit(ctx, HitEventType::AdBreakComplete, HitParams::new(), Metadata::new());
    }

    pub fn process_ad_start(&mut self, ctx: &PlaybackContext) {
        self.interval = if self.downloaded {
            OFFLINE_PING_INTERVAL_MS
        } else if ctx.media().granular_ad_tracking {
            GRANULAR_AD_PING_INTERVAL_MS
        } else {
            ONLINE_PING_INTERVAL_MS
        };

        let params = collection::ad_params(ctx);
        let metadata = collection::ad_metadata(ctx);
        self.generate_hit(ctx, HitEventType::AdStart, params, metadata);
    }

    pub fn process_ad_complete(&mut self, ctx: &PlaybackContext) {
        self.interval = default_interval(self.downloaded);
        self.generate_hit(ctx, HitEventType::AdComplete, HitParams::new(), Metadata::new());
    }

    pub fn process_ad_skip(&mut self, ctx: &PlaybackContext) {
        self.interval = default_interval(self.downloaded);
        self.generate_hit(ctx, HitEventType::AdSkip, HitParams::new(), Metadata::new());
    }

    // Chapters

    pub fn process_chapter_start(&mut self, ctx: &PlaybackContext) {
        let params = collection::chapter_params(ctx);
        let metadata = collection::chapter_metadata(ctx);
        self.generate_hit(ctx, HitEventType::ChapterStart, params, metadata);
    }

    pub fn process_chapter_complete(&mut self, ctx: &PlaybackContext) {
        self.generate_hit(ctx, HitEventType::ChapterComplete, HitParams::new(), Metadata::new());
    }

    pub fn process_chapter_skip(&mut self, ctx: &PlaybackContext) {
        self.generate_hit(ctx, HitEventType::ChapterSkip, HitParams::new(), Metadata::new());
    }

    // QoE and errors

    pub fn process_bitrate_change(&mut self, ctx: &PlaybackContext) {
        let qoe = collection::qoe_data(ctx);
        self.generate_hit_with_qoe(
            ctx,
            HitEventType::BitrateChange,
            HitParams::new(),
            Metadata::new(),
            qoe,
        );
    }

    pub fn process_error(&mut self, ctx: &PlaybackContext, error_id: &str) {
        let mut qoe = collection::qoe_data(ctx);
        qoe.insert(params::QOE_ERROR_ID.into(), error_id.into());
        qoe.insert(
            params::QOE_ERROR_SOURCE.into(),
            params::QOE_ERROR_SOURCE_PLAYER.into(),
        );
        self.generate_hit_with_qoe(ctx, HitEventType::Error, HitParams::new(), Metadata::new(), qoe);
    }

    // Custom states

    pub fn process_state_start(&mut self, ctx: &PlaybackContext, state: &StateInfo) {
        let params = state_params(state);
        self.generate_hit_with_qoe(
            ctx,
            HitEventType::StateStart,
            params,
            Metadata::new(),
            HitParams::new(),
        );
    }

    pub fn process_state_end(&mut self, ctx: &PlaybackContext, state: &StateInfo) {
        let params = state_params(state);
        self.generate_hit_with_qoe(
            ctx,
            HitEventType::StateEnd,
            params,
            Metadata::new(),
            HitParams::new(),
        );
    }

    // Playback

    /// Emit a transition hit when the canonical playback state changed (or
    /// `force` is set), otherwise a single ping once the interval elapsed.
    pub fn process_playback(&mut self, ctx: &PlaybackContext, force: bool) {
        if !self.is_tracking {
            return;
        }

        let current = canonical_state(ctx);
        if current != self.previous_state || force {
            trace!(from = %self.previous_state, to = %current, force, "Playback transition");
            self.generate_hit(ctx, transition_event(current), HitParams::new(), Metadata::new());
            self.previous_state = current;
            self.previous_state_ts = self.ref_ts;
        } else if self.ref_ts.saturating_sub(self.previous_state_ts) >= self.interval {
            self.generate_hit(ctx, HitEventType::Ping, HitParams::new(), Metadata::new());
            self.previous_state_ts = self.ref_ts;
        }
    }

    /// Generate a hit, attaching the QoE snapshot only if it changed since
    /// it was last attached
    pub fn generate_hit(
        &mut self,
        ctx: &PlaybackContext,
        event_type: HitEventType,
        params: HitParams,
        metadata: Metadata,
    ) {
        let qoe = collection::qoe_data(ctx);
        let qoe = if qoe != self.last_qoe { qoe } else { HitParams::new() };
        self.generate_hit_with_qoe(ctx, event_type, params, metadata, qoe);
    }

    /// Generate a hit with an explicit QoE payload
    pub fn generate_hit_with_qoe(
        &mut self,
        ctx: &PlaybackContext,
        event_type: HitEventType,
        params: HitParams,
        metadata: Metadata,
        qoe: HitParams,
    ) {
        if !qoe.is_empty() {
            self.last_qoe = qoe.clone();
        }

        let session_id = match (self.is_tracking, self.session_id) {
            (true, Some(id)) => id,
            _ => {
                debug!(%event_type, "Dropping hit as tracking has stopped");
                return;
            }
        };

        let hit = MediaHit::new(event_type, params, metadata, qoe, ctx.playhead(), self.ref_ts);
        self.registry.process_hit(&session_id, hit);
    }

    fn start_tracking_session(&mut self) {
        self.session_id = self.registry.start_session();
        self.is_tracking = self.session_id.is_some();
        match self.session_id {
            Some(id) => debug!(session = %id, "Started tracking session"),
            None => debug!("Unable to create a tracking session"),
        }
    }

    fn end_tracking_session(&mut self) {
        if !self.is_tracking {
            return;
        }
        if let Some(id) = self.session_id {
            debug!(session = %id, "Ending tracking session");
            self.registry.end_session(&id);
        }
        self.is_tracking = false;
    }
}

fn default_interval(downloaded: bool) -> i64 {
    if downloaded {
        OFFLINE_PING_INTERVAL_MS
    } else {
        ONLINE_PING_INTERVAL_MS
    }
}

fn state_params(state: &StateInfo) -> HitParams {
    let mut params = HitParams::new();
    params.insert(params::STATE_NAME.into(), state.name.clone().into());
    params
}

/// Collapse the active playback states into the one reported to the backend
fn canonical_state(ctx: &PlaybackContext) -> PlaybackState {
    [
        PlaybackState::Buffer,
        PlaybackState::Seek,
        PlaybackState::Play,
        PlaybackState::Pause,
        PlaybackState::Stall,
    ]
    .into_iter()
    .find(|state| ctx.is_in_state(*state))
    .unwrap_or(PlaybackState::Init)
}

fn transition_event(state: PlaybackState) -> HitEventType {
    match state {
        PlaybackState::Buffer => HitEventType::BufferStart,
        PlaybackState::Seek | PlaybackState::Pause => HitEventType::PauseStart,
        // Stall is reported as play
        PlaybackState::Play | PlaybackState::Stall => HitEventType::Play,
        // No event denotes Init; a ping without a prior state does
        PlaybackState::Init => HitEventType::Ping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HitRecorder;
    use crate::types::*;
    use serde_json::json;

    fn context() -> PlaybackContext {
        let media = MediaInfo::new("id", "name", "vod", MediaType::Video, 60.0).unwrap();
        PlaybackContext::new(media, Metadata::new())
    }

    fn generator(recorder: &Arc<HitRecorder>, config: TrackerConfig) -> HitGenerator {
        HitGenerator::new(recorder.clone(), &config, 0, Some("client-session".into()))
    }

    fn event_types(recorder: &HitRecorder) -> Vec<HitEventType> {
        recorder.hits().iter().map(|h| h.event_type).collect()
    }

    #[test]
    fn test_session_start_params() {
        let recorder = Arc::new(HitRecorder::new());
        let config = TrackerConfig {
            downloaded_content: false,
            channel: Some("sports".into()),
        };
        let mut hits = generator(&recorder, config);
        let ctx = context();

        hits.process_media_start(&ctx, false);

        let hit = &recorder.hits()[0];
        assert_eq!(hit.event_type, HitEventType::SessionStart);
        assert_eq!(hit.params[params::MEDIA_CHANNEL], json!("sports"));
        assert_eq!(hit.params[params::MEDIA_DOWNLOADED], json!(false));
        assert_eq!(hit.params[params::MEDIA_RESUME], json!(false));
        assert_eq!(hit.params[params::SESSION_ID], json!("client-session"));
        assert_eq!(hit.ts, 0);
    }

    #[test]
    fn test_ping_cadence() {
        let recorder = Arc::new(HitRecorder::new());
        let mut hits = generator(&recorder, TrackerConfig::default());
        let mut ctx = context();
        hits.process_media_start(&ctx, false);

        ctx.enter_state(PlaybackState::Play);
        hits.process_playback(&ctx, false);

        hits.set_ref_ts(9_999);
        hits.process_playback(&ctx, false);
        hits.set_ref_ts(10_000);
        hits.process_playback(&ctx, false);
        // Multi-interval gap still yields a single ping
        hits.set_ref_ts(50_000);
        hits.process_playback(&ctx, false);

        assert_eq!(
            event_types(&recorder),
            vec![
                HitEventType::SessionStart,
                HitEventType::Play,
                HitEventType::Ping,
                HitEventType::Ping,
            ]
        );
    }

    #[test]
    fn test_offline_interval() {
        let recorder = Arc::new(HitRecorder::new());
        let config = TrackerConfig {
            downloaded_content: true,
            channel: None,
        };
        let hits = generator(&recorder, config);
        assert_eq!(hits.interval(), OFFLINE_PING_INTERVAL_MS);
    }

    #[test]
    fn test_granular_ad_interval() {
        let recorder = Arc::new(HitRecorder::new());
        let mut hits = generator(&recorder, TrackerConfig::default());
        let media = MediaInfo::new("id", "name", "vod", MediaType::Video, 60.0)
            .unwrap()
            .with_granular_ad_tracking(true);
        let mut ctx = PlaybackContext::new(media, Metadata::new());
        ctx.set_ad_break(AdBreakInfo::new("pre", 1, 0.0).unwrap());
        ctx.set_ad(AdInfo::new("ad", "Ad", 1, 10.0).unwrap(), Metadata::new());

        hits.process_ad_start(&ctx);
        assert_eq!(hits.interval(), GRANULAR_AD_PING_INTERVAL_MS);

        hits.process_ad_complete(&ctx);
        assert_eq!(hits.interval(), ONLINE_PING_INTERVAL_MS);
    }

    #[test]
    fn test_canonical_state_priority() {
        let mut ctx = context();
        assert_eq!(canonical_state(&ctx), PlaybackState::Init);

        ctx.enter_state(PlaybackState::Pause);
        assert_eq!(canonical_state(&ctx), PlaybackState::Pause);

        ctx.enter_state(PlaybackState::Play);
        ctx.enter_state(PlaybackState::Seek);
        assert_eq!(canonical_state(&ctx), PlaybackState::Seek);

        ctx.enter_state(PlaybackState::Buffer);
        assert_eq!(canonical_state(&ctx), PlaybackState::Buffer);
        assert_eq!(transition_event(PlaybackState::Seek), HitEventType::PauseStart);
        assert_eq!(transition_event(PlaybackState::Stall), HitEventType::Play);
    }

    #[test]
    fn test_qoe_attached_once() {
        let recorder = Arc::new(HitRecorder::new());
        let mut hits = generator(&recorder, TrackerConfig::default());
        let mut ctx = context();

        // QoE known before the session start is attached to it
        ctx.set_qoe(QoeInfo::new(1000.0, 0.0, 30.0, 1.0).unwrap());
        hits.process_media_start(&ctx, false);
        hits.process_chapter_complete(&ctx);

        ctx.set_qoe(QoeInfo::new(2000.0, 0.0, 30.0, 1.0).unwrap());
        hits.process_chapter_complete(&ctx);
        hits.process_chapter_complete(&ctx);

        let qoe: Vec<Option<i64>> = recorder
            .hits()
            .iter()
            .map(|h| h.qoe_data.get(params::QOE_BITRATE).and_then(|v| v.as_i64()))
            .collect();
        assert_eq!(qoe, vec![Some(1000), None, Some(2000), None]);
    }

    #[test]
    fn test_bitrate_change_always_carries_qoe() {
        let recorder = Arc::new(HitRecorder::new());
        let mut hits = generator(&recorder, TrackerConfig::default());
        let mut ctx = context();
        ctx.set_qoe(QoeInfo::new(1000.0, 0.0, 30.0, 1.0).unwrap());

        hits.process_media_start(&ctx, false);
        hits.process_bitrate_change(&ctx);

        let recorded = recorder.hits();
        assert!(!recorded[1].qoe_data.is_empty());
        assert_eq!(recorded[1].event_type, HitEventType::BitrateChange);
    }

    #[test]
    fn test_error_hit() {
        let recorder = Arc::new(HitRecorder::new());
        let mut hits = generator(&recorder, TrackerConfig::default());
        let ctx = context();

        hits.process_error(&ctx, "decoder-failure");

        let hit = &recorder.hits()[0];
        assert_eq!(hit.event_type, HitEventType::Error);
        assert_eq!(hit.qoe_data[params::QOE_ERROR_ID], json!("decoder-failure"));
        assert_eq!(hit.qoe_data[params::QOE_ERROR_SOURCE], json!("player"));
    }

    #[test]
    fn test_no_hits_after_complete() {
        let recorder = Arc::new(HitRecorder::new());
        let mut hits = generator(&recorder, TrackerConfig::default());
        let mut ctx = context();
        hits.process_media_start(&ctx, false);
        hits.process_media_complete(&ctx);
        assert!(!hits.is_tracking());

        ctx.enter_state(PlaybackState::Play);
        hits.process_playback(&ctx, true);
        hits.process_chapter_start(&ctx);

        assert_eq!(
            event_types(&recorder),
            vec![HitEventType::SessionStart, HitEventType::SessionComplete]
        );
        assert!(recorder.sessions()[0].ended);
    }

    #[test]
    fn test_session_restart_replay_order() {
        let recorder = Arc::new(HitRecorder::new());
        let mut hits = generator(&recorder, TrackerConfig::default());
        let mut ctx = context();
        hits.process_media_start(&ctx, false);

        ctx.set_chapter(ChapterInfo::new("ch", 1, 0.0, 30.0).unwrap(), Metadata::new());
        ctx.set_ad_break(AdBreakInfo::new("mid", 2, 30.0).unwrap());
        ctx.set_ad(AdInfo::new("ad", "Ad", 1, 10.0).unwrap(), Metadata::new());
        ctx.start_state(&StateInfo::new("fullscreen").unwrap());
        ctx.enter_state(PlaybackState::Play);

        hits.process_session_abort(&ctx);
        hits.set_ref_ts(5_000);
        hits.process_session_restart(&ctx);

        let sessions = recorder.sessions();
        assert_eq!(sessions.len(), 2);
        let replay: Vec<HitEventType> = sessions[1].hits.iter().map(|h| h.event_type).collect();
        assert_eq!(
            replay,
            vec![
                HitEventType::SessionStart,
                HitEventType::ChapterStart,
                HitEventType::AdBreakStart,
                HitEventType::AdStart,
                HitEventType::StateStart,
                HitEventType::Play,
            ]
        );
        assert_eq!(sessions[1].hits[0].params[params::MEDIA_RESUME], json!(true));
        assert!(sessions[1].hits.iter().all(|h| h.ts == 5_000));
    }
}
