//! Tracker rule table
//!
//! Predicates, actions and the global hooks that legalize incoming events
//! against the current playback context.

use super::event::RuleName;
use super::TrackerState;
use crate::context::PlaybackContext;
use crate::hit_generator::HitGenerator;
use crate::rules::{Rule, RuleEngine};
use crate::types::*;

type TrackerRule = Rule<RuleName, TrackerState>;
type Callback<'a> = Option<&'a TrackerRule>;

/// Rejection messages
pub mod messages {
    pub const NOT_IN_MEDIA: &str = "Media tracker is not in tracking session, call 'API:trackSessionStart' to begin a new tracking session.";
    pub const IN_MEDIA: &str = "Media tracker is in active tracking session, call 'API:trackSessionEnd' or 'API:trackComplete' to end current tracking session.";
    pub const IN_BUFFER: &str = "Media tracker is tracking buffer events, call 'API:trackEvent(BufferComplete)' first to stop tracking buffer events.";
    pub const NOT_IN_BUFFER: &str = "Media tracker is not tracking buffer events, call 'API:trackEvent(BufferStart)' before 'API:trackEvent(BufferComplete)'.";
    pub const IN_SEEK: &str = "Media tracker is tracking seek events, call 'API:trackEvent(SeekComplete)' first to stop tracking seek events.";
    pub const NOT_IN_SEEK: &str = "Media tracker is not tracking seek events, call 'API:trackEvent(SeekStart)' before 'API:trackEvent(SeekComplete)'.";
    pub const NOT_IN_AD_BREAK: &str = "Media tracker is not tracking any AdBreak, call 'API:trackEvent(AdBreakStart)' to begin tracking AdBreak.";
    pub const NOT_IN_AD: &str = "Media tracker is not tracking any Ad, call 'API:trackEvent(AdStart)' to begin tracking Ad.";
    pub const NOT_IN_CHAPTER: &str = "Media tracker is not tracking any Chapter, call 'API:trackEvent(ChapterStart)' to begin tracking Chapter.";
    pub const INVALID_MEDIA_INFO: &str = "MediaInfo passed into 'API:trackSessionStart' is invalid.";
    pub const INVALID_AD_BREAK_INFO: &str = "AdBreakInfo passed into 'API:trackEvent(AdBreakStart)' is invalid.";
    pub const DUPLICATE_AD_BREAK_INFO: &str = "Media tracker is currently tracking the AdBreak passed into 'API:trackEvent(AdBreakStart)'.";
    pub const INVALID_AD_INFO: &str = "AdInfo passed into 'API:trackEvent(AdStart)' is invalid.";
    pub const DUPLICATE_AD_INFO: &str = "Media tracker is currently tracking the Ad passed into 'API:trackEvent(AdStart)'.";
    pub const INVALID_CHAPTER_INFO: &str = "ChapterInfo passed into 'API:trackEvent(ChapterStart)' is invalid.";
    pub const DUPLICATE_CHAPTER_INFO: &str = "Media tracker is currently tracking the Chapter passed into 'API:trackEvent(ChapterStart)'.";
    pub const INVALID_QOE_INFO: &str = "QoEInfo passed into 'API:updateQoEInfo' is invalid.";
    pub const INVALID_PLAYBACK_STATE: &str = "Media tracker is tracking an AdBreak but not tracking any Ad and will drop any calls to track playback state (Play, Pause, Buffer or Seek) in this state.";
    pub const INVALID_STATE_INFO: &str = "StateInfo passed into 'API:trackEvent(StateStart)' or 'API:trackEvent(StateEnd)' is invalid.";
    pub const IN_TRACKED_STATE: &str = "Media tracker is already tracking the State passed into 'API:trackEvent(StateStart)'.";
    pub const NOT_IN_TRACKED_STATE: &str = "Media tracker is not tracking the State passed into 'API:trackEvent(StateEnd)'.";
    pub const TRACKED_STATES_LIMIT_REACHED: &str = "Media tracker is already tracking maximum allowed states (10) per session.";
    pub const INVALID_ERROR_ID: &str = "ErrorId passed into 'API:trackError' is invalid. Please pass valid non-empty non-null string for ErrorId.";
}

use messages::*;

/// Build the engine with every tracker rule and the global hooks
pub fn build_engine() -> RuleEngine<RuleName, TrackerState> {
    use RuleName::*;

    let mut engine = RuleEngine::new();
    engine.on_enter_rule(on_enter);
    engine.on_exit_rule(on_exit);

    let rules = [
        TrackerRule::new(MediaStart, "trackSessionStart")
            .with_predicate(is_in_media, false, IN_MEDIA)
            .with_predicate(is_valid_media_info, true, INVALID_MEDIA_INFO)
            .with_action(cmd_media_start),
        TrackerRule::new(MediaComplete, "trackComplete")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_action(cmd_ad_skip)
            .with_action(cmd_ad_break_skip)
            .with_action(cmd_chapter_skip)
            .with_action(cmd_media_complete),
        TrackerRule::new(MediaSkip, "trackSessionEnd")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_action(cmd_ad_skip)
            .with_action(cmd_ad_break_skip)
            .with_action(cmd_chapter_skip)
            .with_action(cmd_media_skip),
        TrackerRule::new(Error, "trackError")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(is_valid_error_info, true, INVALID_ERROR_ID)
            .with_action(cmd_error),
        TrackerRule::new(Play, "trackPlay")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(allow_playback_state_change, true, INVALID_PLAYBACK_STATE)
            .with_action(cmd_seek_complete)
            .with_action(cmd_buffer_complete)
            .with_action(cmd_play),
        TrackerRule::new(Pause, "trackPause")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(allow_playback_state_change, true, INVALID_PLAYBACK_STATE)
            .with_predicate(is_in_buffering, false, IN_BUFFER)
            .with_predicate(is_in_seeking, false, IN_SEEK)
            .with_action(cmd_seek_complete)
            .with_action(cmd_buffer_complete)
            .with_action(cmd_pause),
        TrackerRule::new(BufferStart, "trackEvent(BufferStart)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(allow_playback_state_change, true, INVALID_PLAYBACK_STATE)
            .with_predicate(is_in_buffering, false, IN_BUFFER)
            .with_predicate(is_in_seeking, false, IN_SEEK)
            .with_action(cmd_buffer_start),
        TrackerRule::new(BufferComplete, "trackEvent(BufferComplete)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(allow_playback_state_change, true, INVALID_PLAYBACK_STATE)
            .with_predicate(is_in_buffering, true, NOT_IN_BUFFER)
            .with_action(cmd_buffer_complete),
        TrackerRule::new(SeekStart, "trackEvent(SeekStart)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(allow_playback_state_change, true, INVALID_PLAYBACK_STATE)
            .with_predicate(is_in_seeking, false, IN_SEEK)
            .with_predicate(is_in_buffering, false, IN_BUFFER)
            .with_action(cmd_seek_start),
        TrackerRule::new(SeekComplete, "trackEvent(SeekComplete)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(allow_playback_state_change, true, INVALID_PLAYBACK_STATE)
            .with_predicate(is_in_seeking, true, NOT_IN_SEEK)
            .with_action(cmd_seek_complete),
        TrackerRule::new(AdBreakStart, "trackEvent(AdBreakStart)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(is_valid_ad_break_info, true, INVALID_AD_BREAK_INFO)
            .with_predicate(is_different_ad_break_info, true, DUPLICATE_AD_BREAK_INFO)
            .with_action(cmd_ad_skip)
            .with_action(cmd_ad_break_skip)
            .with_action(cmd_ad_break_start),
        TrackerRule::new(AdBreakComplete, "trackEvent(AdBreakComplete)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(is_in_ad_break, true, NOT_IN_AD_BREAK)
            .with_action(cmd_ad_skip)
            .with_action(cmd_ad_break_complete),
        TrackerRule::new(AdStart, "trackEvent(AdStart)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(is_in_ad_break, true, NOT_IN_AD_BREAK)
            .with_predicate(is_valid_ad_info, true, INVALID_AD_INFO)
            .with_predicate(is_different_ad_info, true, DUPLICATE_AD_INFO)
            .with_action(cmd_ad_skip)
            .with_action(cmd_ad_start),
        TrackerRule::new(AdComplete, "trackEvent(AdComplete)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(is_in_ad_break, true, NOT_IN_AD_BREAK)
            .with_predicate(is_in_ad, true, NOT_IN_AD)
            .with_action(cmd_ad_complete),
        TrackerRule::new(AdSkip, "trackEvent(AdSkip)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(is_in_ad_break, true, NOT_IN_AD_BREAK)
            .with_predicate(is_in_ad, true, NOT_IN_AD)
            .with_action(cmd_ad_skip),
        TrackerRule::new(ChapterStart, "trackEvent(ChapterStart)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(is_valid_chapter_info, true, INVALID_CHAPTER_INFO)
            .with_predicate(is_different_chapter_info, true, DUPLICATE_CHAPTER_INFO)
            .with_action(cmd_chapter_skip)
            .with_action(cmd_chapter_start),
        TrackerRule::new(ChapterComplete, "trackEvent(ChapterComplete)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(is_in_chapter, true, NOT_IN_CHAPTER)
            .with_action(cmd_chapter_complete),
        TrackerRule::new(ChapterSkip, "trackEvent(ChapterSkip)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(is_in_chapter, true, NOT_IN_CHAPTER)
            .with_action(cmd_chapter_skip),
        TrackerRule::new(BitrateChange, "trackEvent(BitrateChange)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_action(cmd_bitrate_change),
        TrackerRule::new(QoEUpdate, "updateQoEInfo")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(is_valid_qoe_info, true, INVALID_QOE_INFO)
            .with_action(cmd_qoe_update),
        TrackerRule::new(PlayheadUpdate, "updatePlayhead")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_action(cmd_playhead_update),
        TrackerRule::new(StateStart, "trackEvent(StateStart)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(is_valid_state_info, true, INVALID_STATE_INFO)
            .with_predicate(is_in_tracked_state, false, IN_TRACKED_STATE)
            .with_predicate(allow_state_track, true, TRACKED_STATES_LIMIT_REACHED)
            .with_action(cmd_state_start),
        TrackerRule::new(StateEnd, "trackEvent(StateEnd)")
            .with_predicate(is_in_media, true, NOT_IN_MEDIA)
            .with_predicate(is_valid_state_info, true, INVALID_STATE_INFO)
            .with_predicate(is_in_tracked_state, true, NOT_IN_TRACKED_STATE)
            .with_action(cmd_state_end),
    ];

    for rule in rules {
        engine.add_rule(rule);
    }
    engine
}

// Helpers

fn parse<T>(state: &TrackerState, parser: fn(&InfoMap) -> crate::Result<T>) -> Option<T> {
    state.event.info.as_ref().and_then(|info| parser(info).ok())
}

fn context_has(state: &TrackerState, check: impl Fn(&PlaybackContext) -> bool) -> bool {
    state.context.as_ref().is_some_and(check)
}

/// Run `f` against the active context and generator. False when no
/// session is active.
fn with_session(
    state: &mut TrackerState,
    f: impl FnOnce(&mut PlaybackContext, &mut HitGenerator),
) -> bool {
    match (state.context.as_mut(), state.generator.as_mut()) {
        (Some(ctx), Some(generator)) => {
            f(ctx, generator);
            true
        }
        _ => false,
    }
}

fn with_context(state: &mut TrackerState, f: impl FnOnce(&mut PlaybackContext)) -> bool {
    match state.context.as_mut() {
        Some(ctx) => {
            f(ctx);
            true
        }
        None => false,
    }
}

// Predicates

fn is_in_media(_: Callback<'_>, state: &mut TrackerState) -> bool {
    state.context.is_some()
}

fn is_in_ad_break(_: Callback<'_>, state: &mut TrackerState) -> bool {
    context_has(state, PlaybackContext::is_in_ad_break)
}

fn is_in_ad(_: Callback<'_>, state: &mut TrackerState) -> bool {
    context_has(state, PlaybackContext::is_in_ad)
}

fn is_in_chapter(_: Callback<'_>, state: &mut TrackerState) -> bool {
    context_has(state, PlaybackContext::is_in_chapter)
}

fn is_in_buffering(_: Callback<'_>, state: &mut TrackerState) -> bool {
    context_has(state, |ctx| ctx.is_in_state(PlaybackState::Buffer))
}

fn is_in_seeking(_: Callback<'_>, state: &mut TrackerState) -> bool {
    context_has(state, |ctx| ctx.is_in_state(PlaybackState::Seek))
}

fn is_valid_media_info(_: Callback<'_>, state: &mut TrackerState) -> bool {
    parse(state, MediaInfo::from_info).is_some()
}

fn is_valid_ad_break_info(_: Callback<'_>, state: &mut TrackerState) -> bool {
    parse(state, AdBreakInfo::from_info).is_some()
}

fn is_valid_ad_info(_: Callback<'_>, state: &mut TrackerState) -> bool {
    parse(state, AdInfo::from_info).is_some()
}

fn is_valid_chapter_info(_: Callback<'_>, state: &mut TrackerState) -> bool {
    parse(state, ChapterInfo::from_info).is_some()
}

fn is_valid_qoe_info(_: Callback<'_>, state: &mut TrackerState) -> bool {
    parse(state, QoeInfo::from_info).is_some()
}

fn is_valid_state_info(_: Callback<'_>, state: &mut TrackerState) -> bool {
    parse(state, StateInfo::from_info).is_some()
}

fn is_valid_error_info(_: Callback<'_>, state: &mut TrackerState) -> bool {
    state.event.error_id().is_some_and(|id| !id.is_empty())
}

fn is_different_ad_break_info(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let incoming = parse(state, AdBreakInfo::from_info);
    match state.context.as_ref().and_then(PlaybackContext::ad_break) {
        Some(current) => incoming.as_ref() != Some(current),
        None => true,
    }
}

fn is_different_ad_info(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let incoming = parse(state, AdInfo::from_info);
    match state.context.as_ref().and_then(PlaybackContext::ad) {
        Some(current) => incoming.as_ref() != Some(current),
        None => true,
    }
}

fn is_different_chapter_info(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let incoming = parse(state, ChapterInfo::from_info);
    match state.context.as_ref().and_then(PlaybackContext::chapter) {
        Some(current) => incoming.as_ref() != Some(current),
        None => true,
    }
}

/// Playback state changes are owned by the ad break outside of ads
fn allow_playback_state_change(_: Callback<'_>, state: &mut TrackerState) -> bool {
    context_has(state, |ctx| !ctx.is_in_ad_break() || ctx.is_in_ad())
}

fn is_in_tracked_state(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let Some(info) = parse(state, StateInfo::from_info) else {
        return false;
    };
    context_has(state, |ctx| ctx.is_in_player_state(&info))
}

fn allow_state_track(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let Some(info) = parse(state, StateInfo::from_info) else {
        return false;
    };
    context_has(state, |ctx| {
        ctx.has_tracked_state(&info) || !ctx.has_reached_state_limit()
    })
}

// Actions

fn cmd_media_start(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let Some(media) = parse(state, MediaInfo::from_info) else {
        return false;
    };
    let ts = state.event.ts;
    let preroll_wait_time = media.preroll_wait_time;

    let ctx = PlaybackContext::new(media, state.event.metadata());
    let mut generator = HitGenerator::new(
        state.registry.clone(),
        &state.config,
        ts,
        state.event.session_id.clone(),
    );
    generator.process_media_start(&ctx, false);

    state.context = Some(ctx);
    state.generator = Some(generator);
    state.start_session_clock(ts);
    state.open_preroll(preroll_wait_time, ts);
    true
}

fn cmd_media_complete(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_session(state, |ctx, generator| generator.process_media_complete(ctx));
    state.close_session();
    true
}

fn cmd_media_skip(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_session(state, |ctx, generator| generator.process_media_skip(ctx));
    state.close_session();
    true
}

fn cmd_ad_break_start(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let Some(ad_break) = parse(state, AdBreakInfo::from_info) else {
        return false;
    };
    with_session(state, |ctx, generator| {
        ctx.set_ad_break(ad_break);
        generator.process_ad_break_start(ctx);
    })
}

fn cmd_ad_break_complete(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_session(state, |ctx, generator| {
        generator.process_ad_break_complete(ctx);
        ctx.clear_ad_break();
    })
}

fn cmd_ad_break_skip(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_session(state, |ctx, generator| {
        if ctx.is_in_ad_break() {
            generator.process_ad_break_skip(ctx);
            ctx.clear_ad_break();
        }
    })
}

fn cmd_ad_start(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let Some(ad) = parse(state, AdInfo::from_info) else {
        return false;
    };
    let metadata = state.event.metadata();
    with_session(state, |ctx, generator| {
        ctx.set_ad(ad, metadata);
        generator.process_ad_start(ctx);
    })
}

fn cmd_ad_complete(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_session(state, |ctx, generator| {
        generator.process_ad_complete(ctx);
        ctx.clear_ad();
    })
}

fn cmd_ad_skip(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_session(state, |ctx, generator| {
        if ctx.is_in_ad() {
            generator.process_ad_skip(ctx);
            ctx.clear_ad();
        }
    })
}

fn cmd_chapter_start(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let Some(chapter) = parse(state, ChapterInfo::from_info) else {
        return false;
    };
    let metadata = state.event.metadata();
    with_session(state, |ctx, generator| {
        ctx.set_chapter(chapter, metadata);
        generator.process_chapter_start(ctx);
    })
}

fn cmd_chapter_complete(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_session(state, |ctx, generator| {
        generator.process_chapter_complete(ctx);
        ctx.clear_chapter();
    })
}

fn cmd_chapter_skip(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_session(state, |ctx, generator| {
        if ctx.is_in_chapter() {
            generator.process_chapter_skip(ctx);
            ctx.clear_chapter();
        }
    })
}

fn cmd_play(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_context(state, |ctx| ctx.enter_state(PlaybackState::Play))
}

fn cmd_pause(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_context(state, |ctx| ctx.enter_state(PlaybackState::Pause))
}

fn cmd_buffer_start(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_context(state, |ctx| ctx.enter_state(PlaybackState::Buffer))
}

fn cmd_buffer_complete(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_context(state, |ctx| ctx.exit_state(PlaybackState::Buffer))
}

fn cmd_seek_start(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_context(state, |ctx| ctx.enter_state(PlaybackState::Seek))
}

fn cmd_seek_complete(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_context(state, |ctx| ctx.exit_state(PlaybackState::Seek))
}

fn cmd_error(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let Some(error_id) = state.event.error_id().map(str::to_owned) else {
        return true;
    };
    with_session(state, |ctx, generator| generator.process_error(ctx, &error_id))
}

fn cmd_bitrate_change(_: Callback<'_>, state: &mut TrackerState) -> bool {
    with_session(state, |ctx, generator| generator.process_bitrate_change(ctx))
}

fn cmd_qoe_update(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let Some(qoe) = parse(state, QoeInfo::from_info) else {
        return false;
    };
    with_context(state, |ctx| ctx.set_qoe(qoe))
}

fn cmd_state_start(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let Some(info) = parse(state, StateInfo::from_info) else {
        return false;
    };
    with_session(state, |ctx, generator| {
        ctx.start_state(&info);
        generator.process_state_start(ctx, &info);
    })
}

fn cmd_state_end(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let Some(info) = parse(state, StateInfo::from_info) else {
        return false;
    };
    with_session(state, |ctx, generator| {
        ctx.end_state(&info);
        generator.process_state_end(ctx, &info);
    })
}

fn cmd_playhead_update(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let playhead = state.event.playhead().filter(|p| *p >= 0.0);
    with_context(state, |ctx| {
        if let Some(playhead) = playhead {
            ctx.set_playhead(playhead);
        }
    })
}

// Hooks

/// Stamp the event time on every hit produced while processing the rule
fn on_enter(_: Callback<'_>, state: &mut TrackerState) -> bool {
    let ts = state.event.ts;
    if let Some(generator) = state.generator.as_mut() {
        generator.set_ref_ts(ts);
    }
    true
}

fn on_exit(rule: Callback<'_>, state: &mut TrackerState) -> bool {
    let Some(rule) = rule else {
        return false;
    };
    let name = rule.name();
    let ts = state.event.ts;

    let Some(ctx) = state.context.as_mut() else {
        return false;
    };

    // The backend switches to play after an ad start, and there is no way
    // back to Init once buffering or seeking completes.
    match name {
        RuleName::AdStart
            if ctx.is_in_state(PlaybackState::Init)
                && !ctx.is_in_state(PlaybackState::Buffer)
                && !ctx.is_in_state(PlaybackState::Seek) =>
        {
            ctx.enter_state(PlaybackState::Play);
        }
        RuleName::BufferComplete | RuleName::SeekComplete
            if ctx.is_in_state(PlaybackState::Init) =>
        {
            ctx.enter_state(PlaybackState::Pause);
        }
        _ => {}
    }

    state.detect_idle(ts);
    state.detect_session_timeout(ts);
    state.detect_content_start(ts);

    let force = matches!(name, RuleName::AdStart | RuleName::AdBreakComplete);
    with_session(state, |ctx, generator| generator.process_playback(ctx, force));
    true
}
