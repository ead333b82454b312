//! Playback context
//!
//! Mutable snapshot of what the tracked player is doing right now: the
//! media being played, the active ad break / ad / chapter, the latest QoE
//! snapshot, the playhead, the playback state and any custom player states.

use crate::types::*;
use tracing::trace;

/// Current state of one tracked playback
#[derive(Debug, Clone)]
pub struct PlaybackContext {
    media: MediaInfo,
    media_metadata: Metadata,
    ad_break: Option<AdBreakInfo>,
    ad: Option<AdInfo>,
    ad_metadata: Metadata,
    chapter: Option<ChapterInfo>,
    chapter_metadata: Metadata,
    qoe: Option<QoeInfo>,
    /// Current playhead in seconds
    playhead: f64,
    /// Exclusive state: Init, Play, Pause or Stall
    play_state: PlaybackState,
    buffering: bool,
    seeking: bool,
    /// Custom states in first-start order, with their active flag
    tracked_states: Vec<(String, bool)>,
}

impl PlaybackContext {
    pub fn new(media: MediaInfo, metadata: Metadata) -> Self {
        Self {
            media,
            media_metadata: metadata,
            ad_break: None,
            ad: None,
            ad_metadata: Metadata::new(),
            chapter: None,
            chapter_metadata: Metadata::new(),
            qoe: None,
            playhead: 0.0,
            play_state: PlaybackState::Init,
            buffering: false,
            seeking: false,
            tracked_states: Vec::new(),
        }
    }

    pub fn media(&self) -> &MediaInfo {
        &self.media
    }

    pub fn media_metadata(&self) -> &Metadata {
        &self.media_metadata
    }

    // Ad break / ad / chapter

    pub fn is_in_ad_break(&self) -> bool {
        self.ad_break.is_some()
    }

    pub fn is_in_ad(&self) -> bool {
        self.ad.is_some()
    }

    pub fn is_in_chapter(&self) -> bool {
        self.chapter.is_some()
    }

    pub fn ad_break(&self) -> Option<&AdBreakInfo> {
        self.ad_break.as_ref()
    }

    pub fn ad(&self) -> Option<&AdInfo> {
        self.ad.as_ref()
    }

    pub fn ad_metadata(&self) -> &Metadata {
        &self.ad_metadata
    }

    pub fn chapter(&self) -> Option<&ChapterInfo> {
        self.chapter.as_ref()
    }

    pub fn chapter_metadata(&self) -> &Metadata {
        &self.chapter_metadata
    }

    pub fn set_ad_break(&mut self, ad_break: AdBreakInfo) {
        self.ad_break = Some(ad_break);
    }

    pub fn clear_ad_break(&mut self) {
        self.ad_break = None;
    }

    pub fn set_ad(&mut self, ad: AdInfo, metadata: Metadata) {
        self.ad = Some(ad);
        self.ad_metadata = metadata;
    }

    pub fn clear_ad(&mut self) {
        self.ad = None;
        self.ad_metadata.clear();
    }

    pub fn set_chapter(&mut self, chapter: ChapterInfo, metadata: Metadata) {
        self.chapter = Some(chapter);
        self.chapter_metadata = metadata;
    }

    pub fn clear_chapter(&mut self) {
        self.chapter = None;
        self.chapter_metadata.clear();
    }

    pub fn qoe(&self) -> Option<&QoeInfo> {
        self.qoe.as_ref()
    }

    pub fn set_qoe(&mut self, qoe: QoeInfo) {
        self.qoe = Some(qoe);
    }

    pub fn playhead(&self) -> f64 {
        self.playhead
    }

    pub fn set_playhead(&mut self, playhead: f64) {
        self.playhead = playhead;
    }

    // Playback state

    /// Enter a playback state
    ///
    /// Init can not be re-entered: once the player has played or paused
    /// there is no way back.
    pub fn enter_state(&mut self, state: PlaybackState) {
        trace!(%state, "Enter playback state");
        match state {
            PlaybackState::Play | PlaybackState::Pause | PlaybackState::Stall => {
                self.play_state = state;
            }
            PlaybackState::Buffer => self.buffering = true,
            PlaybackState::Seek => self.seeking = true,
            PlaybackState::Init => trace!("Ignoring request to re-enter Init"),
        }
    }

    /// Exit a playback state. Only Buffer and Seek can be exited.
    pub fn exit_state(&mut self, state: PlaybackState) {
        trace!(%state, "Exit playback state");
        match state {
            PlaybackState::Buffer => self.buffering = false,
            PlaybackState::Seek => self.seeking = false,
            _ => trace!(%state, "Ignoring exit of exclusive playback state"),
        }
    }

    pub fn is_in_state(&self, state: PlaybackState) -> bool {
        match state {
            PlaybackState::Buffer => self.buffering,
            PlaybackState::Seek => self.seeking,
            _ => self.play_state == state,
        }
    }

    /// True unless content is effectively playing: Play without an open
    /// buffer or seek.
    pub fn is_idle(&self) -> bool {
        !self.is_in_state(PlaybackState::Play) || self.buffering || self.seeking
    }

    // Custom player states

    /// Start tracking a custom state. Returns false when it is already
    /// active or the per-session limit has been reached.
    pub fn start_state(&mut self, state: &StateInfo) -> bool {
        if !self.has_tracked_state(state) && self.has_reached_state_limit() {
            trace!(state = %state.name, limit = STATE_LIMIT, "State limit reached");
            return false;
        }

        match self.tracked_states.iter_mut().find(|(name, _)| *name == state.name) {
            Some((_, true)) => false,
            Some((_, active)) => {
                *active = true;
                true
            }
            None => {
                self.tracked_states.push((state.name.clone(), true));
                true
            }
        }
    }

    /// Stop tracking a custom state. Returns false if it was not active.
    pub fn end_state(&mut self, state: &StateInfo) -> bool {
        match self
            .tracked_states
            .iter_mut()
            .find(|(name, active)| *active && *name == state.name)
        {
            Some((_, active)) => {
                *active = false;
                true
            }
            None => false,
        }
    }

    /// True if the custom state is currently active
    pub fn is_in_player_state(&self, state: &StateInfo) -> bool {
        self.tracked_states
            .iter()
            .any(|(name, active)| *active && *name == state.name)
    }

    /// True if the custom state was started at any point this session
    pub fn has_tracked_state(&self, state: &StateInfo) -> bool {
        self.tracked_states.iter().any(|(name, _)| *name == state.name)
    }

    pub fn has_reached_state_limit(&self) -> bool {
        self.tracked_states.len() >= STATE_LIMIT
    }

    pub fn clear_states(&mut self) {
        self.tracked_states.clear();
    }

    /// Active custom states, in the order they were first started
    pub fn active_tracked_states(&self) -> Vec<StateInfo> {
        self.tracked_states
            .iter()
            .filter(|(_, active)| *active)
            .map(|(name, _)| StateInfo { name: name.clone() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PlaybackContext {
        let media = MediaInfo::new("id", "name", "vod", MediaType::Video, 60.0).unwrap();
        PlaybackContext::new(media, Metadata::new())
    }

    fn state(name: &str) -> StateInfo {
        StateInfo::new(name).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let ctx = context();
        assert!(ctx.is_in_state(PlaybackState::Init));
        assert!(ctx.is_idle());
        assert!(!ctx.is_in_ad_break());
        assert_eq!(ctx.playhead(), 0.0);
    }

    #[test]
    fn test_init_is_sticky() {
        let mut ctx = context();
        ctx.enter_state(PlaybackState::Play);
        ctx.enter_state(PlaybackState::Init);
        assert!(ctx.is_in_state(PlaybackState::Play));
        assert!(!ctx.is_in_state(PlaybackState::Init));
    }

    #[test]
    fn test_idle_while_buffering() {
        let mut ctx = context();
        ctx.enter_state(PlaybackState::Play);
        assert!(!ctx.is_idle());

        ctx.enter_state(PlaybackState::Buffer);
        assert!(ctx.is_idle());
        assert!(ctx.is_in_state(PlaybackState::Play));

        ctx.exit_state(PlaybackState::Buffer);
        assert!(!ctx.is_idle());

        ctx.enter_state(PlaybackState::Pause);
        assert!(ctx.is_idle());
    }

    #[test]
    fn test_exit_exclusive_state_is_ignored() {
        let mut ctx = context();
        ctx.enter_state(PlaybackState::Pause);
        ctx.exit_state(PlaybackState::Pause);
        assert!(ctx.is_in_state(PlaybackState::Pause));
    }

    #[test]
    fn test_clear_ad_drops_metadata() {
        let mut ctx = context();
        let mut metadata = Metadata::new();
        metadata.insert("advertiser".into(), "acme".into());

        ctx.set_ad_break(AdBreakInfo::new("pre", 1, 0.0).unwrap());
        ctx.set_ad(AdInfo::new("ad1", "Ad", 1, 15.0).unwrap(), metadata);
        assert!(ctx.is_in_ad());
        assert_eq!(ctx.ad_metadata().len(), 1);

        ctx.clear_ad();
        assert!(!ctx.is_in_ad());
        assert!(ctx.ad_metadata().is_empty());
        assert!(ctx.is_in_ad_break());
    }

    #[test]
    fn test_custom_state_lifecycle() {
        let mut ctx = context();
        let fullscreen = state("fullscreen");

        assert!(ctx.start_state(&fullscreen));
        assert!(!ctx.start_state(&fullscreen));
        assert!(ctx.is_in_player_state(&fullscreen));

        assert!(ctx.end_state(&fullscreen));
        assert!(!ctx.end_state(&fullscreen));
        assert!(!ctx.is_in_player_state(&fullscreen));
        assert!(ctx.has_tracked_state(&fullscreen));

        assert!(ctx.start_state(&fullscreen));
    }

    #[test]
    fn test_state_limit_counts_ended_states() {
        let mut ctx = context();
        for i in 0..STATE_LIMIT {
            let s = state(&format!("state{i}"));
            assert!(ctx.start_state(&s));
            assert!(ctx.end_state(&s));
        }

        assert!(ctx.has_reached_state_limit());
        assert!(!ctx.start_state(&state("another")));
        // Previously tracked states can still be restarted
        assert!(ctx.start_state(&state("state3")));

        ctx.clear_states();
        assert!(ctx.start_state(&state("another")));
    }

    #[test]
    fn test_active_states_keep_start_order() {
        let mut ctx = context();
        for name in ["mute", "fullscreen", "pip"] {
            ctx.start_state(&state(name));
        }
        ctx.end_state(&state("fullscreen"));

        let active: Vec<String> = ctx.active_tracked_states().into_iter().map(|s| s.name).collect();
        assert_eq!(active, vec!["mute".to_string(), "pip".to_string()]);
    }
}
