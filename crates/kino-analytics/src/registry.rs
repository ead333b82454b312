//! Session registry
//!
//! The hit generator opens, feeds and closes local sessions through a
//! `SessionRegistry`. `RealTimeService` delivers them over HTTP;
//! `HitRecorder` keeps them in memory.

use crate::hit::MediaHit;
use crate::types::SessionId;
use parking_lot::Mutex;
use tracing::{debug, trace};

/// Assigns local session ids and routes hits to them
pub trait SessionRegistry: Send + Sync {
    /// Open a new local session. `None` when sessions can not be started.
    fn start_session(&self) -> Option<SessionId>;

    /// Queue a hit on a session
    fn process_hit(&self, session_id: &SessionId, hit: MediaHit);

    /// Close a session. Queued hits are still delivered.
    fn end_session(&self, session_id: &SessionId);
}

/// A session captured by the recorder
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSession {
    pub id: SessionId,
    pub hits: Vec<MediaHit>,
    pub ended: bool,
}

#[derive(Debug)]
struct RecorderInner {
    sessions: Vec<RecordedSession>,
    accepting: bool,
}

/// In-memory registry that records every session and hit
#[derive(Debug)]
pub struct HitRecorder {
    inner: Mutex<RecorderInner>,
}

impl Default for HitRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl HitRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RecorderInner {
                sessions: Vec::new(),
                accepting: true,
            }),
        }
    }

    /// Refuse new sessions while `false`, as an opted-out registry would
    pub fn set_accepting(&self, accepting: bool) {
        self.inner.lock().accepting = accepting;
    }

    pub fn sessions(&self) -> Vec<RecordedSession> {
        self.inner.lock().sessions.clone()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Every recorded hit across sessions, in arrival order per session
    pub fn hits(&self) -> Vec<MediaHit> {
        self.inner
            .lock()
            .sessions
            .iter()
            .flat_map(|s| s.hits.iter().cloned())
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().sessions.clear();
    }
}

impl SessionRegistry for HitRecorder {
    fn start_session(&self) -> Option<SessionId> {
        let mut inner = self.inner.lock();
        if !inner.accepting {
            debug!("Recorder is not accepting sessions");
            return None;
        }
        let id = SessionId::new();
        inner.sessions.push(RecordedSession {
            id,
            hits: Vec::new(),
            ended: false,
        });
        Some(id)
    }

    fn process_hit(&self, session_id: &SessionId, hit: MediaHit) {
        let mut inner = self.inner.lock();
        match inner.sessions.iter_mut().find(|s| s.id == *session_id) {
            Some(session) if !session.ended => session.hits.push(hit),
            Some(_) => trace!(session = %session_id, "Dropping hit for ended session"),
            None => trace!(session = %session_id, "Dropping hit for unknown session"),
        }
    }

    fn end_session(&self, session_id: &SessionId) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.iter_mut().find(|s| s.id == *session_id) {
            session.ended = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hit::{HitEventType, HitParams};
    use crate::types::Metadata;

    fn ping(ts: i64) -> MediaHit {
        MediaHit::new(HitEventType::Ping, HitParams::new(), Metadata::new(), HitParams::new(), 0.0, ts)
    }

    #[test]
    fn test_records_hits_per_session() {
        let recorder = HitRecorder::new();
        let first = recorder.start_session().unwrap();
        recorder.process_hit(&first, ping(1));
        recorder.end_session(&first);
        recorder.process_hit(&first, ping(2));

        let second = recorder.start_session().unwrap();
        recorder.process_hit(&second, ping(3));

        let sessions = recorder.sessions();
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].ended);
        assert_eq!(sessions[0].hits, vec![ping(1)]);
        assert_eq!(recorder.hits(), vec![ping(1), ping(3)]);
    }

    #[test]
    fn test_refuses_sessions_when_not_accepting() {
        let recorder = HitRecorder::new();
        recorder.set_accepting(false);
        assert!(recorder.start_session().is_none());
        assert_eq!(recorder.session_count(), 0);
    }
}
