//! Real-time delivery service
//!
//! `SessionRegistry` backed by one `SessionSender` per local session. A
//! periodic tick drives every sender and drops the ones that finished.

use crate::config::{AnalyticsConfig, SenderConfig};
use crate::hit::MediaHit;
use crate::registry::SessionRegistry;
use crate::sender::{SessionCreated, SessionSender};
use crate::state::{PrivacyStatus, StateProvider};
use crate::transport::{HitTransport, ReqwestTransport};
use crate::types::SessionId;
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

type Sessions = Arc<Mutex<HashMap<SessionId, Arc<SessionSender>>>>;

/// Delivers tracked sessions to the collection server
pub struct RealTimeService {
    sessions: Sessions,
    state: Arc<dyn StateProvider>,
    transport: Arc<dyn HitTransport>,
    events: broadcast::Sender<SessionCreated>,
    config: SenderConfig,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl RealTimeService {
    pub fn new(
        state: Arc<dyn StateProvider>,
        transport: Arc<dyn HitTransport>,
        config: SenderConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            state,
            transport,
            events,
            config,
            ticker: Mutex::new(None),
        }
    }

    /// Service posting over HTTP with the configured timeout
    pub fn with_reqwest(state: Arc<dyn StateProvider>, config: &AnalyticsConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.sender.http_timeout_secs);
        let transport = Arc::new(ReqwestTransport::new(timeout)?);
        Ok(Self::new(state, transport, config.sender.clone()))
    }

    /// Subscribe to backend session creation
    pub fn subscribe(&self) -> broadcast::Receiver<SessionCreated> {
        self.events.subscribe()
    }

    /// Start the periodic tick. Does nothing outside a tokio runtime.
    pub fn start(&self) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, delivery service not started");
            return;
        };

        let sessions = self.sessions.clone();
        let period = Duration::from_millis(self.config.tick_interval_ms);
        *ticker = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                process_sessions(&sessions);
            }
        }));
        debug!(tick_ms = self.config.tick_interval_ms, "Delivery service started");
    }

    /// Stop the periodic tick. Queued hits stay queued.
    pub fn shutdown(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
            debug!("Delivery service stopped");
        }
    }

    /// Run one tick. Deliveries are spawned on the current tokio runtime.
    pub fn process(&self) {
        process_sessions(&self.sessions);
    }

    /// Deliver everything currently deliverable and drop finished sessions
    pub async fn flush(&self) {
        let senders: Vec<_> = self.sessions.lock().values().cloned().collect();
        for sender in senders {
            sender.flush().await;
        }
        self.sessions.lock().retain(|_, sender| !sender.is_finished());
    }

    /// Re-evaluate the shared state; opting out aborts every session
    pub fn notify_state_change(&self) {
        if self.state.privacy_status() == PrivacyStatus::OptOut {
            info!("Privacy opted out, aborting all sessions");
            self.abort_all();
        }
    }

    /// Abort every session
    pub fn reset(&self) {
        debug!("Resetting delivery service");
        self.abort_all();
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn backend_session_id(&self, session_id: &SessionId) -> Option<String> {
        self.sessions
            .lock()
            .get(session_id)
            .and_then(|sender| sender.backend_session_id())
    }

    fn abort_all(&self) {
        let mut sessions = self.sessions.lock();
        for sender in sessions.values() {
            sender.abort();
        }
        sessions.retain(|_, sender| !sender.is_finished());
    }
}

fn process_sessions(sessions: &Mutex<HashMap<SessionId, Arc<SessionSender>>>) {
    let mut sessions = sessions.lock();
    for sender in sessions.values() {
        sender.process();
    }
    sessions.retain(|id, sender| {
        let finished = sender.is_finished();
        if finished {
            trace!(session = %id, "Removing finished session");
        }
        !finished
    });
}

impl SessionRegistry for RealTimeService {
    fn start_session(&self) -> Option<SessionId> {
        if self.state.privacy_status() == PrivacyStatus::OptOut {
            debug!("Privacy opted out, not starting session");
            return None;
        }

        let id = SessionId::new();
        let sender = SessionSender::new(
            id,
            self.state.clone(),
            self.transport.clone(),
            self.events.clone(),
            &self.config,
        );
        self.sessions.lock().insert(id, Arc::new(sender));
        debug!(session = %id, "Created delivery session");
        Some(id)
    }

    fn process_hit(&self, session_id: &SessionId, hit: MediaHit) {
        match self.sessions.lock().get(session_id) {
            Some(sender) => sender.queue_hit(hit),
            None => trace!(session = %session_id, "Dropping hit for unknown session"),
        }
    }

    fn end_session(&self, session_id: &SessionId) {
        if let Some(sender) = self.sessions.lock().get(session_id) {
            sender.end();
        }
    }
}

impl Drop for RealTimeService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
