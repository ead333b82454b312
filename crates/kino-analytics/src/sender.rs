//! Per-session hit delivery
//!
//! Each local session owns a FIFO of hits with at most one request in
//! flight. The session start goes out first; its response carries the
//! backend session id every later hit is posted under.
//!
//! ```text
//! queue: [SESSION_START, PLAY, PING, ...]
//!           │
//!           ├─ gate: opted in, connected, tracking config complete
//!           ▼
//! POST /api/v1/sessions ──Location──▶ backend id
//!           │ failed: retry, then abandon the session
//!           ▼
//! POST /api/v1/sessions/{id}/events   (one attempt per hit)
//! ```

use crate::config::SenderConfig;
use crate::hit::MediaHit;
use crate::report::{build_report, extract_session_id};
use crate::state::{PrivacyStatus, StateProvider};
use crate::transport::{
    request_headers, session_events_url, session_start_url, HitRequest, HitResponse, HitTransport,
};
use crate::types::SessionId;
use crate::{collection::params, Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Consecutive hits of a session further apart than this are reported (ms)
pub const HIT_GAP_WARNING_MS: i64 = 60_000;

/// Broadcast when the backend assigns an id to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreated {
    /// Correlation id passed with the session start event, if any
    pub client_session_id: Option<String>,
    pub backend_session_id: String,
}

#[derive(Debug, Default)]
struct SenderInner {
    queue: VecDeque<MediaHit>,
    active: bool,
    aborted: bool,
    abandoned: bool,
    sending: bool,
    retry_count: u32,
    backend_session_id: Option<String>,
    last_hit_ts: Option<i64>,
}

/// A request taken off the queue, waiting to be posted
#[derive(Debug)]
pub(crate) struct PendingSend {
    request: HitRequest,
    is_session_start: bool,
    client_session_id: Option<String>,
}

/// Delivery queue of one local session
pub struct SessionSender {
    id: SessionId,
    inner: Arc<Mutex<SenderInner>>,
    state: Arc<dyn StateProvider>,
    transport: Arc<dyn HitTransport>,
    events: broadcast::Sender<SessionCreated>,
    max_retries: u32,
}

impl SessionSender {
    pub fn new(
        id: SessionId,
        state: Arc<dyn StateProvider>,
        transport: Arc<dyn HitTransport>,
        events: broadcast::Sender<SessionCreated>,
        config: &SenderConfig,
    ) -> Self {
        Self {
            id,
            inner: Arc::new(Mutex::new(SenderInner {
                active: true,
                ..Default::default()
            })),
            state,
            transport,
            events,
            max_retries: config.session_start_retries,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Append a hit. Ignored once the session has ended.
    pub fn queue_hit(&self, hit: MediaHit) {
        let mut inner = self.inner.lock();
        if !inner.active || inner.abandoned {
            trace!(session = %self.id, event = %hit.event_type, "Session inactive, dropping hit");
            return;
        }

        inner.queue.push_back(hit);
    }

    /// Stop accepting hits; queued hits are still delivered
    pub fn end(&self) {
        self.inner.lock().active = false;
    }

    /// Stop accepting hits and drop everything queued
    pub fn abort(&self) {
        let mut inner = self.inner.lock();
        inner.active = false;
        inner.aborted = true;
        inner.queue.clear();
    }

    /// Ended or abandoned, nothing in flight and nothing queued
    pub fn is_finished(&self) -> bool {
        let inner = self.inner.lock();
        (!inner.active || inner.abandoned) && !inner.sending && inner.queue.is_empty()
    }

    pub fn is_abandoned(&self) -> bool {
        self.inner.lock().abandoned
    }

    pub fn backend_session_id(&self) -> Option<String> {
        self.inner.lock().backend_session_id.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Start delivering the next hit in the background, if one can be sent.
    ///
    /// Needs a tokio runtime; without one nothing is taken off the queue.
    pub fn process(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(session = %self.id, "No tokio runtime, skipping delivery");
            return;
        };
        let Some(pending) = self.take_next() else {
            return;
        };

        let inner = self.inner.clone();
        let transport = self.transport.clone();
        let events = self.events.clone();
        let id = self.id;
        let max_retries = self.max_retries;

        handle.spawn(async move {
            let result = transport.post(pending.request.clone()).await;
            complete(&inner, id, &events, max_retries, pending, result);
        });
    }

    /// Deliver queued hits one after another until nothing more can be sent
    pub async fn flush(&self) {
        while let Some(pending) = self.take_next() {
            let result = self.transport.post(pending.request.clone()).await;
            complete(&self.inner, self.id, &self.events, self.max_retries, pending, result);
        }
    }

    /// Take the head of the queue and mark it in flight
    pub(crate) fn take_next(&self) -> Option<PendingSend> {
        let mut inner = self.inner.lock();
        loop {
            if inner.sending || inner.abandoned {
                return None;
            }
            let hit = inner.queue.front()?.clone();

            if self.state.privacy_status() != PrivacyStatus::OptIn {
                trace!(session = %self.id, "Privacy status is not opted in, holding hits");
                return None;
            }
            if !self.state.is_connected() {
                trace!(session = %self.id, "No network connection, holding hits");
                return None;
            }
            let config = self.state.tracking_config();
            if let Some(field) = config.missing_field() {
                trace!(session = %self.id, field, "Tracking configuration incomplete, holding hits");
                return None;
            }
            // Checked above
            let server = config.collection_server.clone().unwrap_or_default();

            let is_session_start = hit.is_session_start();
            let url = match (inner.backend_session_id.clone(), is_session_start) {
                (_, true) => session_start_url(&server),
                (Some(backend_id), false) => session_events_url(&server, &backend_id),
                (None, false) => {
                    debug!(
                        session = %self.id,
                        event = %hit.event_type,
                        "No backend session id, dropping hit"
                    );
                    inner.queue.pop_front();
                    continue;
                }
            };
            let url = match url {
                Ok(url) => url,
                Err(e) => {
                    warn!(session = %self.id, error = %e, "Invalid collection server, dropping hit");
                    inner.queue.pop_front();
                    continue;
                }
            };

            let client_session_id = hit
                .params
                .get(params::SESSION_ID)
                .and_then(|v| v.as_str())
                .map(str::to_owned);
            let request = HitRequest {
                url,
                headers: request_headers(config.validation_token.as_deref()),
                body: build_report(&hit, &config),
            };

            if let Some(gap_ms) = inner.last_hit_ts.and_then(|last| hit_gap(last, hit.ts)) {
                warn!(
                    session = %self.id,
                    gap_ms,
                    "Consecutive hits are more than 60 seconds apart"
                );
            }
            inner.last_hit_ts = Some(hit.ts);

            inner.sending = true;
            trace!(session = %self.id, event = %hit.event_type, "Sending hit");
            return Some(PendingSend {
                request,
                is_session_start,
                client_session_id,
            });
        }
    }
}

/// Gap between two consecutive hits when it is large enough to report
fn hit_gap(last_ts: i64, ts: i64) -> Option<i64> {
    let gap = ts.saturating_sub(last_ts);
    (gap >= HIT_GAP_WARNING_MS).then_some(gap)
}

fn check_status(response: HitResponse) -> Result<HitResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(Error::HttpStatus {
            status: response.status,
        })
    }
}

/// Apply the outcome of a delivery to the session
fn complete(
    inner: &Mutex<SenderInner>,
    id: SessionId,
    events: &broadcast::Sender<SessionCreated>,
    max_retries: u32,
    pending: PendingSend,
    result: Result<HitResponse>,
) {
    let mut inner = inner.lock();
    inner.sending = false;

    if inner.aborted {
        trace!(session = %id, "Session aborted while sending, ignoring response");
        return;
    }

    let result = result.and_then(check_status);

    if !pending.is_session_start {
        if let Err(e) = result {
            debug!(session = %id, error = %e, "Dropping hit after failed delivery");
        }
        inner.queue.pop_front();
        return;
    }

    let backend_session_id = match result {
        Ok(response) => response.location.as_deref().and_then(extract_session_id),
        Err(e) => {
            debug!(session = %id, error = %e, "Session start failed");
            None
        }
    };

    match backend_session_id {
        Some(backend_session_id) => {
            info!(session = %id, backend = %backend_session_id, "Backend session created");
            inner.queue.pop_front();
            inner.retry_count = 0;
            inner.backend_session_id = Some(backend_session_id.clone());
            let _ = events.send(SessionCreated {
                client_session_id: pending.client_session_id,
                backend_session_id,
            });
        }
        None if inner.retry_count < max_retries => {
            inner.retry_count += 1;
            debug!(session = %id, attempt = inner.retry_count, "Retrying session start");
        }
        None => {
            warn!(session = %id, "Unable to create backend session, abandoning queued hits");
            inner.queue.clear();
            inner.abandoned = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::hit::{HitEventType, HitParams};
    use crate::state::MediaState;
    use crate::types::Metadata;
    use async_trait::async_trait;
    use serde_json::json;

    /// Transport answering from a script and recording every request
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HitResponse>>>,
        requests: Mutex<Vec<HitRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<HitResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn paths(&self) -> Vec<String> {
            self.requests.lock().iter().map(|r| r.url.path().to_string()).collect()
        }
    }

    #[async_trait]
    impl HitTransport for ScriptedTransport {
        async fn post(&self, request: HitRequest) -> Result<HitResponse> {
            self.requests.lock().push(request);
            self.responses.lock().pop_front().unwrap_or(Ok(ok()))
        }
    }

    fn ok() -> HitResponse {
        HitResponse { status: 200, location: None }
    }

    fn created(id: &str) -> HitResponse {
        HitResponse {
            status: 201,
            location: Some(format!("/api/v1/sessions/{id}")),
        }
    }

    fn state() -> Arc<MediaState> {
        let state = MediaState::new(TrackingConfig {
            collection_server: Some("collection.example.com".into()),
            analytics_server: Some("analytics.example.com".into()),
            report_suite_id: Some("rsid".into()),
            org_id: Some("org".into()),
            visitor_id: Some("mcid".into()),
            ..Default::default()
        });
        state.set_privacy_status(PrivacyStatus::OptIn);
        Arc::new(state)
    }

    fn hit(event_type: HitEventType, ts: i64) -> MediaHit {
        let params = if event_type == HitEventType::SessionStart {
            json!({ "sessionid": "client-1" }).as_object().cloned().unwrap()
        } else {
            HitParams::new()
        };
        MediaHit::new(event_type, params, Metadata::new(), HitParams::new(), 0.0, ts)
    }

    fn sender(
        state: Arc<MediaState>,
        transport: Arc<ScriptedTransport>,
    ) -> (SessionSender, broadcast::Receiver<SessionCreated>) {
        let (tx, rx) = broadcast::channel(8);
        let sender = SessionSender::new(SessionId::new(), state, transport, tx, &SenderConfig::default());
        (sender, rx)
    }

    #[tokio::test]
    async fn test_backend_id_routes_later_hits() {
        let transport = ScriptedTransport::new(vec![Ok(created("backend-1"))]);
        let (sender, mut created_rx) = sender(state(), transport.clone());

        sender.queue_hit(hit(HitEventType::SessionStart, 0));
        sender.queue_hit(hit(HitEventType::Play, 0));
        sender.queue_hit(hit(HitEventType::Ping, 10_000));
        sender.end();
        sender.flush().await;

        assert_eq!(
            transport.paths(),
            vec![
                "/api/v1/sessions",
                "/api/v1/sessions/backend-1/events",
                "/api/v1/sessions/backend-1/events",
            ]
        );
        assert_eq!(sender.backend_session_id().as_deref(), Some("backend-1"));
        assert!(sender.is_finished());

        let event = created_rx.try_recv().unwrap();
        assert_eq!(event.client_session_id.as_deref(), Some("client-1"));
        assert_eq!(event.backend_session_id, "backend-1");
    }

    #[tokio::test]
    async fn test_session_start_retried_then_abandoned() {
        let failed = || Ok(HitResponse { status: 500, location: None });
        let transport = ScriptedTransport::new(vec![failed(), failed(), failed()]);
        let (sender, _rx) = sender(state(), transport.clone());

        sender.queue_hit(hit(HitEventType::SessionStart, 0));
        sender.queue_hit(hit(HitEventType::Play, 0));
        sender.flush().await;

        assert_eq!(transport.paths(), vec!["/api/v1/sessions"; 3]);
        assert!(sender.is_abandoned());
        assert_eq!(sender.queue_len(), 0);
        assert!(sender.is_finished());

        sender.queue_hit(hit(HitEventType::Ping, 10_000));
        assert_eq!(sender.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_retry_recovers_session_start() {
        let transport = ScriptedTransport::new(vec![
            Ok(HitResponse { status: 201, location: None }),
            Ok(created("b")),
        ]);
        let (sender, _rx) = sender(state(), transport.clone());

        sender.queue_hit(hit(HitEventType::SessionStart, 0));
        sender.queue_hit(hit(HitEventType::Play, 0));
        sender.flush().await;

        assert_eq!(transport.paths().len(), 3);
        assert!(!sender.is_abandoned());
        assert_eq!(sender.backend_session_id().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_failed_event_hit_dropped_without_retry() {
        let transport = ScriptedTransport::new(vec![
            Ok(created("b")),
            Ok(HitResponse { status: 404, location: None }),
        ]);
        let (sender, _rx) = sender(state(), transport.clone());

        sender.queue_hit(hit(HitEventType::SessionStart, 0));
        sender.queue_hit(hit(HitEventType::Play, 0));
        sender.queue_hit(hit(HitEventType::Ping, 10_000));
        sender.flush().await;

        assert_eq!(transport.paths().len(), 3);
        assert_eq!(sender.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_gate_holds_hits() {
        let state = state();
        state.set_privacy_status(PrivacyStatus::Unknown);
        let transport = ScriptedTransport::new(vec![Ok(created("b"))]);
        let (sender, _rx) = sender(state.clone(), transport.clone());

        sender.queue_hit(hit(HitEventType::SessionStart, 0));
        sender.flush().await;
        assert!(transport.paths().is_empty());

        state.set_privacy_status(PrivacyStatus::OptIn);
        state.set_connected(false);
        sender.flush().await;
        assert!(transport.paths().is_empty());

        state.set_connected(true);
        state.update_tracking_config(|c| c.org_id = None);
        sender.flush().await;
        assert!(transport.paths().is_empty());
        assert_eq!(sender.queue_len(), 1);

        state.update_tracking_config(|c| c.org_id = Some("org".into()));
        sender.flush().await;
        assert_eq!(transport.paths().len(), 1);
    }

    #[tokio::test]
    async fn test_hits_without_session_start_dropped() {
        let transport = ScriptedTransport::new(vec![]);
        let (sender, _rx) = sender(state(), transport.clone());

        sender.queue_hit(hit(HitEventType::Play, 0));
        sender.flush().await;

        assert!(transport.paths().is_empty());
        assert_eq!(sender.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_abort_while_sending_discards_response() {
        let transport = ScriptedTransport::new(vec![Ok(created("b"))]);
        let (sender, _rx) = sender(state(), transport.clone());

        sender.queue_hit(hit(HitEventType::SessionStart, 0));
        let pending = sender.take_next().unwrap();
        sender.abort();

        let result = transport.post(pending.request.clone()).await;
        complete(&sender.inner, sender.id, &sender.events, sender.max_retries, pending, result);

        assert!(sender.backend_session_id().is_none());
        assert!(sender.is_finished());
    }

    #[test]
    fn test_hit_gap() {
        assert_eq!(hit_gap(0, 59_999), None);
        assert_eq!(hit_gap(0, 60_000), Some(60_000));
        assert_eq!(hit_gap(10_000, 0), None);
        assert_eq!(hit_gap(i64::MIN, i64::MAX), Some(i64::MAX));
        assert_eq!(hit_gap(i64::MAX, i64::MIN), None);
    }

    #[test]
    fn test_process_without_runtime_keeps_hits() {
        let transport = ScriptedTransport::new(vec![Ok(created("b"))]);
        let (sender, _rx) = sender(state(), transport.clone());

        sender.queue_hit(hit(HitEventType::SessionStart, 0));
        sender.process();
        assert!(transport.paths().is_empty());
        assert_eq!(sender.queue_len(), 1);

        tokio_test::block_on(sender.flush());
        assert_eq!(transport.paths(), vec!["/api/v1/sessions"]);
        assert_eq!(sender.backend_session_id().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_ended_session_ignores_new_hits() {
        let transport = ScriptedTransport::new(vec![]);
        let (sender, _rx) = sender(state(), transport);

        sender.end();
        sender.queue_hit(hit(HitEventType::SessionStart, 0));
        assert_eq!(sender.queue_len(), 0);
        assert!(sender.is_finished());
    }
}
