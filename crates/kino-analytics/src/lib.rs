//! Kino Analytics - Media Analytics Tracker for Kino
//!
//! This crate turns raw player lifecycle events into media analytics hits:
//! - Rule-driven validation of player events
//! - Playback context tracking (ads, chapters, QoE, custom states)
//! - Hit generation with ping cadence and QoE diffing
//! - Idle, 24 hour and preroll handling
//! - Per-session delivery to a media collection server
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Kino Analytics                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   player event                                                  │
//! │        │                                                        │
//! │  ┌─────┴────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │   Session    │──│     Rule     │──│   Playback   │           │
//! │  │   Tracker    │  │    Engine    │  │   Context    │           │
//! │  └─────┬────────┘  └──────────────┘  └──────┬───────┘           │
//! │        │                                    │                   │
//! │        └──────────────┬─────────────────────┘                   │
//! │                ┌──────┴──────┐                                  │
//! │                │     Hit     │                                  │
//! │                │  Generator  │                                  │
//! │                └──────┬──────┘                                  │
//! │                       │ MediaHit                                │
//! │                ┌──────┴──────┐      ┌──────────────┐            │
//! │                │   Session   │──────│   Session    │──▶ HTTP    │
//! │                │  Registry   │      │   Sender     │            │
//! │                └─────────────┘      └──────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod rules;
pub mod context;
pub mod hit;
pub mod collection;
pub mod config;
pub mod hit_generator;
pub mod registry;
pub mod tracker;
pub mod state;
pub mod transport;
pub mod report;
pub mod sender;
pub mod service;

pub use error::{Error, Result};
pub use types::*;
pub use rules::{Rule, RuleEngine, RuleResponse};
pub use context::PlaybackContext;
pub use hit::{HitEventType, HitParams, MediaHit};
pub use config::{AnalyticsConfig, SenderConfig, TrackerConfig, TrackingConfig};
pub use hit_generator::HitGenerator;
pub use registry::{HitRecorder, RecordedSession, SessionRegistry};
pub use tracker::event::{RuleName, TrackerEvent};
pub use tracker::SessionTracker;
pub use state::{MediaState, PrivacyStatus, StateProvider};
pub use transport::{HitRequest, HitResponse, HitTransport, ReqwestTransport};
pub use sender::{SessionCreated, SessionSender};
pub use service::RealTimeService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracker library
pub fn init() {
    tracing::info!(version = VERSION, "Kino Analytics initialized");
}
