//! Collection request bodies
//!
//! ```json
//! {
//!   "eventType": "sessionStart",
//!   "params": { "media.id": "m1", "analytics.reportSuite": "rsid" },
//!   "customMetadata": { "genre": "drama" },
//!   "qoeData": { "media.qoe.bitrate": 2000 },
//!   "playerTime": { "ts": 0, "playhead": 0.0 }
//! }
//! ```
//!
//! Empty `params`, `customMetadata` and `qoeData` are omitted.

use crate::collection::params;
use crate::config::TrackingConfig;
use crate::hit::{HitEventType, HitParams, MediaHit};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;

static SESSION_LOCATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/api/(.*)/sessions/(.*)").expect("session location pattern is valid")
});

/// Build the JSON body posted for a hit
pub fn build_report(hit: &MediaHit, config: &TrackingConfig) -> Value {
    let mut params = hit.params.clone();
    match hit.event_type {
        HitEventType::SessionStart => enrich_session_start(&mut params, config),
        HitEventType::AdStart => {
            if let Some(player_name) = &config.player_name {
                params.insert(params::AD_PLAYER_NAME.into(), player_name.clone().into());
            }
        }
        _ => {}
    }

    let mut body = Map::new();
    body.insert("eventType".into(), hit.event_type.as_str().into());
    if !params.is_empty() {
        body.insert("params".into(), Value::Object(params));
    }
    if !hit.custom_metadata.is_empty() {
        body.insert("customMetadata".into(), json!(hit.custom_metadata));
    }
    if !hit.qoe_data.is_empty() {
        body.insert("qoeData".into(), Value::Object(hit.qoe_data.clone()));
    }
    body.insert(
        "playerTime".into(),
        json!({ "ts": hit.ts, "playhead": hit.playhead }),
    );
    Value::Object(body)
}

fn enrich_session_start(params: &mut HitParams, config: &TrackingConfig) {
    let mut put = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            params.insert(key.into(), value);
        }
    };

    put(params::ANALYTICS_TRACKING_SERVER, config.analytics_server.clone().map(Value::from));
    put(params::ANALYTICS_SSL, Some(config.ssl.into()));
    put(params::ANALYTICS_REPORT_SUITE, config.report_suite_id.clone().map(Value::from));
    put(params::ANALYTICS_VISITOR_ID, config.analytics_visitor_id.clone().map(Value::from));
    put(params::ANALYTICS_AID, config.aid.clone().map(Value::from));
    put(params::VISITOR_ORG_ID, config.org_id.clone().map(Value::from));
    put(params::VISITOR_USER_ID, config.visitor_id.clone().map(Value::from));
    put(params::VISITOR_LOCATION_HINT, config.location_hint.map(Value::from));
    put(params::MEDIA_PLAYER_NAME, config.player_name.clone().map(Value::from));
    put(
        params::MEDIA_SDK_VERSION,
        config
            .app_version
            .clone()
            .filter(|v| !v.is_empty())
            .map(Value::from),
    );
    put(params::MEDIA_LIBRARY_VERSION, Some(crate::VERSION.into()));

    if !params.contains_key(params::MEDIA_CHANNEL) {
        if let Some(channel) = &config.channel {
            params.insert(params::MEDIA_CHANNEL.into(), channel.clone().into());
        }
    }

    params.remove(params::SESSION_ID);
}

/// Backend session id carried by a session start response location
pub fn extract_session_id(location: &str) -> Option<String> {
    SESSION_LOCATION_PATTERN
        .captures(location)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str().to_string())
        .filter(|id| !id.is_empty())
}
