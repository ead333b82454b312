//! Output formatting for CLI

use chrono::{DateTime, Utc};
use kino_analytics::{MediaHit, RecordedSession};
use serde::Serialize;

/// Output format options
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

#[derive(Serialize)]
struct SessionOutput<'a> {
    id: String,
    ended: bool,
    hits: &'a [MediaHit],
}

/// Recorded sessions as pretty JSON
pub fn sessions_json(sessions: &[RecordedSession]) -> serde_json::Result<String> {
    let out: Vec<_> = sessions
        .iter()
        .map(|s| SessionOutput {
            id: s.id.to_string(),
            ended: s.ended,
            hits: &s.hits,
        })
        .collect();
    serde_json::to_string_pretty(&out)
}

/// Event time as time of day, or raw milliseconds when out of range
fn format_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts)
        .map(|t| t.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| format!("{ts}ms"))
}

/// One line summary of a hit
pub fn hit_line(hit: &MediaHit) -> String {
    let mut line = format!(
        "{} {:<16} playhead={:.1}",
        format_ts(hit.ts),
        hit.event_type.as_str(),
        hit.playhead
    );
    if !hit.params.is_empty() {
        line.push_str(&format!(" params={}", hit.params.len()));
    }
    if !hit.qoe_data.is_empty() {
        line.push_str(&format!(" qoe={}", serde_json::Value::Object(hit.qoe_data.clone())));
    }
    line
}
