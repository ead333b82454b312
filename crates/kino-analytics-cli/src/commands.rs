//! CLI command implementations

use crate::output::{self, OutputFormat};
use anyhow::Context;
use kino_analytics::{
    AnalyticsConfig, HitRecorder, MediaState, PrivacyStatus, RealTimeService, SessionTracker,
    TrackerEvent,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Load the configuration file, or defaults when none is given
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AnalyticsConfig> {
    match path {
        Some(path) => AnalyticsConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(AnalyticsConfig::default()),
    }
}

/// Parse a JSON-lines event file. Blank lines and lines starting with `#`
/// are skipped.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<TrackerEvent>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_events(&contents)
}

fn parse_events(contents: &str) -> anyhow::Result<Vec<TrackerEvent>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid event on line {}", index + 1))
        })
        .collect()
}

/// Feed events through a tracker, returning how many were rejected
fn run_tracker(tracker: &mut SessionTracker, events: &[TrackerEvent]) -> usize {
    let mut rejected = 0;
    for event in events {
        if let Err(e) = tracker.try_track(event) {
            warn!(event = ?event.name, ts = ?event.timestamp, code = e.error_code(), "{e}");
            rejected += 1;
        }
    }
    rejected
}

/// Replay events into an in-memory recorder and print the hits
pub fn replay(events_path: &Path, config: &AnalyticsConfig, format: &str) -> anyhow::Result<()> {
    let events = read_events(events_path)?;
    let recorder = Arc::new(HitRecorder::new());
    let mut tracker = SessionTracker::new(recorder.clone(), config.tracker.clone());

    let rejected = run_tracker(&mut tracker, &events);
    let sessions = recorder.sessions();

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", output::sessions_json(&sessions)?),
        OutputFormat::Text => {
            println!("Replayed {} events from {}", events.len(), events_path.display());
            println!("  Rejected: {}", rejected);
            println!("  Sessions: {}", sessions.len());
            for (i, session) in sessions.iter().enumerate() {
                println!("\nSession {} ({}){}", i + 1, session.id, if session.ended { " ended" } else { "" });
                for hit in &session.hits {
                    println!("  {}", output::hit_line(hit));
                }
            }
        }
    }

    Ok(())
}

/// Replay events and deliver the generated sessions
pub async fn send(
    events_path: &Path,
    mut config: AnalyticsConfig,
    server: Option<String>,
    format: &str,
) -> anyhow::Result<()> {
    if let Some(server) = server {
        config.tracking.collection_server = Some(server);
    }
    if let Some(field) = config.tracking.missing_field() {
        anyhow::bail!("tracking configuration is missing {field}");
    }

    let events = read_events(events_path)?;
    let state = Arc::new(MediaState::new(config.tracking.clone()));
    state.set_privacy_status(PrivacyStatus::OptIn);

    let service = Arc::new(RealTimeService::with_reqwest(state, &config)?);
    let mut created = service.subscribe();

    let mut tracker = SessionTracker::new(service.clone(), config.tracker.clone());
    let rejected = run_tracker(&mut tracker, &events);
    service.flush().await;

    let mut backend_sessions = Vec::new();
    while let Ok(event) = created.try_recv() {
        info!(
            client = ?event.client_session_id,
            backend = %event.backend_session_id,
            "Session created"
        );
        backend_sessions.push(event.backend_session_id);
    }

    match OutputFormat::from(format) {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "events": events.len(),
                "rejected": rejected,
                "backend_sessions": backend_sessions,
                "pending_sessions": service.session_count(),
            }))?
        ),
        OutputFormat::Text => {
            println!("Delivered {} events from {}", events.len(), events_path.display());
            println!("  Rejected: {}", rejected);
            for id in &backend_sessions {
                println!("  Backend session: {}", id);
            }
            if service.session_count() > 0 {
                println!("  Sessions not fully delivered: {}", service.session_count());
            }
        }
    }

    service.shutdown();
    Ok(())
}

/// Report the effective configuration and what delivery still needs
pub fn check(config: &AnalyticsConfig, format: &str) -> anyhow::Result<()> {
    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => {
            println!("Tracker:");
            println!("  Downloaded content: {}", config.tracker.downloaded_content);
            println!("  Channel: {}", config.tracker.channel.as_deref().unwrap_or("-"));
            println!("\nSender:");
            println!("  Tick interval: {}ms", config.sender.tick_interval_ms);
            println!("  HTTP timeout: {}s", config.sender.http_timeout_secs);
            println!("  Session start retries: {}", config.sender.session_start_retries);
            println!("\nTracking:");
            match config.tracking.missing_field() {
                None => println!("  Complete"),
                Some(field) => println!("  Missing: {}", field),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events_skips_comments() {
        let contents = r#"
# session
{"event.name":"sessionstart","event.timestamp":0}

{"event.name":"play","event.timestamp":10}
"#;
        let events = parse_events(contents).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].name.as_deref(), Some("play"));
    }

    #[test]
    fn test_parse_events_reports_line() {
        let err = parse_events("{\"event.name\":\"play\"}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.sender.tick_interval_ms, 250);
    }
}
