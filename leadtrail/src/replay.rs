//! Scripted session replay
//!
//! A script is newline-delimited JSON. Each step carries an offset from the
//! start of the session and at most one host event or command:
//!
//! ```text
//! {"atMs": 0, "event": {"type": "mutation", "added": [...]}}
//! {"atMs": 1200, "event": {"type": "blur", "node": 3}}
//! {"atMs": 9000}
//! ```
//!
//! A step with neither only moves the clock. Blank lines and lines starting
//! with `#` are skipped.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use leadtrail_core::clock::{Clock, ManualClock};
use leadtrail_core::{Command, Engine, HostEvent};
use serde::Deserialize;

/// One line of a replay script
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Step {
    #[serde(default)]
    pub at_ms: i64,
    #[serde(default)]
    pub event: Option<HostEvent>,
    #[serde(default)]
    pub command: Option<Command>,
}

/// What a replay did
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub steps: usize,
    /// Timer deadlines fired between steps
    pub ticks: usize,
    pub elapsed_ms: i64,
}

/// Parse a script, rejecting steps that go back in time
pub fn parse_script(content: &str) -> Result<Vec<Step>> {
    let mut steps: Vec<Step> = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let step: Step = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid step", index + 1))?;

        if step.at_ms < 0 {
            bail!("line {}: atMs must not be negative", index + 1);
        }
        if step.event.is_some() && step.command.is_some() {
            bail!("line {}: a step takes an event or a command, not both", index + 1);
        }
        if let Some(previous) = steps.last() {
            if step.at_ms < previous.at_ms {
                bail!(
                    "line {}: atMs {} is before the previous step ({})",
                    index + 1,
                    step.at_ms,
                    previous.at_ms
                );
            }
        }

        steps.push(step);
    }

    Ok(steps)
}

/// Start `engine` and feed it `steps`, firing timers as the clock passes them
///
/// The engine is left running; the caller decides when to shut it down.
pub fn run(engine: &mut Engine, clock: &ManualClock, steps: Vec<Step>) -> Result<ReplaySummary> {
    let origin = clock.now();
    let mut summary = ReplaySummary::default();

    engine.start();

    for step in steps {
        let target = Duration::try_milliseconds(step.at_ms)
            .and_then(|offset| origin.checked_add_signed(offset))
            .with_context(|| format!("atMs {} is out of range", step.at_ms))?;
        summary.ticks += advance(engine, clock, target);

        if let Some(event) = step.event {
            engine.handle(event);
        }
        if let Some(command) = step.command {
            engine.command(command);
        }

        summary.steps += 1;
        summary.elapsed_ms = step.at_ms;
    }

    tracing::debug!(
        steps = summary.steps,
        ticks = summary.ticks,
        elapsed_ms = summary.elapsed_ms,
        "Replay finished"
    );
    Ok(summary)
}

/// Fire every deadline up to `target` in order, then park the clock there
fn advance(engine: &mut Engine, clock: &ManualClock, target: DateTime<Utc>) -> usize {
    let mut ticks = 0;
    while let Some(deadline) = engine.next_deadline() {
        if deadline > target {
            break;
        }
        clock.set(deadline);
        engine.tick();
        ticks += 1;
    }
    clock.set(target);
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use leadtrail_core::collector::MemoryTransport;
    use leadtrail_core::{EngineDeps, EventType, TrackerConfig};
    use std::sync::Arc;

    const CONTACT_FORM: &str = r#"{"atMs": 0, "event": {"type": "mutation", "added": [
        {"id": 1, "tag": "form", "attributes": {"class": "lead"}, "children": [
            {"id": 2, "tag": "input", "attributes": {"type": "email", "name": "email"}},
            {"id": 3, "tag": "input", "attributes": {"type": "text", "name": "company"}}
        ]}
    ]}}"#;

    fn engine(config: &str) -> (Engine, ManualClock, MemoryTransport) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
        let transport = MemoryTransport::new();
        let deps = EngineDeps::in_memory(Arc::new(clock.clone()), Box::new(transport.clone()));
        let config = TrackerConfig::from_json(config).unwrap();
        (Engine::new(config, deps).unwrap(), clock, transport)
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let script = "# warm up\n\n{\"atMs\": 0}\n{\"atMs\": 5, \"event\": {\"type\": \"before_unload\"}}\n";
        let steps = parse_script(script).unwrap();

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].event, Some(HostEvent::BeforeUnload));
    }

    #[test]
    fn test_parse_rejects_time_going_backwards() {
        let err = parse_script("{\"atMs\": 10}\n{\"atMs\": 5}").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_rejects_unknown_fields() {
        assert!(parse_script("{\"at\": 10}").is_err());
    }

    #[test]
    fn test_parse_rejects_event_and_command_together() {
        let line = r#"{"atMs": 0, "event": {"type": "before_unload"}, "command": {"command": "track", "name": "x"}}"#;
        assert!(parse_script(line).is_err());
    }

    #[test]
    fn test_run_rejects_offset_past_calendar() {
        let (mut engine, clock, _transport) = engine(r#"{"apiKey": "k"}"#);
        let steps = parse_script("{\"atMs\": 0}\n{\"atMs\": 9223372036854775807}").unwrap();

        let err = run(&mut engine, &clock, steps).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
    }

    #[test]
    fn test_run_fires_debounce_between_steps() {
        let (mut engine, clock, transport) = engine(
            r#"{"apiKey": "k", "widgets": {"forms": {"enabled": true, "captureSelector": "form.lead",
                "batchCapture": {"enabled": true, "minFieldsForCapture": 2}, "flushInterval": 0}}}"#,
        );
        let script = format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}",
            CONTACT_FORM.replace('\n', " "),
            r#"{"atMs": 1000, "event": {"type": "input", "node": 2, "value": "ada@example.com"}}"#,
            r#"{"atMs": 1100, "event": {"type": "blur", "node": 2}}"#,
            r#"{"atMs": 2000, "event": {"type": "input", "node": 3, "value": "Analytical"}}"#,
            r#"{"atMs": 2100, "event": {"type": "blur", "node": 3}}"#,
            r#"{"atMs": 9000}"#,
            r#"{"atMs": 9500, "command": {"command": "track", "name": "demo_booked"}}"#,
        );

        let summary = run(&mut engine, &clock, parse_script(&script).unwrap()).unwrap();
        engine.shutdown();

        assert_eq!(summary.steps, 7);
        assert_eq!(summary.elapsed_ms, 9500);
        assert!(summary.ticks >= 1);

        let types: Vec<EventType> = transport.events().iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::TrackerInitialized,
                EventType::FormInteraction,
                EventType::Custom,
            ]
        );
    }
}
