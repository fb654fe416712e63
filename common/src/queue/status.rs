// Queue status: serialisable snapshots and the periodic status log

use crate::event::{EventCategory, EventId, EventOutcome, EventRef, EventStatus, MacroRef};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct EventSnapshot {
    pub id: EventId,
    pub name: String,
    pub category: EventCategory,
    pub status: EventStatus,
    pub outcome: Option<EventOutcome>,
    pub duration_ms: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl From<&EventRef> for EventSnapshot {
    fn from(event: &EventRef) -> Self {
        Self {
            id: event.id(),
            name: event.name().to_string(),
            category: event.category(),
            status: event.status(),
            outcome: event.outcome(),
            duration_ms: event
                .execution_duration()
                .map(|d| d.as_secs_f64() * 1000.0),
            created_at: event.created_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MacroSnapshot {
    pub id: String,
    pub completed: bool,
    pub remaining: usize,
    pub failed: usize,
    pub events: Vec<EventSnapshot>,
}

impl From<&MacroRef> for MacroSnapshot {
    fn from(macro_event: &MacroRef) -> Self {
        Self {
            id: macro_event.id().to_string(),
            completed: macro_event.is_completed(),
            remaining: macro_event.remaining(),
            failed: macro_event.failed_count(),
            events: macro_event.members().iter().map(EventSnapshot::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerSnapshot {
    pub id: String,
    pub enabled: bool,
}

/// Point-in-time view of the queue for dashboards
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Index of the next tick
    pub frame: u64,
    pub waiting: usize,
    /// Ready events waiting for room in their pool
    pub held: usize,
    pub in_flight: BTreeMap<EventCategory, usize>,
    pub triggers: Vec<TriggerSnapshot>,
    pub macros: Vec<MacroSnapshot>,
}

impl QueueSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Emits one line per tracked macro-event and constituent every interval
#[derive(Debug)]
pub(crate) struct StatusLogger {
    interval: Option<Duration>,
    last_logged: Instant,
}

impl StatusLogger {
    pub(crate) fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last_logged: Instant::now(),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// True when a status line is due; restarts the interval
    pub(crate) fn due(&mut self, now: Instant) -> bool {
        match self.interval {
            Some(interval) if now.duration_since(self.last_logged) >= interval => {
                self.last_logged = now;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn log(&self, waiting: usize, macros: &[MacroRef]) {
        info!(
            waiting = waiting,
            macros = macros.len(),
            "Event queue status"
        );
        for macro_event in macros {
            info!(
                macro_id = macro_event.id(),
                completed = macro_event.is_completed(),
                remaining = macro_event.remaining(),
                failed = macro_event.failed_count(),
                "Macro event status"
            );
            for event in macro_event.members() {
                let duration_ms = event.execution_duration().map(|d| d.as_millis() as u64);
                info!(
                    macro_id = macro_event.id(),
                    event_id = %event.id(),
                    event_name = event.name(),
                    status = %event.status(),
                    duration_ms = duration_ms,
                    "Event status"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, MacroEvent, Work};

    #[test]
    fn test_logger_disabled_without_interval() {
        let mut logger = StatusLogger::new(None);
        assert!(!logger.is_enabled());
        assert!(!logger.due(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn test_logger_due_after_interval() {
        let mut logger = StatusLogger::new(Some(Duration::from_secs(5)));
        let start = logger.last_logged;
        assert!(!logger.due(start + Duration::from_secs(1)));
        assert!(logger.due(start + Duration::from_secs(5)));
        // interval restarts from the last line
        assert!(!logger.due(start + Duration::from_secs(6)));
    }

    #[test]
    fn test_macro_snapshot_serializes() {
        let group = MacroEvent::new("boot")
            .with_event(Event::system("mount", Work::noop()))
            .with_event(Event::render("splash", Work::noop()));
        let snapshot = MacroSnapshot::from(&group.handle());
        assert_eq!(snapshot.events.len(), 2);
        assert!(!snapshot.completed);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["id"], "boot");
        assert_eq!(json["events"][0]["status"], "WAITING");
        assert_eq!(json["events"][1]["category"], "render");
    }
}
