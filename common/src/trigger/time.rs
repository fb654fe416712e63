// Time trigger: fires each time accumulated tick time reaches an interval

use super::{trigger_id, EventTrigger, Fired, Payload, PayloadFactory, Tick};
use std::fmt;
use std::time::Duration;
use tracing::debug;

enum Source {
    Empty,
    Once(Option<Payload>),
    Factory(PayloadFactory),
}

/// Accumulates tick deltas and fires once the interval is reached.
///
/// A single long tick fires at most once; the accumulator then restarts from
/// zero and any excess is discarded.
pub struct TimeTrigger {
    id: String,
    enabled: bool,
    interval: Duration,
    accumulated: Duration,
    repeat: bool,
    source: Source,
}

impl TimeTrigger {
    pub fn new(interval: Duration) -> Self {
        Self {
            id: trigger_id("time"),
            enabled: true,
            interval,
            accumulated: Duration::ZERO,
            repeat: true,
            source: Source::Empty,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// With `repeat = false` the trigger disables itself after the first fire
    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Inject this payload on the next fire only
    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.source = Source::Once(Some(payload.into()));
        self
    }

    /// Build a fresh payload on every fire
    pub fn with_event_factory<F>(mut self, factory: F) -> Self
    where
        F: FnMut(&Tick) -> Payload + Send + 'static,
    {
        self.source = Source::Factory(Box::new(factory));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }

    pub fn repeats(&self) -> bool {
        self.repeat
    }
}

impl fmt::Debug for TimeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeTrigger")
            .field("id", &self.id)
            .field("enabled", &self.enabled)
            .field("interval", &self.interval)
            .field("accumulated", &self.accumulated)
            .field("repeat", &self.repeat)
            .finish()
    }
}

impl EventTrigger for TimeTrigger {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn poll_and_fire(&mut self, tick: &Tick, out: &mut Fired) -> bool {
        self.accumulated = self.accumulated.saturating_add(tick.delta);
        if self.accumulated < self.interval {
            return false;
        }
        self.accumulated = Duration::ZERO;

        let payload = match &mut self.source {
            Source::Empty => None,
            Source::Once(payload) => payload.take(),
            Source::Factory(factory) => Some(factory(tick)),
        };
        if let Some(payload) = payload {
            out.push(payload);
        }

        if !self.repeat {
            self.enabled = false;
        }
        debug!(
            trigger_id = %self.id,
            frame = tick.frame,
            repeat = self.repeat,
            "Time trigger fired"
        );
        true
    }
}
