// Combo-driven trigger: advances the combo buffer once per tick and emits
// one input-action event per newly admitted combo

use super::{trigger_id, EventTrigger, Fired, Tick};
use crate::errors::BufferError;
use crate::event::{Event, InputEvent, InputId};
use crate::input::{ComboPriority, InputCombo, InputComboBuffer, DEFAULT_ACTIVE_FRAMES};
use crate::telemetry;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Sending side for recognized combos; cheap to clone and usable from any thread
#[derive(Debug, Clone)]
pub struct ComboFeed {
    tx: mpsc::UnboundedSender<InputCombo>,
    default_ttl: u32,
}

impl ComboFeed {
    /// TTL given to combos built through `push_combo`
    pub fn with_default_ttl(mut self, frames: u32) -> Self {
        self.default_ttl = frames;
        self
    }

    pub fn default_ttl(&self) -> u32 {
        self.default_ttl
    }

    /// Queue a combo for the next frame. Returns false once the trigger is gone.
    pub fn push(&self, combo: InputCombo) -> bool {
        self.tx.send(combo).is_ok()
    }

    /// Build a combo with the feed's default TTL and queue it
    pub fn push_combo<I, S>(&self, name: impl Into<String>, identifiers: I, priority: ComboPriority) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<InputId>,
    {
        self.push(InputCombo::new(name, identifiers, priority).with_active_frames(self.default_ttl))
    }
}

/// Owns the combo buffer; the queue is its only writer
#[derive(Debug)]
pub struct ComboTrigger {
    id: String,
    enabled: bool,
    slot: u8,
    buffer: InputComboBuffer,
    rx: mpsc::UnboundedReceiver<InputCombo>,
}

impl ComboTrigger {
    pub fn new(capacity: usize, slot: u8) -> Result<(Self, ComboFeed), BufferError> {
        let buffer = InputComboBuffer::new(capacity)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let trigger = Self {
            id: trigger_id("combo"),
            enabled: true,
            slot,
            buffer,
            rx,
        };
        let feed = ComboFeed {
            tx,
            default_ttl: DEFAULT_ACTIVE_FRAMES,
        };
        Ok((trigger, feed))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn buffer(&self) -> &InputComboBuffer {
        &self.buffer
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    fn drain_feed(&mut self) -> Vec<InputCombo> {
        let mut combos = Vec::new();
        while let Ok(combo) = self.rx.try_recv() {
            combos.push(combo);
        }
        combos
    }
}

impl EventTrigger for ComboTrigger {
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
        // a rejected frame must not consume the feed
        if let Some(last) = self.buffer.last_frame().filter(|last| tick.frame < *last) {
            warn!(
                trigger_id = %self.id,
                frame = tick.frame,
                last_frame = last,
                "Combo frame went backwards, feed left for the next tick"
            );
            return false;
        }

        let combos = self.drain_feed();
        let report = match self.buffer.next_frame(tick.frame, combos) {
            Ok(report) => report,
            Err(e) => {
                warn!(trigger_id = %self.id, frame = tick.frame, error = %e, "Combo frame rejected");
                return false;
            }
        };

        if !report.evicted.is_empty() {
            telemetry::record_combo_evictions(report.evicted.len());
        }

        for combo in &report.admitted {
            debug!(
                trigger_id = %self.id,
                frame = tick.frame,
                combo = combo.name(),
                "Combo admitted"
            );
            out.push(Event::input(
                format!("combo:{}", combo.name()),
                InputEvent::action(self.slot, combo, tick.frame),
            ));
        }
        !report.admitted.is_empty()
    }
}
