// Manual trigger: fires once per explicit request

use super::{trigger_id, EventTrigger, Fired, Payload, Tick};
use crate::event::{Event, MacroEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct ManualShared {
    pending: AtomicBool,
    payload: Mutex<Option<Payload>>,
}

/// Single-shot trigger armed with at most one payload.
///
/// `fire` arms exactly one firing which the next poll consumes. The payload is
/// taken by that firing, so the trigger has to be re-armed with a new one.
#[derive(Debug)]
pub struct ManualTrigger {
    id: String,
    enabled: bool,
    shared: Arc<ManualShared>,
}

/// Cloneable remote for arming a registered manual trigger
#[derive(Debug, Clone)]
pub struct ManualTriggerHandle {
    id: String,
    shared: Arc<ManualShared>,
}

impl ManualTrigger {
    pub fn new() -> Self {
        Self {
            id: trigger_id("manual"),
            enabled: true,
            shared: Arc::new(ManualShared::default()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Remote that stays valid after the trigger moves into the queue
    pub fn handle(&self) -> ManualTriggerHandle {
        ManualTriggerHandle {
            id: self.id.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn set_single_payload(&self, event: Event) {
        self.shared.set_payload(Payload::Single(event));
    }

    pub fn set_macro_payload(&self, macro_event: MacroEvent) {
        self.shared.set_payload(Payload::Macro(macro_event));
    }

    pub fn fire(&self) {
        self.shared.pending.store(true, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.shared.pending.load(Ordering::Acquire)
    }
}

impl Default for ManualTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualShared {
    fn set_payload(&self, payload: Payload) {
        *self.payload.lock().unwrap_or_else(PoisonError::into_inner) = Some(payload);
    }
}

impl ManualTriggerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_single_payload(&self, event: Event) {
        self.shared.set_payload(Payload::Single(event));
    }

    pub fn set_macro_payload(&self, macro_event: MacroEvent) {
        self.shared.set_payload(Payload::Macro(macro_event));
    }

    pub fn fire(&self) {
        self.shared.pending.store(true, Ordering::Release);
    }
}

impl EventTrigger for ManualTrigger {
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
        if !self.shared.pending.swap(false, Ordering::AcqRel) {
            return false;
        }

        let payload = self
            .shared
            .payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match payload {
            Some(payload) => {
                debug!(trigger_id = %self.id, frame = tick.frame, "Manual trigger fired");
                out.push(payload);
            }
            None => {
                warn!(
                    trigger_id = %self.id,
                    frame = tick.frame,
                    "Manual trigger fired without a payload"
                );
            }
        }
        true
    }
}
