// Trigger framework: per-tick poll sources that inject events into the queue

pub mod combo;
pub mod manual;
pub mod time;

pub use combo::{ComboFeed, ComboTrigger};
pub use manual::{ManualTrigger, ManualTriggerHandle};
pub use time::TimeTrigger;

use crate::event::{Event, MacroEvent};
use std::time::Duration;
use uuid::Uuid;

/// One scheduling step: the frame index and the time elapsed since the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub frame: u64,
    pub delta: Duration,
}

impl Tick {
    pub fn new(frame: u64, delta: Duration) -> Self {
        Self { frame, delta }
    }
}

/// What a trigger injects when it fires
#[derive(Debug)]
pub enum Payload {
    Single(Event),
    Macro(MacroEvent),
}

impl From<Event> for Payload {
    fn from(event: Event) -> Self {
        Payload::Single(event)
    }
}

impl From<MacroEvent> for Payload {
    fn from(macro_event: MacroEvent) -> Self {
        Payload::Macro(macro_event)
    }
}

/// Builds a fresh payload each time a repeating trigger fires
pub type PayloadFactory = Box<dyn FnMut(&Tick) -> Payload + Send>;

/// Payloads collected from triggers during one tick, in firing order
#[derive(Debug, Default)]
pub struct Fired {
    payloads: Vec<Payload>,
}

impl Fired {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, payload: impl Into<Payload>) {
        self.payloads.push(payload.into());
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn into_payloads(self) -> Vec<Payload> {
        self.payloads
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.payloads.truncate(len);
    }
}

/// Poll source driven once per tick by the queue
pub trait EventTrigger: Send {
    fn id(&self) -> &str;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// Advance the trigger by one tick, pushing anything it fires into `out`.
    /// Returns whether it fired.
    fn poll_and_fire(&mut self, tick: &Tick, out: &mut Fired) -> bool;
}

pub(crate) fn trigger_id(kind: &str) -> String {
    format!("trigger-{}-{}", kind, Uuid::new_v4())
}
