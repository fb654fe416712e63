// Macro events: named groups whose completion is derived from their members

use super::{Event, EventRef};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

#[derive(Debug)]
pub(crate) struct MacroShared {
    id: String,
    members: Mutex<Vec<EventRef>>,
    remaining: AtomicUsize,
    failed: AtomicUsize,
}

impl MacroShared {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Called by the worker that completed one member
    pub(crate) fn member_completed(&self, failed: bool) {
        if failed {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
        let before = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if before == 1 {
            info!(
                macro_id = %self.id,
                failed = self.failed.load(Ordering::Acquire),
                "Macro event completed"
            );
        }
    }
}

/// Builder for a group of events submitted together
#[derive(Debug)]
pub struct MacroEvent {
    shared: Arc<MacroShared>,
    events: Vec<Event>,
}

impl MacroEvent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(MacroShared {
                id: id.into(),
                members: Mutex::new(Vec::new()),
                remaining: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
            }),
            events: Vec::new(),
        }
    }

    /// Add a constituent and return its handle
    pub fn add_event(&mut self, event: Event) -> EventRef {
        let handle = event.handle();
        handle.attach_macro(&self.shared);
        self.shared
            .members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle.clone());
        self.shared.remaining.fetch_add(1, Ordering::AcqRel);
        self.events.push(event);
        handle
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.add_event(event);
        self
    }

    pub fn handle(&self) -> MacroRef {
        MacroRef {
            inner: Arc::clone(&self.shared),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn into_events(self) -> (MacroRef, Vec<Event>) {
        (MacroRef { inner: self.shared }, self.events)
    }
}

/// Cloneable handle to a macro event's aggregate state
#[derive(Debug, Clone)]
pub struct MacroRef {
    inner: Arc<MacroShared>,
}

impl MacroRef {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn members(&self) -> Vec<EventRef> {
        self.inner
            .members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Members that have not reached Completed yet
    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Members that completed with an error
    pub fn failed_count(&self) -> usize {
        self.inner.failed.load(Ordering::Acquire)
    }

    /// True iff every member is Completed. An empty macro is never complete.
    pub fn is_completed(&self) -> bool {
        !self.is_empty() && self.remaining() == 0
    }

    pub fn ptr_eq(&self, other: &MacroRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventOutcome, Work};

    fn run(handle: &EventRef, outcome: EventOutcome) {
        handle.begin_execution().unwrap();
        handle.complete(outcome).unwrap();
    }

    #[test]
    fn test_completion_tracks_all_members() {
        let mut macro_event = MacroEvent::new("load-level");
        let a = macro_event.add_event(Event::system("read", Work::noop()));
        let b = macro_event.add_event(Event::render("upload", Work::noop()));
        let handle = macro_event.handle();

        assert_eq!(handle.remaining(), 2);
        assert!(!handle.is_completed());

        run(&b, EventOutcome::Succeeded);
        assert!(!handle.is_completed());

        run(&a, EventOutcome::Succeeded);
        assert!(handle.is_completed());
        assert_eq!(handle.failed_count(), 0);
        assert_eq!(a.macro_id().as_deref(), Some("load-level"));
    }

    #[test]
    fn test_failed_member_still_completes_macro() {
        let mut macro_event = MacroEvent::new("sync");
        let a = macro_event.add_event(Event::comm("push", Work::noop()));
        let handle = macro_event.handle();

        run(&a, EventOutcome::Failed("timeout".to_string()));
        assert!(handle.is_completed());
        assert_eq!(handle.failed_count(), 1);
    }

    #[test]
    fn test_empty_macro_is_not_completed() {
        let macro_event = MacroEvent::new("nothing");
        assert!(macro_event.is_empty());
        assert!(!macro_event.handle().is_completed());
    }
}
