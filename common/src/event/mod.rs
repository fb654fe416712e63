// Event model: identity, category routing, lifecycle state and payload ownership

pub mod input;
pub mod macro_event;

pub use input::{InputEvent, InputId, InputKind, TouchPhase};
pub use macro_event::{MacroEvent, MacroRef};

use crate::condition::ExecutionCondition;
use crate::errors::{panic_message, ExecutionError, QueueError};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use macro_event::MacroShared;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Unique identity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Category tag; selects the worker pool that executes an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Input,
    Render,
    Comm,
    System,
    Logic,
}

impl EventCategory {
    pub const ALL: [EventCategory; 5] = [
        EventCategory::Input,
        EventCategory::Render,
        EventCategory::Comm,
        EventCategory::System,
        EventCategory::Logic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Input => "input",
            EventCategory::Render => "render",
            EventCategory::Comm => "comm",
            EventCategory::System => "system",
            EventCategory::Logic => "logic",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state. Only ever moves forward: Waiting → Executing → Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Waiting = 0,
    Executing = 1,
    Completed = 2,
}

impl EventStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => EventStatus::Waiting,
            1 => EventStatus::Executing,
            _ => EventStatus::Completed,
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventStatus::Waiting => "WAITING",
            EventStatus::Executing => "EXECUTING",
            EventStatus::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

/// How a completed event finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "error", rename_all = "snake_case")]
pub enum EventOutcome {
    Succeeded,
    Failed(String),
}

impl EventOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, EventOutcome::Failed(_))
    }
}

/// Opaque asynchronous unit of work carried by non-input events
pub struct Work(BoxFuture<'static, Result<(), ExecutionError>>);

impl Work {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), ExecutionError>> + Send + 'static,
    {
        Self(Box::pin(future))
    }

    /// Wrap a synchronous closure. It runs on the blocking thread pool once a
    /// worker permit is held, so blocking work never stalls the runtime.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), ExecutionError> + Send + 'static,
    {
        Self::new(async move {
            match tokio::task::spawn_blocking(f).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    Err(ExecutionError::Panicked(panic_message(e.into_panic().as_ref())))
                }
                Err(e) => Err(ExecutionError::failed(format!("blocking task cancelled: {}", e))),
            }
        })
    }

    pub fn noop() -> Self {
        Self::new(async { Ok(()) })
    }

    pub fn into_future(self) -> BoxFuture<'static, Result<(), ExecutionError>> {
        self.0
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Work(..)")
    }
}

/// Category-tagged payload. The variant decides the worker pool.
#[derive(Debug)]
pub enum EventKind {
    Input(InputEvent),
    Render(Work),
    Comm(Work),
    System(Work),
    Logic(Work),
}

impl EventKind {
    pub fn category(&self) -> EventCategory {
        match self {
            EventKind::Input(_) => EventCategory::Input,
            EventKind::Render(_) => EventCategory::Render,
            EventKind::Comm(_) => EventCategory::Comm,
            EventKind::System(_) => EventCategory::System,
            EventKind::Logic(_) => EventCategory::Logic,
        }
    }
}

#[derive(Debug, Default)]
struct Timing {
    started: Option<Instant>,
    duration: Option<Duration>,
}

#[derive(Debug)]
struct EventShared {
    id: EventId,
    name: String,
    category: EventCategory,
    created_at: DateTime<Utc>,
    status: AtomicU8,
    outcome: Mutex<Option<EventOutcome>>,
    timing: Mutex<Timing>,
    macro_event: OnceLock<Weak<MacroShared>>,
}

/// Cloneable handle to an event's observable state.
///
/// Status reads are lock-free, so conditions on the scheduling thread and
/// completions on worker threads never contend.
#[derive(Debug, Clone)]
pub struct EventRef {
    inner: Arc<EventShared>,
}

impl EventRef {
    fn new(name: String, category: EventCategory) -> Self {
        Self {
            inner: Arc::new(EventShared {
                id: EventId::new(),
                name,
                category,
                created_at: Utc::now(),
                status: AtomicU8::new(EventStatus::Waiting as u8),
                outcome: Mutex::new(None),
                timing: Mutex::new(Timing::default()),
                macro_event: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> EventId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn category(&self) -> EventCategory {
        self.inner.category
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn status(&self) -> EventStatus {
        EventStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    pub fn is_completed(&self) -> bool {
        self.status() == EventStatus::Completed
    }

    /// Set once the event reaches Completed
    pub fn outcome(&self) -> Option<EventOutcome> {
        self.inner
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn execution_duration(&self) -> Option<Duration> {
        self.inner
            .timing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .duration
    }

    /// Id of the macro-event this event belongs to, if any
    pub fn macro_id(&self) -> Option<String> {
        self.parent().map(|m| m.id().to_string())
    }

    fn parent(&self) -> Option<Arc<MacroShared>> {
        self.inner.macro_event.get().and_then(Weak::upgrade)
    }

    pub(crate) fn attach_macro(&self, parent: &Arc<MacroShared>) -> bool {
        self.inner.macro_event.set(Arc::downgrade(parent)).is_ok()
    }

    /// Waiting → Executing; performed by the scheduling thread only
    pub(crate) fn begin_execution(&self) -> Result<(), QueueError> {
        self.transition(EventStatus::Waiting, EventStatus::Executing)?;
        self.inner
            .timing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .started = Some(Instant::now());
        Ok(())
    }

    /// Executing → Completed; performed by the worker that ran the event.
    /// Returns the measured execution time.
    pub(crate) fn complete(&self, outcome: EventOutcome) -> Result<Duration, QueueError> {
        let failed = outcome.is_failure();
        let current = self.status();
        if current != EventStatus::Executing {
            return Err(QueueError::InvalidTransition {
                from: current.to_string(),
                to: EventStatus::Completed.to_string(),
            });
        }

        // outcome and timing are published before the status so that anyone
        // observing Completed also observes them
        *self
            .inner
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        let duration = {
            let mut timing = self
                .inner
                .timing
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let elapsed = timing.started.map(|s| s.elapsed()).unwrap_or_default();
            timing.duration = Some(elapsed);
            elapsed
        };

        self.transition(EventStatus::Executing, EventStatus::Completed)?;

        if let Some(parent) = self.parent() {
            parent.member_completed(failed);
        }
        Ok(duration)
    }

    fn transition(&self, from: EventStatus, to: EventStatus) -> Result<(), QueueError> {
        self.inner
            .status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| QueueError::InvalidTransition {
                from: EventStatus::from_u8(actual).to_string(),
                to: to.to_string(),
            })
    }
}

impl PartialEq for EventRef {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for EventRef {}

impl Hash for EventRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

/// A schedulable event. Owned by the queue from submission until dispatch,
/// after which the payload belongs to the worker.
#[derive(Debug)]
pub struct Event {
    handle: EventRef,
    kind: EventKind,
    conditions: Vec<Arc<dyn ExecutionCondition>>,
}

impl Event {
    pub fn new(name: impl Into<String>, kind: EventKind) -> Self {
        let category = kind.category();
        Self {
            handle: EventRef::new(name.into(), category),
            kind,
            conditions: Vec::new(),
        }
    }

    pub fn input(name: impl Into<String>, input: InputEvent) -> Self {
        Self::new(name, EventKind::Input(input))
    }

    pub fn render(name: impl Into<String>, work: Work) -> Self {
        Self::new(name, EventKind::Render(work))
    }

    pub fn comm(name: impl Into<String>, work: Work) -> Self {
        Self::new(name, EventKind::Comm(work))
    }

    pub fn system(name: impl Into<String>, work: Work) -> Self {
        Self::new(name, EventKind::System(work))
    }

    pub fn logic(name: impl Into<String>, work: Work) -> Self {
        Self::new(name, EventKind::Logic(work))
    }

    /// Attach a prerequisite. All attached conditions must hold (logical AND).
    pub fn with_condition(mut self, condition: impl ExecutionCondition + 'static) -> Self {
        self.conditions.push(Arc::new(condition));
        self
    }

    pub fn handle(&self) -> EventRef {
        self.handle.clone()
    }

    pub fn id(&self) -> EventId {
        self.handle.id()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn category(&self) -> EventCategory {
        self.handle.category()
    }

    pub fn status(&self) -> EventStatus {
        self.handle.status()
    }

    pub fn conditions(&self) -> &[Arc<dyn ExecutionCondition>] {
        &self.conditions
    }

    pub(crate) fn handle_ref(&self) -> &EventRef {
        &self.handle
    }

    pub(crate) fn into_dispatch(self) -> (EventRef, EventKind) {
        (self.handle, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_is_waiting() {
        let event = Event::logic("tick", Work::noop());
        assert_eq!(event.status(), EventStatus::Waiting);
        assert_eq!(event.category(), EventCategory::Logic);
        assert!(event.handle().outcome().is_none());
    }

    #[test]
    fn test_status_moves_forward_only() {
        let event = Event::render("frame", Work::noop());
        let handle = event.handle();

        assert!(handle.complete(EventOutcome::Succeeded).is_err());
        handle.begin_execution().unwrap();
        assert_eq!(handle.status(), EventStatus::Executing);
        assert!(handle.begin_execution().is_err());

        handle.complete(EventOutcome::Succeeded).unwrap();
        assert!(handle.is_completed());
        assert!(handle.begin_execution().is_err());
        assert!(handle.complete(EventOutcome::Succeeded).is_err());
        assert_eq!(handle.status(), EventStatus::Completed);
    }

    #[test]
    fn test_completion_records_outcome_and_duration() {
        let handle = Event::comm("send", Work::noop()).handle();
        handle.begin_execution().unwrap();
        handle
            .complete(EventOutcome::Failed("socket closed".to_string()))
            .unwrap();

        assert_eq!(
            handle.outcome(),
            Some(EventOutcome::Failed("socket closed".to_string()))
        );
        assert!(handle.execution_duration().is_some());
    }

    #[test]
    fn test_kind_selects_category() {
        let input = InputEvent::button(0, "A", true);
        assert_eq!(EventKind::Input(input).category(), EventCategory::Input);
        assert_eq!(EventKind::System(Work::noop()).category(), EventCategory::System);
    }

    #[test]
    fn test_handles_compare_by_identity() {
        let a = Event::logic("same-name", Work::noop());
        let b = Event::logic("same-name", Work::noop());
        assert_eq!(a.handle(), a.handle());
        assert_ne!(a.handle(), b.handle());
    }
}
