// Execution conditions: read-only prerequisite checks gating an event out of WAITING

use crate::errors::ConditionError;
use crate::event::{EventRef, MacroRef};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Read-only view of scheduler state handed to conditions.
///
/// Conditions only ever see this view, so they cannot submit, dispatch or
/// otherwise mutate the queue.
pub trait QueueView {
    /// True iff the event has reached Completed
    fn has_executed(&self, event: &EventRef) -> bool;

    /// True iff every constituent of the macro-event has reached Completed
    fn is_macro_event_completed(&self, macro_event: &MacroRef) -> bool;
}

/// Prerequisite attached to an event. All conditions on an event must hold.
pub trait ExecutionCondition: fmt::Debug + Send + Sync {
    fn evaluate(&self, event: &EventRef, queue: &dyn QueueView) -> Result<bool, ConditionError>;
}

/// Holds until the prerequisite event has completed
#[derive(Debug, Clone)]
pub struct AfterEventCondition {
    prerequisite: EventRef,
}

impl AfterEventCondition {
    pub fn new(prerequisite: EventRef) -> Self {
        Self { prerequisite }
    }

    pub fn prerequisite(&self) -> &EventRef {
        &self.prerequisite
    }
}

impl ExecutionCondition for AfterEventCondition {
    fn evaluate(&self, _event: &EventRef, queue: &dyn QueueView) -> Result<bool, ConditionError> {
        Ok(queue.has_executed(&self.prerequisite))
    }
}

/// Holds until every constituent of the prerequisite macro-event has completed
#[derive(Debug, Clone)]
pub struct AfterMacroEventCondition {
    prerequisite: MacroRef,
}

impl AfterMacroEventCondition {
    pub fn new(prerequisite: MacroRef) -> Self {
        Self { prerequisite }
    }

    pub fn prerequisite(&self) -> &MacroRef {
        &self.prerequisite
    }
}

impl ExecutionCondition for AfterMacroEventCondition {
    fn evaluate(&self, _event: &EventRef, queue: &dyn QueueView) -> Result<bool, ConditionError> {
        Ok(queue.is_macro_event_completed(&self.prerequisite))
    }
}

type Predicate =
    dyn Fn(&EventRef, &dyn QueueView) -> Result<bool, ConditionError> + Send + Sync;

/// Named closure condition for ad-hoc prerequisites and global rules
pub struct PredicateCondition {
    name: String,
    predicate: Box<Predicate>,
}

impl PredicateCondition {
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&EventRef, &dyn QueueView) -> Result<bool, ConditionError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for PredicateCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateCondition")
            .field("name", &self.name)
            .finish()
    }
}

impl ExecutionCondition for PredicateCondition {
    fn evaluate(&self, event: &EventRef, queue: &dyn QueueView) -> Result<bool, ConditionError> {
        (self.predicate)(event, queue)
    }
}

/// Framework-wide condition checked before every event's own conditions
#[derive(Debug)]
pub struct GlobalRule {
    id: String,
    condition: Arc<dyn ExecutionCondition>,
    enabled: AtomicBool,
    vetoes: AtomicU64,
}

impl GlobalRule {
    pub fn new(id: impl Into<String>, condition: Arc<dyn ExecutionCondition>, enabled: bool) -> Self {
        Self {
            id: id.into(),
            condition,
            enabled: AtomicBool::new(enabled),
            vetoes: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn condition(&self) -> &Arc<dyn ExecutionCondition> {
        &self.condition
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Number of evaluations in which this rule held an event back
    pub fn veto_count(&self) -> u64 {
        self.vetoes.load(Ordering::Acquire)
    }

    pub(crate) fn record_veto(&self) {
        self.vetoes.fetch_add(1, Ordering::AcqRel);
    }
}
