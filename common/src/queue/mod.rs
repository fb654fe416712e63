// Master event queue: trigger polling, condition evaluation and category dispatch

pub mod pool;
pub mod status;

pub use pool::{
    EventHandler, InputHandler, LogInputHandler, PoolConfig, TryDispatchError, WorkRunner,
    WorkerPool, WorkerPools,
};
pub use status::{EventSnapshot, MacroSnapshot, QueueSnapshot, TriggerSnapshot};

use crate::condition::{ExecutionCondition, GlobalRule, QueueView};
use crate::errors::{panic_message, ConditionError, QueueError};
use crate::event::{Event, EventCategory, EventKind, EventRef, MacroEvent, MacroRef};
use crate::telemetry::{self, FailureReporter, LogFailureReporter};
use crate::trigger::{EventTrigger, Fired, Payload, Tick};
use chrono::Utc;
use status::StatusLogger;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Summary of one `process` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub frame: u64,
    pub triggers_fired: usize,
    pub submitted: usize,
    pub dispatched: usize,
    pub waiting: usize,
    /// Ready events held back because their pool was full
    pub held: usize,
}

/// Lock-free submission handle. What is sent here joins the queue at the start
/// of the next tick, so running workers can submit follow-up events without
/// taking the queue lock.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Payload>,
}

impl EventSender {
    pub fn submit(&self, event: Event) -> Result<EventRef, QueueError> {
        let handle = event.handle();
        self.tx
            .send(Payload::Single(event))
            .map_err(|_| QueueError::QueueClosed)?;
        Ok(handle)
    }

    pub fn submit_macro(&self, macro_event: MacroEvent) -> Result<MacroRef, QueueError> {
        if macro_event.is_empty() {
            return Err(QueueError::EmptyMacroEvent(macro_event.id().to_string()));
        }
        let handle = macro_event.handle();
        self.tx
            .send(Payload::Macro(macro_event))
            .map_err(|_| QueueError::QueueClosed)?;
        Ok(handle)
    }
}

/// Owns waiting events, triggers and global rules; dispatches ready events to
/// the category worker pools.
///
/// Only one `process` call can run at a time since it takes `&mut self`.
/// Completion happens on workers and is visible to conditions on the next tick.
/// `process` never waits on a worker, so a worker may lock the queue to submit.
pub struct MasterEventQueue {
    pools: WorkerPools,
    reporter: Arc<dyn FailureReporter>,
    waiting: Vec<Event>,
    held: BTreeMap<EventCategory, VecDeque<(EventRef, EventKind)>>,
    inbox_tx: mpsc::UnboundedSender<Payload>,
    inbox_rx: mpsc::UnboundedReceiver<Payload>,
    triggers: Vec<Box<dyn EventTrigger>>,
    global_rules: Vec<Arc<GlobalRule>>,
    macros: Vec<MacroRef>,
    status: StatusLogger,
    frame: u64,
}

impl MasterEventQueue {
    pub fn new(pools: WorkerPools) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            pools,
            reporter: Arc::new(LogFailureReporter),
            waiting: Vec::new(),
            held: BTreeMap::new(),
            inbox_tx,
            inbox_rx,
            triggers: Vec::new(),
            global_rules: Vec::new(),
            macros: Vec::new(),
            status: StatusLogger::new(None),
            frame: 0,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn FailureReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Log macro-event status every `interval`; `None` disables it
    pub fn with_status_interval(mut self, interval: Option<Duration>) -> Self {
        self.status = StatusLogger::new(interval);
        self
    }

    /// Handle for submitting without `&mut` access to the queue
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.inbox_tx.clone(),
        }
    }

    /// Register a WAITING event. Conditions are first evaluated on the next tick.
    pub fn submit(&mut self, event: Event) -> EventRef {
        let handle = event.handle();
        telemetry::record_event_submitted(handle.category());
        debug!(
            event_id = %handle.id(),
            event_name = handle.name(),
            category = %handle.category(),
            conditions = event.conditions().len(),
            "Event submitted"
        );
        self.waiting.push(event);
        handle
    }

    /// Register every constituent of a macro-event and track the group
    pub fn submit_macro(&mut self, macro_event: MacroEvent) -> Result<MacroRef, QueueError> {
        if macro_event.is_empty() {
            return Err(QueueError::EmptyMacroEvent(macro_event.id().to_string()));
        }
        let (handle, events) = macro_event.into_events();
        debug!(macro_id = handle.id(), events = events.len(), "Macro event submitted");
        for event in events {
            self.submit(event);
        }
        self.macros.push(handle.clone());
        Ok(handle)
    }

    pub fn register_trigger(&mut self, trigger: impl EventTrigger + 'static) -> Result<String, QueueError> {
        self.register_boxed_trigger(Box::new(trigger))
    }

    /// Triggers are polled in registration order
    pub fn register_boxed_trigger(
        &mut self,
        trigger: Box<dyn EventTrigger>,
    ) -> Result<String, QueueError> {
        let id = trigger.id().to_string();
        if self.triggers.iter().any(|t| t.id() == id) {
            return Err(QueueError::DuplicateTrigger(id));
        }
        info!(trigger_id = %id, enabled = trigger.is_enabled(), "Trigger registered");
        self.triggers.push(trigger);
        Ok(id)
    }

    pub fn remove_trigger(&mut self, id: &str) -> Result<Box<dyn EventTrigger>, QueueError> {
        let index = self
            .triggers
            .iter()
            .position(|t| t.id() == id)
            .ok_or_else(|| QueueError::TriggerNotFound(id.to_string()))?;
        info!(trigger_id = %id, "Trigger removed");
        Ok(self.triggers.remove(index))
    }

    pub fn enable_trigger(&mut self, id: &str) -> Result<(), QueueError> {
        self.set_trigger_enabled(id, true)
    }

    /// Stops new injections only; events already submitted are unaffected
    pub fn disable_trigger(&mut self, id: &str) -> Result<(), QueueError> {
        self.set_trigger_enabled(id, false)
    }

    fn set_trigger_enabled(&mut self, id: &str, enabled: bool) -> Result<(), QueueError> {
        let trigger = self
            .triggers
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or_else(|| QueueError::TriggerNotFound(id.to_string()))?;
        trigger.set_enabled(enabled);
        debug!(trigger_id = %id, enabled = enabled, "Trigger toggled");
        Ok(())
    }

    pub fn is_trigger_enabled(&self, id: &str) -> Option<bool> {
        self.triggers
            .iter()
            .find(|t| t.id() == id)
            .map(|t| t.is_enabled())
    }

    pub fn trigger_ids(&self) -> Vec<String> {
        self.triggers.iter().map(|t| t.id().to_string()).collect()
    }

    /// Add a rule checked before every event's own conditions. An existing rule
    /// with the same id is replaced. Returns the rule id.
    pub fn add_global_condition(
        &mut self,
        id: Option<String>,
        condition: impl ExecutionCondition + 'static,
        enabled: bool,
    ) -> String {
        let id = id.unwrap_or_else(|| format!("rule-{}", Uuid::new_v4()));
        let rule = Arc::new(GlobalRule::new(id.clone(), Arc::new(condition), enabled));
        match self.global_rules.iter_mut().find(|r| r.id() == id) {
            Some(existing) => {
                warn!(rule_id = %id, "Replacing global rule");
                *existing = rule;
            }
            None => {
                info!(rule_id = %id, enabled = enabled, "Global rule added");
                self.global_rules.push(rule);
            }
        }
        id
    }

    pub fn enable_global_condition(&mut self, id: &str) -> Result<(), QueueError> {
        self.find_rule(id)?.set_enabled(true);
        Ok(())
    }

    pub fn disable_global_condition(&mut self, id: &str) -> Result<(), QueueError> {
        self.find_rule(id)?.set_enabled(false);
        Ok(())
    }

    pub fn remove_global_condition(&mut self, id: &str) -> Result<(), QueueError> {
        let before = self.global_rules.len();
        self.global_rules.retain(|r| r.id() != id);
        if self.global_rules.len() == before {
            return Err(QueueError::RuleNotFound(id.to_string()));
        }
        info!(rule_id = %id, "Global rule removed");
        Ok(())
    }

    /// How many times the rule has held an event back
    pub fn veto_count(&self, id: &str) -> Option<u64> {
        self.find_rule(id).ok().map(|r| r.veto_count())
    }

    fn find_rule(&self, id: &str) -> Result<&Arc<GlobalRule>, QueueError> {
        self.global_rules
            .iter()
            .find(|r| r.id() == id)
            .ok_or_else(|| QueueError::RuleNotFound(id.to_string()))
    }

    /// Run one tick with the queue's own frame counter
    pub async fn process(&mut self, delta: Duration) -> TickReport {
        let tick = Tick::new(self.frame, delta);
        self.process_tick(tick).await
    }

    /// Run one tick: poll triggers, take in sender submissions, evaluate waiting
    /// events, dispatch the ready ones in submission order.
    ///
    /// Never waits on a full pool. Ready events that do not fit stay held, in
    /// order, and are dispatched first on the following ticks; none are dropped.
    #[instrument(skip(self), fields(frame = tick.frame))]
    pub async fn process_tick(&mut self, tick: Tick) -> TickReport {
        self.frame = tick.frame.saturating_add(1);
        let mut report = TickReport {
            frame: tick.frame,
            ..TickReport::default()
        };

        let fired = self.poll_triggers(&tick, &mut report);
        for payload in fired.into_payloads() {
            report.submitted += self.inject(payload);
        }
        while let Ok(payload) = self.inbox_rx.try_recv() {
            report.submitted += self.inject(payload);
        }

        let pending = std::mem::take(&mut self.waiting);
        let mut ready = Vec::new();
        for event in pending {
            if self.is_ready(&event) {
                ready.push(event);
            } else {
                self.waiting.push(event);
            }
        }

        report.dispatched += self.flush_held();
        for event in ready {
            let (handle, kind) = event.into_dispatch();
            if let Err(e) = handle.begin_execution() {
                warn!(event_id = %handle.id(), error = %e, "Ready event was not waiting");
                continue;
            }
            if self.hand_off(handle, kind) {
                report.dispatched += 1;
            }
        }

        report.waiting = self.waiting.len();
        report.held = self.held_len();
        telemetry::update_waiting_events(report.waiting);
        self.log_status();

        if report.dispatched > 0 || report.submitted > 0 {
            debug!(
                submitted = report.submitted,
                dispatched = report.dispatched,
                waiting = report.waiting,
                held = report.held,
                "Tick processed"
            );
        }
        report
    }

    /// Submit a trigger or sender payload; returns how many events it added
    fn inject(&mut self, payload: Payload) -> usize {
        match payload {
            Payload::Single(event) => {
                self.submit(event);
                1
            }
            Payload::Macro(macro_event) => {
                let size = macro_event.len();
                match self.submit_macro(macro_event) {
                    Ok(_) => size,
                    Err(e) => {
                        warn!(error = %e, "Unusable macro event dropped");
                        0
                    }
                }
            }
        }
    }

    /// Retry held events, oldest first, until each category's pool is full again
    fn flush_held(&mut self) -> usize {
        let mut dispatched = 0;
        for held in self.held.values_mut() {
            while let Some((handle, kind)) = held.pop_front() {
                let category = handle.category();
                match self.pools.try_dispatch(handle, kind) {
                    Ok(()) => {
                        telemetry::record_event_dispatched(category);
                        dispatched += 1;
                    }
                    Err(TryDispatchError::Full(handle, kind)) => {
                        held.push_front((handle, kind));
                        break;
                    }
                    Err(TryDispatchError::Rejected(handle, e)) => {
                        pool::settle(&handle, Err(e.into()), self.reporter.as_ref())
                    }
                }
            }
        }
        dispatched
    }

    /// Dispatch an executing event, or hold it behind earlier events of its
    /// category. Returns true when the pool took it.
    fn hand_off(&mut self, handle: EventRef, kind: EventKind) -> bool {
        let category = handle.category();
        if let Some(held) = self.held.get_mut(&category) {
            if !held.is_empty() {
                held.push_back((handle, kind));
                return false;
            }
        }
        match self.pools.try_dispatch(handle, kind) {
            Ok(()) => {
                telemetry::record_event_dispatched(category);
                true
            }
            Err(TryDispatchError::Full(handle, kind)) => {
                debug!(
                    event_id = %handle.id(),
                    category = %category,
                    "Worker pool full, holding event"
                );
                self.held.entry(category).or_default().push_back((handle, kind));
                false
            }
            Err(TryDispatchError::Rejected(handle, e)) => {
                pool::settle(&handle, Err(e.into()), self.reporter.as_ref());
                false
            }
        }
    }

    fn poll_triggers(&mut self, tick: &Tick, report: &mut TickReport) -> Fired {
        let mut fired = Fired::new();
        for trigger in self.triggers.iter_mut() {
            if !trigger.is_enabled() {
                continue;
            }
            let mark = fired.len();
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| trigger.poll_and_fire(tick, &mut fired)));
            match result {
                Ok(true) => {
                    telemetry::record_trigger_fired(trigger.id());
                    report.triggers_fired += 1;
                }
                Ok(false) => {}
                Err(panic) => {
                    // drop anything the trigger pushed before it panicked
                    fired.truncate(mark);
                    trigger.set_enabled(false);
                    error!(
                        trigger_id = trigger.id(),
                        panic = %panic_message(panic.as_ref()),
                        "Trigger panicked and was disabled"
                    );
                }
            }
        }
        fired
    }

    /// Global rules first, then the event's own conditions; all must hold
    fn is_ready(&self, event: &Event) -> bool {
        let handle = event.handle_ref();
        for rule in &self.global_rules {
            if !rule.is_enabled() {
                continue;
            }
            match self.check(rule.condition().as_ref(), handle) {
                Some(true) => {}
                Some(false) => {
                    rule.record_veto();
                    return false;
                }
                None => return false,
            }
        }
        event
            .conditions()
            .iter()
            .all(|condition| self.check(condition.as_ref(), handle) == Some(true))
    }

    /// `None` when the condition failed; the event stays waiting
    fn check(&self, condition: &dyn ExecutionCondition, event: &EventRef) -> Option<bool> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| condition.evaluate(event, self)));
        let err = match result {
            Ok(Ok(holds)) => return Some(holds),
            Ok(Err(e)) => e,
            Err(panic) => ConditionError::Panicked(panic_message(panic.as_ref())),
        };
        telemetry::record_condition_error();
        self.reporter
            .error("Condition evaluation failed", event, &err);
        None
    }

    fn log_status(&mut self) {
        if self.status.is_enabled() {
            if !self.status.due(Instant::now()) {
                return;
            }
            self.status.log(self.waiting.len(), &self.macros);
        }
        self.macros.retain(|m| !m.is_completed());
    }

    pub fn has_executed(&self, event: &EventRef) -> bool {
        event.is_completed()
    }

    pub fn is_macro_event_completed(&self, macro_event: &MacroRef) -> bool {
        macro_event.is_completed()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Handles of the events still waiting, in submission order
    pub fn waiting_events(&self) -> Vec<EventRef> {
        self.waiting.iter().map(Event::handle).collect()
    }

    /// Ready events waiting for room in their pool
    pub fn held_len(&self) -> usize {
        self.held.values().map(VecDeque::len).sum()
    }

    /// Dispatched events that have not completed, across all pools
    pub fn in_flight(&self) -> usize {
        self.pools.total_in_flight()
    }

    /// Index of the next tick
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn pools(&self) -> &WorkerPools {
        &self.pools
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            taken_at: Utc::now(),
            frame: self.frame,
            waiting: self.waiting.len(),
            held: self.held_len(),
            in_flight: self.pools.in_flight_by_category(),
            triggers: self
                .triggers
                .iter()
                .map(|t| TriggerSnapshot {
                    id: t.id().to_string(),
                    enabled: t.is_enabled(),
                })
                .collect(),
            macros: self.macros.iter().map(MacroSnapshot::from).collect(),
        }
    }

    /// Hand over held events, then drain the worker pools. Waiting events are
    /// left where they are.
    pub async fn shutdown(&mut self) {
        info!(
            waiting = self.waiting.len(),
            held = self.held_len(),
            in_flight = self.in_flight(),
            "Shutting down event queue"
        );
        for (_, held) in std::mem::take(&mut self.held) {
            for (handle, kind) in held {
                let category = handle.category();
                match self.pools.dispatch(handle.clone(), kind).await {
                    Ok(()) => telemetry::record_event_dispatched(category),
                    Err(e) => pool::settle(&handle, Err(e.into()), self.reporter.as_ref()),
                }
            }
        }
        self.pools.shutdown().await;
    }
}

impl QueueView for MasterEventQueue {
    fn has_executed(&self, event: &EventRef) -> bool {
        event.is_completed()
    }

    fn is_macro_event_completed(&self, macro_event: &MacroRef) -> bool {
        macro_event.is_completed()
    }
}
