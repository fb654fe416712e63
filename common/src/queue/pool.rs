// Category worker pools: bounded dispatch queue in front of a fixed number of workers

use crate::config::{EventSettings, PoolSettings};
use crate::errors::{panic_message, ExecutionError, QueueError};
use crate::event::{EventCategory, EventKind, EventOutcome, EventRef, InputEvent};
use crate::telemetry::{self, FailureReporter};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Executes the payload of a dispatched event on a worker
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventRef, kind: EventKind) -> Result<(), ExecutionError>;
}

/// Consumer for input-category payloads
#[async_trait]
pub trait InputHandler: Send + Sync {
    async fn handle_input(&self, event: &EventRef, input: InputEvent) -> Result<(), ExecutionError>;
}

/// Default handler: awaits the event's work, hands input payloads to the
/// configured input handler
#[derive(Clone, Default)]
pub struct WorkRunner {
    input: Option<Arc<dyn InputHandler>>,
}

impl WorkRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_handler(mut self, handler: Arc<dyn InputHandler>) -> Self {
        self.input = Some(handler);
        self
    }
}

#[async_trait]
impl EventHandler for WorkRunner {
    async fn handle(&self, event: &EventRef, kind: EventKind) -> Result<(), ExecutionError> {
        match kind {
            EventKind::Input(input) => match &self.input {
                Some(handler) => handler.handle_input(event, input).await,
                None => Err(ExecutionError::UnsupportedPayload {
                    category: EventCategory::Input.to_string(),
                }),
            },
            EventKind::Render(work)
            | EventKind::Comm(work)
            | EventKind::System(work)
            | EventKind::Logic(work) => work.into_future().await,
        }
    }
}

/// Input handler that only logs what it receives
#[derive(Debug, Default, Clone, Copy)]
pub struct LogInputHandler;

#[async_trait]
impl InputHandler for LogInputHandler {
    async fn handle_input(&self, event: &EventRef, input: InputEvent) -> Result<(), ExecutionError> {
        debug!(
            event_id = %event.id(),
            event_name = event.name(),
            slot = input.slot,
            input = ?input.kind,
            "Input event received"
        );
        Ok(())
    }
}

/// Size of one category pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_workers: usize,
    /// Events queued in front of the workers before the pool reports itself full
    pub backlog: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_workers: settings.max_thread,
            backlog: settings.backlog,
        }
    }
}

struct Job {
    event: EventRef,
    kind: EventKind,
}

/// Why `try_dispatch` did not hand the event over
#[derive(Debug)]
pub enum TryDispatchError {
    /// Backlog is full; the event and its payload are handed back untouched
    Full(EventRef, EventKind),
    /// The pool is missing or closed
    Rejected(EventRef, QueueError),
}

/// Worker pool for one category.
///
/// Dispatched events go through a bounded channel to a dispatcher task, which
/// starts each one as soon as a worker permit is free. Events start in the
/// order they were dispatched.
pub struct WorkerPool {
    category: EventCategory,
    max_workers: usize,
    tx: Option<mpsc::Sender<Job>>,
    permits: Arc<Semaphore>,
    dispatcher: Option<JoinHandle<()>>,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Start the pool's dispatcher. Must be called inside a tokio runtime.
    pub fn spawn(
        category: EventCategory,
        config: PoolConfig,
        handler: Arc<dyn EventHandler>,
        reporter: Arc<dyn FailureReporter>,
    ) -> Self {
        let max_workers = config.max_workers.max(1);
        let (tx, mut rx) = mpsc::channel::<Job>(config.backlog.max(1));
        let permits = Arc::new(Semaphore::new(max_workers));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let dispatcher = {
            let permits = Arc::clone(&permits);
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    let permit = match Arc::clone(&permits).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            settle(
                                &job.event,
                                Err(QueueError::PoolClosed(category.to_string()).into()),
                                reporter.as_ref(),
                            );
                            in_flight.fetch_sub(1, Ordering::AcqRel);
                            continue;
                        }
                    };

                    let handler = Arc::clone(&handler);
                    let reporter = Arc::clone(&reporter);
                    let in_flight = Arc::clone(&in_flight);
                    tokio::spawn(async move {
                        let _permit = permit;
                        let Job { event, kind } = job;
                        let result = run_guarded(handler.as_ref(), &event, kind).await;
                        settle(&event, result, reporter.as_ref());
                        in_flight.fetch_sub(1, Ordering::AcqRel);
                    });
                }
                debug!(category = %category, "Worker pool dispatcher drained");
            })
        };

        info!(
            category = %category,
            max_workers = max_workers,
            backlog = config.backlog,
            "Worker pool started"
        );

        Self {
            category,
            max_workers,
            tx: Some(tx),
            permits,
            dispatcher: Some(dispatcher),
            in_flight,
        }
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Events dispatched to this pool that have not completed yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, mpsc::Sender::is_closed)
    }

    /// Hand an executing event to the pool, waiting while the backlog is full
    pub async fn dispatch(&self, event: EventRef, kind: EventKind) -> Result<(), QueueError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| QueueError::PoolClosed(self.category.to_string()))?;

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if tx.send(Job { event, kind }).await.is_err() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(QueueError::PoolClosed(self.category.to_string()));
        }
        Ok(())
    }

    /// Hand an executing event to the pool without waiting for backlog room
    pub fn try_dispatch(&self, event: EventRef, kind: EventKind) -> Result<(), TryDispatchError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(TryDispatchError::Rejected(
                event,
                QueueError::PoolClosed(self.category.to_string()),
            ));
        };

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        match tx.try_send(Job { event, kind }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(TryDispatchError::Full(job.event, job.kind))
            }
            Err(TrySendError::Closed(job)) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(TryDispatchError::Rejected(
                    job.event,
                    QueueError::PoolClosed(self.category.to_string()),
                ))
            }
        }
    }

    /// Stop accepting events, run everything already dispatched, then return
    pub async fn shutdown(&mut self) {
        if self.permits.is_closed() {
            return;
        }
        // closing the channel lets the dispatcher drain and exit
        self.tx.take();
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                warn!(category = %self.category, error = %e, "Worker pool dispatcher aborted");
            }
        }

        let all = u32::try_from(self.max_workers).unwrap_or(u32::MAX);
        match self.permits.acquire_many(all).await {
            Ok(permits) => permits.forget(),
            Err(e) => warn!(category = %self.category, error = %e, "Worker permits already closed"),
        }
        self.permits.close();

        info!(category = %self.category, "Worker pool stopped");
    }
}

async fn run_guarded(
    handler: &dyn EventHandler,
    event: &EventRef,
    kind: EventKind,
) -> Result<(), ExecutionError> {
    match AssertUnwindSafe(handler.handle(event, kind))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(ExecutionError::Panicked(panic_message(panic.as_ref()))),
    }
}

/// Resolve an executing event to Completed, reporting failures
pub(crate) fn settle(
    event: &EventRef,
    result: Result<(), ExecutionError>,
    reporter: &dyn FailureReporter,
) {
    let outcome = match &result {
        Ok(()) => EventOutcome::Succeeded,
        Err(e) => {
            reporter.error("Event execution failed", event, e);
            EventOutcome::Failed(e.to_string())
        }
    };
    let failed = outcome.is_failure();

    match event.complete(outcome) {
        Ok(duration) => {
            telemetry::record_event_completed(event.category(), failed, duration.as_secs_f64());
            debug!(
                event_id = %event.id(),
                event_name = event.name(),
                category = %event.category(),
                failed = failed,
                duration_ms = duration.as_millis() as u64,
                "Event completed"
            );
        }
        Err(e) => {
            warn!(
                event_id = %event.id(),
                event_name = event.name(),
                error = %e,
                "Event completion rejected"
            );
        }
    }
}

/// One worker pool per category, injected into the queue
#[derive(Default)]
pub struct WorkerPools {
    pools: BTreeMap<EventCategory, WorkerPool>,
}

impl WorkerPools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.insert(pool);
        self
    }

    /// Add or replace the pool for the pool's category
    pub fn insert(&mut self, pool: WorkerPool) -> Option<WorkerPool> {
        self.pools.insert(pool.category(), pool)
    }

    /// Spawn a pool for every category, sized from `event.<category>.*`
    pub fn spawn_all(
        settings: &EventSettings,
        handler: Arc<dyn EventHandler>,
        reporter: Arc<dyn FailureReporter>,
    ) -> Self {
        let mut pools = Self::new();
        for category in EventCategory::ALL {
            pools.insert(WorkerPool::spawn(
                category,
                PoolConfig::from(settings.pool(category)),
                Arc::clone(&handler),
                Arc::clone(&reporter),
            ));
        }
        pools
    }

    pub fn get(&self, category: EventCategory) -> Option<&WorkerPool> {
        self.pools.get(&category)
    }

    pub fn categories(&self) -> impl Iterator<Item = EventCategory> + '_ {
        self.pools.keys().copied()
    }

    pub async fn dispatch(&self, event: EventRef, kind: EventKind) -> Result<(), QueueError> {
        let category = kind.category();
        match self.pools.get(&category) {
            Some(pool) => pool.dispatch(event, kind).await,
            None => Err(QueueError::PoolMissing(category.to_string())),
        }
    }

    pub fn try_dispatch(&self, event: EventRef, kind: EventKind) -> Result<(), TryDispatchError> {
        let category = kind.category();
        match self.pools.get(&category) {
            Some(pool) => pool.try_dispatch(event, kind),
            None => Err(TryDispatchError::Rejected(
                event,
                QueueError::PoolMissing(category.to_string()),
            )),
        }
    }

    pub fn in_flight(&self, category: EventCategory) -> usize {
        self.pools.get(&category).map_or(0, WorkerPool::in_flight)
    }

    pub fn total_in_flight(&self) -> usize {
        self.pools.values().map(WorkerPool::in_flight).sum()
    }

    pub fn in_flight_by_category(&self) -> BTreeMap<EventCategory, usize> {
        self.pools
            .iter()
            .map(|(category, pool)| (*category, pool.in_flight()))
            .collect()
    }

    pub async fn shutdown(&mut self) {
        for pool in self.pools.values_mut() {
            pool.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventStatus, Work};
    use crate::telemetry::LogFailureReporter;
    use std::time::Duration;

    fn reporter() -> Arc<dyn FailureReporter> {
        Arc::new(LogFailureReporter)
    }

    fn runner() -> Arc<dyn EventHandler> {
        Arc::new(WorkRunner::new())
    }

    async fn dispatch(pool: &WorkerPool, event: Event) -> EventRef {
        let (handle, kind) = event.into_dispatch();
        handle.begin_execution().unwrap();
        pool.dispatch(handle.clone(), kind).await.unwrap();
        handle
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_limits_concurrency() {
        let config = PoolConfig {
            max_workers: 2,
            backlog: 16,
        };
        let mut pool = WorkerPool::spawn(EventCategory::Logic, config, runner(), reporter());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let work = Work::new(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
            handles.push(dispatch(&pool, Event::logic(format!("job-{}", i), work)).await);
        }

        pool.shutdown().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(handles.iter().all(EventRef::is_completed));
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_work_uses_all_workers() {
        let config = PoolConfig {
            max_workers: 8,
            backlog: 16,
        };
        let mut pool = WorkerPool::spawn(EventCategory::Logic, config, runner(), reporter());

        let started = std::time::Instant::now();
        let mut handles = Vec::new();
        for i in 0..8 {
            let work = Work::from_fn(|| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            });
            handles.push(dispatch(&pool, Event::logic(format!("blocking-{}", i), work)).await);
        }
        pool.shutdown().await;

        assert!(handles.iter().all(|h| h.outcome() == Some(EventOutcome::Succeeded)));
        // eight workers, two runtime threads: one job's duration, not four
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_category_does_not_stall_others() {
        let busy = PoolConfig {
            max_workers: 4,
            backlog: 8,
        };
        let mut render = WorkerPool::spawn(EventCategory::Render, busy, runner(), reporter());
        let mut logic =
            WorkerPool::spawn(EventCategory::Logic, PoolConfig::default(), runner(), reporter());

        let mut slow = Vec::new();
        for i in 0..4 {
            let work = Work::from_fn(|| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            });
            slow.push(dispatch(&render, Event::render(format!("bake-{}", i), work)).await);
        }
        let quick = dispatch(&logic, Event::logic("step", Work::noop())).await;

        tokio::time::timeout(Duration::from_millis(150), async {
            while !quick.is_completed() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert!(slow.iter().all(|h| !h.is_completed()));

        logic.shutdown().await;
        render.shutdown().await;
        assert!(slow.iter().all(EventRef::is_completed));
    }

    #[tokio::test]
    async fn test_try_dispatch_hands_back_when_full() {
        let config = PoolConfig {
            max_workers: 1,
            backlog: 1,
        };
        let mut pool = WorkerPool::spawn(EventCategory::Comm, config, runner(), reporter());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let blocker = dispatch(
            &pool,
            Event::comm(
                "hold",
                Work::new(async move {
                    let _ = release_rx.await;
                    Ok(())
                }),
            ),
        )
        .await;

        // the dispatcher owns `hold`; fill the backlog until it reports full
        let mut held = None;
        for i in 0..8 {
            let (handle, kind) = Event::comm(format!("queued-{}", i), Work::noop()).into_dispatch();
            handle.begin_execution().unwrap();
            match pool.try_dispatch(handle, kind) {
                Ok(()) => {}
                Err(TryDispatchError::Full(handle, kind)) => {
                    held = Some((handle, kind));
                    break;
                }
                Err(TryDispatchError::Rejected(_, e)) => panic!("unexpected rejection: {}", e),
            }
        }
        let (handle, kind) = held.expect("backlog never filled");
        assert_eq!(handle.status(), EventStatus::Executing);

        release_tx.send(()).unwrap();
        pool.dispatch(handle.clone(), kind).await.unwrap();
        pool.shutdown().await;
        assert!(blocker.is_completed());
        assert!(handle.is_completed());
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_try_dispatch_rejects_missing_pool() {
        let pools = WorkerPools::new();
        let (handle, kind) = Event::render("frame", Work::noop()).into_dispatch();
        match pools.try_dispatch(handle, kind) {
            Err(TryDispatchError::Rejected(_, e)) => {
                assert_eq!(e, QueueError::PoolMissing("render".to_string()))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_work_completes_with_error() {
        let mut pool =
            WorkerPool::spawn(EventCategory::Render, PoolConfig::default(), runner(), reporter());
        let handle = dispatch(
            &pool,
            Event::render("bad-frame", Work::from_fn(|| panic!("shader missing"))),
        )
        .await;
        let ok = dispatch(&pool, Event::render("good-frame", Work::noop())).await;

        pool.shutdown().await;
        assert_eq!(handle.status(), EventStatus::Completed);
        match handle.outcome() {
            Some(EventOutcome::Failed(reason)) => assert!(reason.contains("shader missing")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(ok.outcome(), Some(EventOutcome::Succeeded));
    }

    #[tokio::test]
    async fn test_input_without_handler_is_unsupported() {
        let mut pool =
            WorkerPool::spawn(EventCategory::Input, PoolConfig::default(), runner(), reporter());
        let handle = dispatch(
            &pool,
            Event::input("press", InputEvent::button(0, "A", true)),
        )
        .await;
        pool.shutdown().await;
        assert!(matches!(handle.outcome(), Some(EventOutcome::Failed(_))));
    }

    #[tokio::test]
    async fn test_missing_pool_is_reported() {
        let pools = WorkerPools::new();
        let (handle, kind) = Event::comm("ping", Work::noop()).into_dispatch();
        let err = pools.dispatch(handle, kind).await.unwrap_err();
        assert_eq!(err, QueueError::PoolMissing("comm".to_string()));
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_fails() {
        let mut pool =
            WorkerPool::spawn(EventCategory::System, PoolConfig::default(), runner(), reporter());
        pool.shutdown().await;
        assert!(pool.is_closed());
        let (handle, kind) = Event::system("late", Work::noop()).into_dispatch();
        assert!(matches!(
            pool.dispatch(handle, kind).await,
            Err(QueueError::PoolClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_all_covers_every_category() {
        let mut pools =
            WorkerPools::spawn_all(&EventSettings::default(), runner(), reporter());
        assert_eq!(pools.categories().count(), EventCategory::ALL.len());
        assert_eq!(pools.get(EventCategory::Render).map(WorkerPool::max_workers), Some(16));
        pools.shutdown().await;
    }
}
