// Bootstrap utilities for binary initialization
// Builds the engine context once; everything that needs the queue gets it from there.

use crate::config::Settings;
use crate::queue::{
    EventHandler, EventSender, LogInputHandler, MasterEventQueue, WorkRunner, WorkerPools,
};
use crate::scheduler::{EngineConfig, TickEngine};
use crate::telemetry::{FailureReporter, LogFailureReporter};
use crate::trigger::{ComboFeed, ComboTrigger, EventTrigger};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Spawn one worker pool per category. Must be called inside a tokio runtime.
#[tracing::instrument(skip_all)]
pub fn init_worker_pools(
    settings: &Settings,
    handler: Arc<dyn EventHandler>,
    reporter: Arc<dyn FailureReporter>,
) -> WorkerPools {
    info!("Initializing worker pools");
    let pools = WorkerPools::spawn_all(&settings.event, handler, reporter);
    info!(pools = pools.categories().count(), "Worker pools initialized");
    pools
}

/// Build the master event queue on top of the given pools
pub fn init_event_queue(
    settings: &Settings,
    pools: WorkerPools,
    reporter: Arc<dyn FailureReporter>,
) -> MasterEventQueue {
    MasterEventQueue::new(pools)
        .with_reporter(reporter)
        .with_status_interval(settings.event.status_interval())
}

/// Create the combo trigger and the feed input sources push combos into
pub fn init_combo_trigger(settings: &Settings) -> Result<(ComboTrigger, ComboFeed)> {
    let (trigger, feed) = ComboTrigger::new(settings.input.combo_buffer_capacity, settings.input.slot)
        .context("Failed to create combo trigger")?;
    let feed = feed.with_default_ttl(settings.input.default_ttl_frames);
    Ok((trigger.with_id("combo-input"), feed))
}

/// Everything the tick loop and its collaborators share
pub struct EngineContext {
    pub settings: Settings,
    pub queue: Arc<Mutex<MasterEventQueue>>,
    pub combo_feed: ComboFeed,
    /// Submission without the queue lock; use this from inside workers
    pub events: EventSender,
}

impl EngineContext {
    /// Build the context with the default handler and reporter
    pub fn build(settings: Settings) -> Result<Self> {
        let handler: Arc<dyn EventHandler> =
            Arc::new(WorkRunner::new().with_input_handler(Arc::new(LogInputHandler)));
        Self::build_with(settings, handler, Arc::new(LogFailureReporter))
    }

    /// Validate settings, spawn the pools and register the combo trigger
    pub fn build_with(
        settings: Settings,
        handler: Arc<dyn EventHandler>,
        reporter: Arc<dyn FailureReporter>,
    ) -> Result<Self> {
        if let Err(e) = settings.validate() {
            bail!("Invalid configuration: {}", e);
        }

        let pools = init_worker_pools(&settings, handler, Arc::clone(&reporter));
        let mut queue = init_event_queue(&settings, pools, reporter);
        let (combo_trigger, combo_feed) = init_combo_trigger(&settings)?;
        queue
            .register_trigger(combo_trigger)
            .context("Failed to register combo trigger")?;

        let events = queue.sender();
        Ok(Self {
            settings,
            queue: Arc::new(Mutex::new(queue)),
            combo_feed,
            events,
        })
    }

    /// Tick engine sized from `scheduler.*`
    pub fn engine(&self) -> TickEngine {
        TickEngine::new(
            EngineConfig::from(&self.settings.scheduler),
            Arc::clone(&self.queue),
        )
    }
}

pub type TriggerFactory = Box<dyn FnOnce(&EngineContext) -> Result<Box<dyn EventTrigger>> + Send>;

struct RegistryEntry {
    name: String,
    priority: i32,
    factory: TriggerFactory,
}

/// Startup trigger registry: named factories installed in ascending priority
/// order (registration order among equal priorities)
#[derive(Default)]
pub struct TriggerRegistry {
    entries: Vec<RegistryEntry>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, priority: i32, factory: F) -> Result<()>
    where
        F: FnOnce(&EngineContext) -> Result<Box<dyn EventTrigger>> + Send + 'static,
    {
        let name = name.into();
        if self.entries.iter().any(|e| e.name == name) {
            bail!("Trigger factory '{}' is already registered", name);
        }
        self.entries.push(RegistryEntry {
            name,
            priority,
            factory: Box::new(factory),
        });
        Ok(())
    }

    /// Factory names in installation order
    pub fn names(&self) -> Vec<String> {
        let mut entries: Vec<&RegistryEntry> = self.entries.iter().collect();
        entries.sort_by_key(|e| e.priority);
        entries.into_iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build every trigger and register it with the context's queue.
    /// Returns the ids of the installed triggers.
    #[tracing::instrument(skip_all)]
    pub async fn install(self, context: &EngineContext) -> Result<Vec<String>> {
        let mut entries = self.entries;
        entries.sort_by_key(|e| e.priority);

        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let trigger = (entry.factory)(context)
                .with_context(|| format!("Failed to build trigger '{}'", entry.name))?;
            let id = context
                .queue
                .lock()
                .await
                .register_boxed_trigger(trigger)
                .with_context(|| format!("Failed to register trigger '{}'", entry.name))?;
            info!(name = %entry.name, trigger_id = %id, priority = entry.priority, "Trigger installed");
            ids.push(id);
        }
        Ok(ids)
    }
}
