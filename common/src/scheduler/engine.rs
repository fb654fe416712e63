// Tick engine: drives the master event queue on a fixed interval

use crate::config::SchedulerSettings;
use crate::queue::MasterEventQueue;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Configuration for the tick engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Target time between two `process` calls
    pub tick_interval: Duration,
    /// Stop on its own after this many ticks
    pub max_ticks: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(16),
            max_ticks: None,
        }
    }
}

impl From<&SchedulerSettings> for EngineConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            tick_interval: settings.tick_interval(),
            max_ticks: None,
        }
    }
}

/// Scheduler trait for the tick loop lifecycle
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run the tick loop until stopped
    async fn start(&self) -> Result<()>;

    /// Stop the loop and wait for in-flight events to finish
    async fn stop(&self) -> Result<()>;
}

/// Single scheduling loop: one `process` call per tick, never overlapping.
///
/// The delta handed to the queue is the measured wall time since the previous
/// tick, not the nominal interval.
pub struct TickEngine {
    config: EngineConfig,
    queue: Arc<Mutex<MasterEventQueue>>,
    shutdown_tx: watch::Sender<bool>,
    ticks: AtomicU64,
}

/// Shortest tick the engine will run
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

impl TickEngine {
    /// A tick interval below `MIN_TICK_INTERVAL` is raised to it
    pub fn new(mut config: EngineConfig, queue: Arc<Mutex<MasterEventQueue>>) -> Self {
        if config.tick_interval < MIN_TICK_INTERVAL {
            warn!(
                tick_interval_us = config.tick_interval.as_micros() as u64,
                "Tick interval too short, using 1ms"
            );
            config.tick_interval = MIN_TICK_INTERVAL;
        }
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            config,
            queue,
            shutdown_tx,
            ticks: AtomicU64::new(0),
        }
    }

    /// Shared queue, for submitting events from outside the loop
    pub fn queue(&self) -> Arc<Mutex<MasterEventQueue>> {
        Arc::clone(&self.queue)
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Ticks processed so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    async fn tick(&self, delta: Duration) -> u64 {
        let report = self.queue.lock().await.process(delta).await;
        if report.dispatched > 0 || report.triggers_fired > 0 {
            debug!(
                frame = report.frame,
                triggers_fired = report.triggers_fired,
                dispatched = report.dispatched,
                waiting = report.waiting,
                "Tick"
            );
        }
        self.ticks.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[async_trait]
impl Scheduler for TickEngine {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<()> {
        info!(
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            max_ticks = self.config.max_ticks,
            "Starting tick engine"
        );

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_receiver();
        let mut last = Instant::now();

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping tick engine");
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let delta = now.duration_since(last);
                    last = now;

                    let ticks = self.tick(delta).await;
                    if self.config.max_ticks.is_some_and(|max| ticks >= max) {
                        info!(ticks = ticks, "Tick limit reached");
                        break;
                    }
                }
            }
        }

        self.queue.lock().await.shutdown().await;
        info!(ticks = self.ticks(), "Tick engine stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<()> {
        info!("Stopping tick engine");
        self.shutdown_tx.send_replace(true);

        // in-flight events finish; nothing is pre-empted
        self.queue.lock().await.shutdown().await;

        info!("Tick engine stopped gracefully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(16));
        assert!(config.max_ticks.is_none());
    }

    #[tokio::test]
    async fn test_zero_tick_interval_is_clamped() {
        let queue = Arc::new(Mutex::new(MasterEventQueue::new(
            crate::queue::WorkerPools::new(),
        )));
        let config = EngineConfig {
            tick_interval: Duration::ZERO,
            max_ticks: Some(3),
        };
        let engine = TickEngine::new(config, queue);
        engine.start().await.unwrap();
        assert_eq!(engine.ticks(), 3);
    }

    #[test]
    fn test_engine_config_from_settings() {
        let settings = SchedulerSettings { tick_millis: 40 };
        let config = EngineConfig::from(&settings);
        assert_eq!(config.tick_interval, Duration::from_millis(40));
    }
}
