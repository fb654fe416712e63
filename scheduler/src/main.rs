// Scheduler binary entry point: runs the tick loop until Ctrl+C

use anyhow::{Context, Result};
use common::bootstrap::{EngineContext, TriggerRegistry};
use common::config::Settings;
use common::event::{Event, Work};
use common::scheduler::Scheduler;
use common::telemetry;
use common::trigger::{EventTrigger, Payload, TimeTrigger};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.json_logs,
    )?;
    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!(
        tick_millis = settings.scheduler.tick_millis,
        combo_capacity = settings.input.combo_buffer_capacity,
        "Configuration loaded"
    );

    let context = EngineContext::build(settings)?;

    let mut registry = TriggerRegistry::new();
    registry.register("heartbeat", 100, |_| {
        let trigger = TimeTrigger::new(Duration::from_secs(1))
            .with_id("heartbeat")
            .with_event_factory(|tick| {
                let frame = tick.frame;
                Payload::Single(Event::system(
                    "heartbeat",
                    Work::from_fn(move || {
                        tracing::debug!(frame = frame, "Heartbeat");
                        Ok(())
                    }),
                ))
            });
        Ok(Box::new(trigger) as Box<dyn EventTrigger>)
    })?;
    let installed = registry.install(&context).await?;
    info!(triggers = ?installed, "Startup triggers installed");

    let engine = Arc::new(context.engine());
    let engine_for_shutdown = Arc::clone(&engine);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        if let Err(e) = engine_for_shutdown.stop().await {
            error!(error = %e, "Error during engine shutdown");
        }
    });

    info!("Starting tick loop");
    if let Err(e) = engine.start().await {
        error!(error = %e, "Tick engine error");
        return Err(e);
    }

    info!("Scheduler stopped");
    Ok(())
}
