// Telemetry module for structured logging, metrics, and failure reporting

use crate::event::{EventCategory, EventRef};
use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging
///
/// This function sets up the tracing subscriber with:
/// - JSON formatting with span context when `json` is set, plain text otherwise
/// - Log levels from `RUST_LOG`, falling back to the configured level
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, json = json, "Structured logging initialized");

    Ok(())
}

/// Initialize Prometheus metrics exporter
///
/// Registers descriptions for every metric the event core records.
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!("events_submitted_total", "Events accepted by the queue");
    describe_counter!("events_dispatched_total", "Events handed to a worker pool");
    describe_counter!("events_completed_total", "Events that finished successfully");
    describe_counter!("events_failed_total", "Events that finished with an error");
    describe_counter!("triggers_fired_total", "Trigger firings");
    describe_counter!(
        "condition_errors_total",
        "Condition evaluations that failed or panicked"
    );
    describe_counter!("combo_evictions_total", "Combos evicted by the capacity trim");
    describe_histogram!(
        "event_duration_seconds",
        "Execution time of events in seconds"
    );
    describe_gauge!("events_waiting", "Events currently waiting on their conditions");

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_event_submitted(category: EventCategory) {
    counter!("events_submitted_total", "category" => category.as_str()).increment(1);
}

#[inline]
pub fn record_event_dispatched(category: EventCategory) {
    counter!("events_dispatched_total", "category" => category.as_str()).increment(1);
}

/// Record a finished event and its execution time
#[inline]
pub fn record_event_completed(category: EventCategory, failed: bool, duration_seconds: f64) {
    if failed {
        counter!("events_failed_total", "category" => category.as_str()).increment(1);
    } else {
        counter!("events_completed_total", "category" => category.as_str()).increment(1);
    }
    histogram!("event_duration_seconds", "category" => category.as_str())
        .record(duration_seconds);
}

#[inline]
pub fn record_trigger_fired(trigger_id: &str) {
    counter!("triggers_fired_total", "trigger_id" => trigger_id.to_string()).increment(1);
}

#[inline]
pub fn record_condition_error() {
    counter!("condition_errors_total").increment(1);
}

#[inline]
pub fn record_combo_evictions(count: usize) {
    counter!("combo_evictions_total").increment(count as u64);
}

#[inline]
pub fn update_waiting_events(size: usize) {
    gauge!("events_waiting").set(size as f64);
}

/// Sink for execution failures
///
/// Called for every event that finishes with an error and for every condition
/// that fails to evaluate.
pub trait FailureReporter: Send + Sync {
    fn error(&self, message: &str, event: &EventRef, error: &(dyn std::error::Error + 'static));
}

/// Log-based failure reporter (default implementation)
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailureReporter;

impl FailureReporter for LogFailureReporter {
    fn error(&self, message: &str, event: &EventRef, error: &(dyn std::error::Error + 'static)) {
        tracing::error!(
            event_id = %event.id(),
            event_name = event.name(),
            category = %event.category(),
            macro_id = ?event.macro_id(),
            error = %error,
            "{}",
            message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExecutionError;
    use crate::event::{Event, Work};

    #[test]
    fn test_init_logging_with_valid_level() {
        // only the first subscriber in a process wins
        let result = init_logging("info", false);
        assert!(result.is_ok() || result.is_err());
    }

    #[test]
    fn test_metrics_recording() {
        // without an installed recorder these are no-ops
        record_event_submitted(EventCategory::Logic);
        record_event_dispatched(EventCategory::Logic);
        record_event_completed(EventCategory::Logic, false, 0.25);
        record_event_completed(EventCategory::Render, true, 1.5);
        record_trigger_fired("trigger-time-1");
        record_condition_error();
        record_combo_evictions(2);
        update_waiting_events(10);
    }

    #[test]
    fn test_log_failure_reporter() {
        let event = Event::comm("upload", Work::noop()).handle();
        let err = ExecutionError::failed("connection reset");
        LogFailureReporter.error("Event execution failed", &event, &err);
    }
}
