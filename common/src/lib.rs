// Common library for the event core shared by the scheduler binary and tests

pub mod bootstrap;
pub mod condition;
pub mod config;
pub mod errors;
pub mod event;
pub mod input;
pub mod queue;
pub mod scheduler;
pub mod telemetry;
pub mod trigger;
