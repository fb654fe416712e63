// Scheduler module: the tick loop that drives the event queue

pub mod engine;

pub use engine::{EngineConfig, Scheduler, TickEngine};
