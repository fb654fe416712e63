// Configuration management with layered configuration (defaults, file, env)

use crate::event::EventCategory;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub event: EventSettings,
    pub scheduler: SchedulerSettings,
    pub input: InputSettings,
    pub observability: ObservabilityConfig,
}

/// `event.*` keys: one worker pool per category plus status logging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    pub input: PoolSettings,
    pub render: PoolSettings,
    pub comm: PoolSettings,
    pub system: PoolSettings,
    pub logic: PoolSettings,
    pub status: StatusSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of events of this category that may execute at once
    pub max_thread: usize,
    /// Length of the bounded dispatch queue in front of the workers
    pub backlog: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    /// Seconds between status log lines; zero or negative disables them
    pub log_seconds: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    pub combo_buffer_capacity: usize,
    pub default_ttl_frames: u32,
    pub slot: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub metrics_port: Option<u16>,
}

impl PoolSettings {
    fn with_threads(max_thread: usize) -> Self {
        Self {
            max_thread,
            ..Self::default()
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_thread: 2,
            backlog: 1024,
        }
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            input: PoolSettings::with_threads(4),
            render: PoolSettings::with_threads(16),
            comm: PoolSettings::with_threads(2),
            system: PoolSettings::with_threads(2),
            logic: PoolSettings::with_threads(8),
            status: StatusSettings::default(),
        }
    }
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self { log_seconds: 5.0 }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { tick_millis: 16 }
    }
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            combo_buffer_capacity: 8,
            default_ttl_frames: 8,
            slot: 0,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
            metrics_port: None,
        }
    }
}

impl EventSettings {
    /// Pool settings for one category
    pub fn pool(&self, category: EventCategory) -> &PoolSettings {
        match category {
            EventCategory::Input => &self.input,
            EventCategory::Render => &self.render,
            EventCategory::Comm => &self.comm,
            EventCategory::System => &self.system,
            EventCategory::Logic => &self.logic,
        }
    }

    /// Status log cadence, `None` when disabled
    pub fn status_interval(&self) -> Option<Duration> {
        let secs = self.status.log_seconds;
        if secs > 0.0 {
            Duration::try_from_secs_f32(secs).ok()
        } else {
            None
        }
    }
}

impl SchedulerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("ENGINE")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        for category in EventCategory::ALL {
            let pool = self.event.pool(category);
            if pool.max_thread == 0 {
                return Err(format!(
                    "event.{}.max_thread must be greater than 0",
                    category.as_str()
                ));
            }
            if pool.backlog == 0 {
                return Err(format!(
                    "event.{}.backlog must be greater than 0",
                    category.as_str()
                ));
            }
        }

        let log_seconds = self.event.status.log_seconds;
        if log_seconds > 0.0 && Duration::try_from_secs_f32(log_seconds).is_err() {
            return Err(format!(
                "event.status.log_seconds is out of range: {}",
                log_seconds
            ));
        }

        if self.scheduler.tick_millis == 0 {
            return Err("scheduler.tick_millis must be greater than 0".to_string());
        }

        if self.input.combo_buffer_capacity == 0 {
            return Err("input.combo_buffer_capacity must be greater than 0".to_string());
        }
        if self.input.default_ttl_frames == 0 {
            return Err("input.default_ttl_frames must be greater than 0".to_string());
        }

        Ok(())
    }
}
