use crate::error::Result as CompvisorResult;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CompvisorConfig {
    pub manager: ManagerConfig,
    pub events: EventConfig,
    pub heartbeat: HeartbeatConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Maximum number of components that can be registered
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Sleep between two passes over the components, in milliseconds
    #[serde(default = "default_quantum_ms")]
    pub quantum_ms: u64,

    /// Name of the worker thread
    #[serde(default = "default_worker_name")]
    pub worker_name: String,

    /// Worker thread stack size in bytes (platform default when unset)
    #[serde(default)]
    pub worker_stack_size: Option<usize>,

    /// How long the daemon waits for the worker on shutdown, in milliseconds
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EventConfig {
    /// Lifecycle event channel capacity
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// Register the heartbeat component
    #[serde(default = "default_heartbeat_enabled")]
    pub enabled: bool,

    #[serde(default = "default_heartbeat_tag")]
    pub tag: String,

    /// Interval between heartbeats, in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,

    /// Deinitialize after this many beats
    #[serde(default)]
    pub max_beats: Option<u64>,
}

impl ManagerConfig {
    /// Sleep between passes, never shorter than one millisecond
    pub fn quantum(&self) -> Duration {
        Duration::from_millis(self.quantum_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the quantum, rounded up to whole milliseconds
    pub fn with_quantum(mut self, quantum: Duration) -> Self {
        let millis = (quantum.as_nanos() + 999_999) / 1_000_000;
        self.quantum_ms = u64::try_from(millis).unwrap_or(u64::MAX).max(1);
        self
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl CompvisorConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("compvisor.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_environment(path, Self::environment())
    }

    /// COMPVISOR_MANAGER__QUANTUM_MS=5 overrides manager.quantum_ms
    fn environment() -> Environment {
        Environment::with_prefix("COMPVISOR")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_environment<P: AsRef<Path>>(
        path: P,
        environment: Environment,
    ) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("manager.capacity", default_capacity() as i64)?
            .set_default("manager.quantum_ms", default_quantum_ms())?
            .set_default("manager.worker_name", default_worker_name())?
            .set_default("manager.shutdown_timeout_ms", default_shutdown_timeout_ms())?
            .set_default("events.capacity", default_event_capacity() as i64)?
            .set_default("heartbeat.enabled", default_heartbeat_enabled())?
            .set_default("heartbeat.tag", default_heartbeat_tag())?
            .set_default("heartbeat.interval_ms", default_heartbeat_interval_ms())?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            .add_source(environment)
            .build()?;

        let config: CompvisorConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manager.capacity == 0 {
            return Err(ConfigError::Message(
                "Manager capacity must be greater than 0".to_string(),
            ));
        }

        if self.manager.quantum_ms == 0 {
            return Err(ConfigError::Message(
                "Manager quantum_ms must be greater than 0".to_string(),
            ));
        }

        if self.manager.worker_name.trim().is_empty() {
            return Err(ConfigError::Message(
                "Manager worker_name must not be empty".to_string(),
            ));
        }

        if self.events.capacity == 0 {
            return Err(ConfigError::Message(
                "Event capacity must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat.max_beats == Some(0) {
            return Err(ConfigError::Message(
                "Heartbeat max_beats must be greater than 0 when set".to_string(),
            ));
        }

        if self.heartbeat.enabled && self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::Message(
                "Heartbeat interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> CompvisorResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration to `path` as TOML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> CompvisorResult<()> {
        std::fs::write(path.as_ref(), self.to_toml()?)?;
        info!("Configuration written to: {}", path.as_ref().display());
        Ok(())
    }
}

impl Default for CompvisorConfig {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            events: EventConfig {
                capacity: default_event_capacity(),
            },
            heartbeat: HeartbeatConfig {
                enabled: default_heartbeat_enabled(),
                tag: default_heartbeat_tag(),
                interval_ms: default_heartbeat_interval_ms(),
                max_beats: None,
            },
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            quantum_ms: default_quantum_ms(),
            worker_name: default_worker_name(),
            worker_stack_size: None,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

// Default value functions
fn default_capacity() -> usize {
    8
}
fn default_quantum_ms() -> u64 {
    10
}
fn default_worker_name() -> String {
    "manager".to_string()
}
fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_event_capacity() -> usize {
    64
}

fn default_heartbeat_enabled() -> bool {
    true
}
fn default_heartbeat_tag() -> String {
    "heartbeat".to_string()
}
fn default_heartbeat_interval_ms() -> u64 {
    1000
}
