//! Agent configuration loaded from a TOML file
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! runnable agent that only monitors the local platform.

mod types;

pub use types::{
    compile_up_pattern, AvailTypeConfig, ConfigPropertyConfig, MetricTypeConfig,
    ResourceTypeConfig, TypeSetConfig,
};

use crate::error::ConfigError;
use crate::inventory::Interval;
use crate::scheduler::SchedulerConfig;
use crate::storage::{
    DispatcherConfig, AVAIL_BATCH_SIZE, AVAIL_BUFFER_SIZE, METRIC_BATCH_SIZE, METRIC_BUFFER_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

/// Top-level agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent: AgentSection,
    pub storage: StorageSection,
    pub diagnostics: DiagnosticsSection,
    pub dmr: ProtocolSection,
    pub jmx: ProtocolSection,
    pub platform: PlatformSection,
}

/// Settings shared by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Identifies this agent in every resource and measurement id
    pub feed_id: String,

    /// Measurement types collected more often than this are excluded
    pub min_collection_interval_secs: u64,

    /// Period of full rediscovery; 0 discovers once at start
    pub discovery_period_secs: u64,

    /// Longest collector sleep between two looks at its queue
    pub poll_interval_ms: u64,

    /// How long shutdown waits for collectors and buffers
    pub shutdown_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            feed_id: "vigil".to_string(),
            min_collection_interval_secs: 30,
            discovery_period_secs: 600,
            poll_interval_ms: 1_000,
            shutdown_timeout_secs: 5,
        }
    }
}

/// Buffering between collectors and storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub metric_buffer_size: usize,
    pub metric_batch_size: usize,
    pub avail_buffer_size: usize,
    pub avail_batch_size: usize,
    /// Longest time a partial batch waits
    pub flush_interval_ms: u64,
    /// Passed to the storage adapter with every batch
    pub store_wait_millis: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            metric_buffer_size: METRIC_BUFFER_SIZE,
            metric_batch_size: METRIC_BATCH_SIZE,
            avail_buffer_size: AVAIL_BUFFER_SIZE,
            avail_batch_size: AVAIL_BATCH_SIZE,
            flush_interval_ms: 1_000,
            store_wait_millis: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSection {
    pub enabled: bool,
    pub report_interval_secs: u64,
}

impl Default for DiagnosticsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval_secs: 60,
        }
    }
}

/// Type sets and endpoints of one remote protocol
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSection {
    pub type_sets: Vec<TypeSetConfig>,
    pub endpoints: Vec<RemoteEndpointConfig>,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

/// A managed server reached over HTTP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEndpointConfig {
    pub name: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Type sets to monitor; all of the protocol's sets when absent
    #[serde(default)]
    pub resource_type_sets: Option<Vec<String>>,

    /// Locations that must exist before the endpoint is considered ready
    #[serde(default)]
    pub wait_for: Vec<String>,
}

impl RemoteEndpointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Monitoring of the host the agent runs on
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSection {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Overrides the id read from `/etc/machine-id`
    pub machine_id: Option<String>,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            machine_id: None,
        }
    }
}

impl PlatformSection {
    pub fn interval(&self) -> Interval {
        Interval::seconds(self.interval_secs)
    }
}

impl AgentConfig {
    /// Load and validate a configuration file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// # Errors
    ///
    /// Same as [`AgentConfig::from_file`], minus the read error.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.feed_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "agent feed_id must not be empty".to_string(),
            ));
        }
        if self.agent.min_collection_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent min_collection_interval_secs must be positive".to_string(),
            ));
        }
        if self.agent.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "agent poll_interval_ms must be positive".to_string(),
            ));
        }

        for (name, value) in [
            ("metric_buffer_size", self.storage.metric_buffer_size),
            ("metric_batch_size", self.storage.metric_batch_size),
            ("avail_buffer_size", self.storage.avail_buffer_size),
            ("avail_batch_size", self.storage.avail_batch_size),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "storage {name} must be positive"
                )));
            }
        }

        if self.diagnostics.enabled && self.diagnostics.report_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "diagnostics report_interval_secs must be positive".to_string(),
            ));
        }

        if self.platform.enabled && self.platform.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "platform interval_secs must be positive".to_string(),
            ));
        }

        for (protocol, section) in [("dmr", &self.dmr), ("jmx", &self.jmx)] {
            section.validate(protocol)?;
        }

        let mut names = BTreeSet::new();
        for endpoint in self.dmr.endpoints.iter().chain(&self.jmx.endpoints) {
            if !names.insert(endpoint.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "endpoint name [{}] is used more than once",
                    endpoint.name
                )));
            }
        }

        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_millis(self.agent.poll_interval_ms),
            discovery_period: match self.agent.discovery_period_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            shutdown_timeout: self.shutdown_timeout(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.shutdown_timeout_secs)
    }

    pub fn min_collection_interval_millis(&self) -> u64 {
        self.agent.min_collection_interval_secs.saturating_mul(1_000)
    }

    pub fn metric_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            buffer_size: self.storage.metric_buffer_size,
            batch_size: self.storage.metric_batch_size,
            flush_interval: Duration::from_millis(self.storage.flush_interval_ms),
            store_wait_millis: self.storage.store_wait_millis,
        }
    }

    pub fn avail_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            buffer_size: self.storage.avail_buffer_size,
            batch_size: self.storage.avail_batch_size,
            flush_interval: Duration::from_millis(self.storage.flush_interval_ms),
            store_wait_millis: self.storage.store_wait_millis,
        }
    }
}

impl ProtocolSection {
    fn validate(&self, protocol: &str) -> Result<(), ConfigError> {
        let mut set_names = BTreeSet::new();
        for set in &self.type_sets {
            if !set_names.insert(set.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "{protocol} type set [{}] is defined more than once",
                    set.name
                )));
            }
        }

        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{protocol} endpoint with url [{}] has no name",
                    endpoint.url
                )));
            }
            if endpoint.timeout_secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{protocol} endpoint [{}] timeout_secs must be positive",
                    endpoint.name
                )));
            }
        }
        Ok(())
    }

    pub fn enabled_endpoints(&self) -> impl Iterator<Item = &RemoteEndpointConfig> {
        self.endpoints.iter().filter(|e| e.enabled)
    }
}
