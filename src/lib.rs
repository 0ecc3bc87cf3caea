/// Error types for the monitoring agent
pub mod error;

/// Data points produced by collection
pub mod events;

/// Self-diagnostics counters
pub mod diagnostics;

/// Resource types, resources and the resource graph
pub mod inventory;

/// Location algebra, drivers, sessions, discovery and the per-endpoint service
pub mod protocol;

/// Collection queues and the background loops that drain them
pub mod scheduler;

/// Buffered hand-off to the storage collaborator
pub mod storage;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use config::AgentConfig;
pub use diagnostics::Diagnostics;
pub use error::{ConfigError, EndpointError, ProtocolError, ServiceError, StorageError};
pub use events::{Avail, AvailDataPoint, MetricDataPoint, MetricKind};
