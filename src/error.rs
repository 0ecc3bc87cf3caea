use thiserror::Error;

/// Errors raised by protocol drivers and location resolvers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Endpoint unreachable: {0}")]
    Connectivity(String),

    #[error("Protocol failure: {0}")]
    Protocol(String),

    #[error("[{single}] did not result from multi-target location [{multi_target}]")]
    LocationMismatch {
        multi_target: String,
        single: String,
    },

    #[error("Invalid location: {0}")]
    InvalidLocation(String),
}

impl ProtocolError {
    /// Whether the failure means the endpoint could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ProtocolError::Connectivity(_))
    }
}

impl From<reqwest::Error> for ProtocolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            ProtocolError::Connectivity(e.to_string())
        } else {
            ProtocolError::Protocol(e.to_string())
        }
    }
}

/// Errors returned by an endpoint service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Endpoint [{0}] is not ready yet")]
    NotReady(String),

    #[error("Discovery is already running for endpoint [{0}]")]
    DiscoveryInProgress(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors that can occur while handing data to the storage collaborator
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage rejected the payload: {0}")]
    Rejected(String),

    #[error("Storage unreachable: {0}")]
    Unreachable(String),

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that stop a single endpoint from being started
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("Invalid address for endpoint [{endpoint}]: {reason}")]
    InvalidAddress { endpoint: String, reason: String },

    #[error("Invalid type configuration for endpoint [{endpoint}]: {source}")]
    Types {
        endpoint: String,
        #[source]
        source: ConfigError,
    },
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("Resource type [{0}] is defined more than once")]
    DuplicateResourceType(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
