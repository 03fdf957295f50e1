//! Error handling for streambench
//!
//! Configuration-level problems are rejected before any timed dispatch.
//! Individual request failures are never errors here: they are recorded in
//! the outcome set instead, and telemetry failures only disable monitoring.

/// Result type alias for benchmark operations
pub type Result<T> = std::result::Result<T, BenchError>;

/// Unified error type for benchmark runs
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// Generic configuration problem
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Burstiness must be strictly positive
    #[error("Invalid burstiness {0}: a positive burstiness factor is expected")]
    InvalidBurstiness(f64),

    /// Request rate must be positive (or unbounded)
    #[error("Invalid request rate: {0}")]
    InvalidRequestRate(String),

    /// Malformed goodput specification (bad format, key or value)
    #[error("Invalid goodput specification: {0}")]
    InvalidGoodput(String),

    /// Unknown percentile metric name
    #[error("Invalid metric name: {0}")]
    InvalidMetric(String),

    /// Backend identifier not present in the registry
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// The untimed warm-up probe failed
    #[error("Initial test failed: {0}")]
    WarmupFailed(String),

    /// A dispatch task could not be joined
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Layered configuration errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl BenchError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a goodput specification error
    pub fn goodput(msg: impl Into<String>) -> Self {
        Self::InvalidGoodput(msg.into())
    }

    /// Whether this error is a configuration problem detected before dispatch
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BenchError::Configuration(_)
                | BenchError::InvalidBurstiness(_)
                | BenchError::InvalidRequestRate(_)
                | BenchError::InvalidGoodput(_)
                | BenchError::InvalidMetric(_)
                | BenchError::UnknownBackend(_)
                | BenchError::Config(_)
        )
    }
}
