//! # bench-telemetry
//!
//! Background device telemetry for benchmark runs.
//!
//! This crate provides:
//! - A [`DeviceSampler`] interface over GPU/host resource readers
//! - A [`TelemetryCollector`] that samples every configured device on a fixed
//!   cadence while a run is in flight, and can be stopped and awaited
//! - Per-device aggregation into a [`TelemetrySummary`]
//!
//! ## Supported Backends
//!
//! - **Host**: host CPU utilization and RAM usage via `sysinfo`, exposed as device 0
//!   and reported under `host` labels
//! - **NVML**: NVIDIA GPU utilization and memory (requires the `nvml` feature)
//! - **Mock**: simulated devices with scripted failures, for tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use bench_telemetry::{create_sampler, DeviceSelection, SamplerBackend, TelemetryCollector, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TelemetryConfig::new(SamplerBackend::Host)
//!         .with_selection(DeviceSelection::All);
//!     let sampler = create_sampler(&config)?;
//!
//!     let mut collector = TelemetryCollector::new(config);
//!     collector.start(sampler).await?;
//!
//!     // ... run the benchmark ...
//!
//!     let summary = collector.stop().await;
//!     println!("{:?}", summary);
//!     Ok(())
//! }
//! ```

use thiserror::Error;

pub mod collector;
pub mod config;
pub mod sampler;
pub mod summary;

#[cfg(feature = "host")]
pub mod host;

#[cfg(feature = "nvml")]
pub mod nvml;

// Mock implementation for testing
#[cfg(any(feature = "mock", test))]
pub mod mock;

pub use collector::{CollectorState, TelemetryCollector};
pub use config::{DeviceSelection, SamplerBackend, TelemetryConfig};
pub use sampler::{create_sampler, DeviceKind, DeviceReading, DeviceSampler, TelemetrySample};
pub use summary::{DeviceSummary, TelemetrySummary};

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors that can occur while collecting device telemetry
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Telemetry backend not supported: {0}")]
    UnsupportedBackend(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Device initialization failed: {0}")]
    InitializationFailed(String),

    #[error("No valid devices to monitor")]
    NoDevices,

    #[error("Device not found: {0}")]
    DeviceNotFound(u32),

    #[error("Read failed on device {device}: {message}")]
    ReadFailed { device: u32, message: String },

    #[error("Invalid collector state: {0}")]
    InvalidState(String),
}

impl TelemetryError {
    /// Whether this error means monitoring is unavailable for the whole run
    pub fn disables_monitoring(&self) -> bool {
        !matches!(self, TelemetryError::ReadFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let read = TelemetryError::ReadFailed {
            device: 1,
            message: "transient".to_string(),
        };
        assert!(!read.disables_monitoring());
        assert!(TelemetryError::NoDevices.disables_monitoring());
        assert!(TelemetryError::InitializationFailed("driver".to_string()).disables_monitoring());
    }

    #[test]
    fn test_error_display() {
        let error = TelemetryError::UnsupportedBackend("rocm".to_string());
        assert_eq!(error.to_string(), "Telemetry backend not supported: rocm");

        let error = TelemetryError::ReadFailed {
            device: 3,
            message: "timeout".to_string(),
        };
        assert_eq!(error.to_string(), "Read failed on device 3: timeout");
    }
}
