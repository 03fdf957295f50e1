//! Device sampler interface

use crate::config::{SamplerBackend, TelemetryConfig};
use crate::{Result, TelemetryError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// What a sampler's devices are; decides how readings are labelled in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Gpu,
    /// The machine running the benchmark (CPU and RAM)
    Host,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Gpu => "gpu",
            DeviceKind::Host => "host",
        }
    }

    /// Heading used in the human-readable summary
    pub fn title(&self) -> &'static str {
        match self {
            DeviceKind::Gpu => "GPU",
            DeviceKind::Host => "Host",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait defining the interface for device samplers
#[async_trait]
pub trait DeviceSampler: Send + Sync {
    /// Backend name, for logging
    fn name(&self) -> &str;

    /// Kind of device this sampler reads
    fn device_kind(&self) -> DeviceKind;

    /// Initialize the backend and return the number of devices present
    async fn initialize(&self) -> Result<u32>;

    /// Total memory of a device in bytes
    async fn memory_total(&self, device: u32) -> Result<u64>;

    /// Take one reading from a device
    async fn read(&self, device: u32) -> Result<DeviceReading>;

    /// Release backend resources
    async fn shutdown(&self) -> Result<()>;
}

/// A raw reading returned by a sampler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceReading {
    /// Compute utilization (percentage)
    pub utilization: f64,
    /// Memory in use, bytes
    pub memory_used: u64,
    /// Memory capacity, bytes
    pub memory_total: u64,
}

/// A point-in-time resource reading for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub device_id: u32,
    pub timestamp: DateTime<Utc>,
    /// Compute utilization (percentage)
    pub utilization: f64,
    /// Memory utilization (percentage)
    pub mem_util: f64,
    /// Memory in use (MB)
    pub mem_used_mb: f64,
}

impl TelemetrySample {
    pub fn from_reading(device_id: u32, reading: DeviceReading) -> Self {
        let mem_util = if reading.memory_total > 0 {
            reading.memory_used as f64 / reading.memory_total as f64 * 100.0
        } else {
            0.0
        };

        Self {
            device_id,
            timestamp: Utc::now(),
            utilization: reading.utilization,
            mem_util,
            mem_used_mb: bytes_to_mb(reading.memory_used),
        }
    }
}

pub(crate) fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Create a backend-specific sampler
pub fn create_sampler(config: &TelemetryConfig) -> Result<Arc<dyn DeviceSampler>> {
    info!("Creating telemetry sampler for backend: {}", config.backend);

    config.validate().map_err(TelemetryError::Configuration)?;

    match config.backend {
        #[cfg(feature = "host")]
        SamplerBackend::Host => Ok(Arc::new(crate::host::HostSampler::new())),

        #[cfg(feature = "nvml")]
        SamplerBackend::Nvml => Ok(Arc::new(crate::nvml::NvmlSampler::new())),

        #[cfg(any(feature = "mock", test))]
        SamplerBackend::Mock => Ok(Arc::new(crate::mock::MockDeviceSampler::new(2))),

        #[allow(unreachable_patterns)]
        _ => {
            warn!("Telemetry backend {} not supported or feature not enabled", config.backend);
            Err(TelemetryError::UnsupportedBackend(config.backend.to_string()))
        }
    }
}
