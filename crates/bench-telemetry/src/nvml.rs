//! NVML (NVIDIA Management Library) sampler

use crate::sampler::{DeviceKind, DeviceReading, DeviceSampler};
use crate::{Result, TelemetryError};

use async_trait::async_trait;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::{Device, Nvml};
use std::sync::Mutex;
use tracing::{debug, info};

/// NVIDIA GPU sampler
pub struct NvmlSampler {
    nvml: Mutex<Option<Nvml>>,
}

impl NvmlSampler {
    /// Create a sampler; the library is loaded by `initialize`
    pub fn new() -> Self {
        Self {
            nvml: Mutex::new(None),
        }
    }

    fn with_device<T>(
        &self,
        index: u32,
        f: impl FnOnce(&Device<'_>) -> std::result::Result<T, NvmlError>,
    ) -> Result<T> {
        let read_failed = |message: String| TelemetryError::ReadFailed {
            device: index,
            message,
        };

        let guard = self
            .nvml
            .lock()
            .map_err(|_| read_failed("NVML state poisoned".to_string()))?;
        let nvml = guard
            .as_ref()
            .ok_or_else(|| TelemetryError::InvalidState("NVML not initialized".to_string()))?;

        let device = nvml.device_by_index(index).map_err(|e| match e {
            NvmlError::InvalidArg | NvmlError::NotFound => TelemetryError::DeviceNotFound(index),
            other => read_failed(other.to_string()),
        })?;
        f(&device).map_err(|e| read_failed(e.to_string()))
    }
}

impl Default for NvmlSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceSampler for NvmlSampler {
    fn name(&self) -> &str {
        "nvml"
    }

    fn device_kind(&self) -> DeviceKind {
        DeviceKind::Gpu
    }

    async fn initialize(&self) -> Result<u32> {
        info!("Initializing NVML telemetry sampler");
        let nvml = Nvml::init().map_err(|e| TelemetryError::InitializationFailed(e.to_string()))?;
        let count = nvml
            .device_count()
            .map_err(|e| TelemetryError::InitializationFailed(e.to_string()))?;

        let mut guard = self
            .nvml
            .lock()
            .map_err(|_| TelemetryError::InitializationFailed("NVML state poisoned".to_string()))?;
        *guard = Some(nvml);

        info!("NVML reports {} GPUs", count);
        Ok(count)
    }

    async fn memory_total(&self, device: u32) -> Result<u64> {
        self.with_device(device, |d| d.memory_info().map(|info| info.total))
    }

    async fn read(&self, device: u32) -> Result<DeviceReading> {
        let reading = self.with_device(device, |d| {
            let utilization = d.utilization_rates()?;
            let memory = d.memory_info()?;
            Ok(DeviceReading {
                utilization: utilization.gpu as f64,
                memory_used: memory.used,
                memory_total: memory.total,
            })
        })?;
        debug!(
            "GPU {} reading: util={:.1}% mem_used={}",
            device, reading.utilization, reading.memory_used
        );
        Ok(reading)
    }

    async fn shutdown(&self) -> Result<()> {
        if let Ok(mut guard) = self.nvml.lock() {
            // Dropping the handle calls nvmlShutdown.
            guard.take();
        }
        debug!("NVML telemetry sampler shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_before_initialize() {
        let sampler = NvmlSampler::new();
        assert_eq!(sampler.device_kind(), DeviceKind::Gpu);
        assert!(matches!(
            sampler.read(0).await,
            Err(TelemetryError::InvalidState(_))
        ));
    }
}
