//! Host resource sampler backed by sysinfo
//!
//! Exposes the machine running the benchmark as a single device (id 0):
//! global CPU utilization stands in for compute utilization, RAM for memory.

use crate::sampler::{DeviceKind, DeviceReading, DeviceSampler};
use crate::{Result, TelemetryError};

use async_trait::async_trait;
use std::sync::Mutex;
use sysinfo::System;
use tracing::{debug, info};

const HOST_DEVICE: u32 = 0;

/// Host CPU/RAM sampler
pub struct HostSampler {
    system: Mutex<System>,
}

impl HostSampler {
    /// Create a new host sampler
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn check_device(device: u32) -> Result<()> {
        if device != HOST_DEVICE {
            return Err(TelemetryError::DeviceNotFound(device));
        }
        Ok(())
    }

    fn with_system<T>(&self, f: impl FnOnce(&mut System) -> T) -> Result<T> {
        let mut system = self.system.lock().map_err(|_| TelemetryError::ReadFailed {
            device: HOST_DEVICE,
            message: "sysinfo state poisoned".to_string(),
        })?;
        Ok(f(&mut system))
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceSampler for HostSampler {
    fn name(&self) -> &str {
        "host"
    }

    fn device_kind(&self) -> DeviceKind {
        DeviceKind::Host
    }

    async fn initialize(&self) -> Result<u32> {
        info!("Initializing host telemetry sampler");
        let total = self.with_system(|system| {
            // CPU usage is a delta between two refreshes; prime the first one.
            system.refresh_cpu_usage();
            system.refresh_memory();
            system.total_memory()
        })?;

        if total == 0 {
            return Err(TelemetryError::InitializationFailed(
                "host memory information unavailable".to_string(),
            ));
        }
        Ok(1)
    }

    async fn memory_total(&self, device: u32) -> Result<u64> {
        Self::check_device(device)?;
        self.with_system(|system| {
            system.refresh_memory();
            system.total_memory()
        })
    }

    async fn read(&self, device: u32) -> Result<DeviceReading> {
        Self::check_device(device)?;
        let reading = self.with_system(|system| {
            system.refresh_cpu_usage();
            system.refresh_memory();
            DeviceReading {
                utilization: system.global_cpu_info().cpu_usage() as f64,
                memory_used: system.used_memory(),
                memory_total: system.total_memory(),
            }
        })?;
        debug!("Host reading: cpu={:.1}% mem_used={}", reading.utilization, reading.memory_used);
        Ok(reading)
    }

    async fn shutdown(&self) -> Result<()> {
        debug!("Host telemetry sampler shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_device_rejected() {
        let sampler = HostSampler::new();
        assert!(matches!(
            sampler.read(1).await,
            Err(TelemetryError::DeviceNotFound(1))
        ));
    }

    #[tokio::test]
    async fn test_host_reading() {
        let sampler = HostSampler::new();
        assert_eq!(sampler.device_kind(), DeviceKind::Host);
        assert_eq!(sampler.initialize().await.unwrap(), 1);
        let reading = sampler.read(HOST_DEVICE).await.unwrap();
        assert!(reading.memory_total > 0);
        assert!(reading.memory_used <= reading.memory_total);
    }
}
