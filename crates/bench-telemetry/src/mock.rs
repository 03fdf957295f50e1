//! Mock device sampler for testing

use crate::sampler::{DeviceKind, DeviceReading, DeviceSampler};
use crate::{Result, TelemetryError};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

const MOCK_MEMORY_TOTAL: u64 = 8 * 1024 * 1024 * 1024; // 8GB

/// Mock sampler simulating a fixed set of devices
pub struct MockDeviceSampler {
    device_count: u32,
    kind: DeviceKind,
    fail_init: bool,
    /// Per device, the read ordinals (0-based) that fail
    failing_reads: HashMap<u32, HashSet<u64>>,
    read_counts: RwLock<HashMap<u32, u64>>,
    initialized: AtomicBool,
}

impl MockDeviceSampler {
    /// Create a mock sampler with `device_count` devices
    pub fn new(device_count: u32) -> Self {
        info!("Creating mock telemetry sampler with {} devices", device_count);
        Self {
            device_count,
            kind: DeviceKind::Gpu,
            fail_init: false,
            failing_reads: HashMap::new(),
            read_counts: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Report the simulated devices as `kind`
    pub fn with_device_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Make initialization fail
    pub fn with_init_failure(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Make the `ordinal`-th read of `device` fail
    pub fn with_read_failure(mut self, device: u32, ordinal: u64) -> Self {
        self.failing_reads.entry(device).or_default().insert(ordinal);
        self
    }

    /// Number of read attempts made against a device
    pub async fn read_attempts(&self, device: u32) -> u64 {
        self.read_counts.read().await.get(&device).copied().unwrap_or(0)
    }

    fn check_device(&self, device: u32) -> Result<()> {
        if device >= self.device_count {
            return Err(TelemetryError::DeviceNotFound(device));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceSampler for MockDeviceSampler {
    fn name(&self) -> &str {
        "mock"
    }

    fn device_kind(&self) -> DeviceKind {
        self.kind
    }

    async fn initialize(&self) -> Result<u32> {
        if self.fail_init {
            return Err(TelemetryError::InitializationFailed(
                "mock driver unavailable".to_string(),
            ));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(self.device_count)
    }

    async fn memory_total(&self, device: u32) -> Result<u64> {
        self.check_device(device)?;
        Ok(MOCK_MEMORY_TOTAL)
    }

    async fn read(&self, device: u32) -> Result<DeviceReading> {
        self.check_device(device)?;

        let ordinal = {
            let mut counts = self.read_counts.write().await;
            let count = counts.entry(device).or_insert(0);
            let ordinal = *count;
            *count += 1;
            ordinal
        };

        if self
            .failing_reads
            .get(&device)
            .is_some_and(|ordinals| ordinals.contains(&ordinal))
        {
            return Err(TelemetryError::ReadFailed {
                device,
                message: format!("scripted failure on read {}", ordinal),
            });
        }

        // 2GB + 512MB per device, utilization 45%, 55%, ...
        let reading = DeviceReading {
            utilization: 45.0 + device as f64 * 10.0,
            memory_used: 2 * 1024 * 1024 * 1024 + device as u64 * 512 * 1024 * 1024,
            memory_total: MOCK_MEMORY_TOTAL,
        };
        debug!("Mock reading for device {}: {:?}", device, reading);
        Ok(reading)
    }

    async fn shutdown(&self) -> Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}
