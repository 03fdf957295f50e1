//! Background telemetry collector
//!
//! The collector moves through `Idle -> Running -> Stopping -> Idle`. While
//! running it owns one spawned sampling task that reads every selected device
//! once per interval. A failed read on one device is logged and sampling
//! continues for the others. Stopping signals the task, waits for it to exit
//! and only then aggregates, so no sample is appended once teardown starts.

use crate::config::TelemetryConfig;
use crate::sampler::{bytes_to_mb, DeviceKind, DeviceSampler, TelemetrySample};
use crate::summary::TelemetrySummary;
use crate::{Result, TelemetryError};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Lifecycle state of a [`TelemetryCollector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Running,
    Stopping,
}

/// Samples device telemetry concurrently with a benchmark run
pub struct TelemetryCollector {
    config: TelemetryConfig,
    state: CollectorState,
    kind: DeviceKind,
    devices: Vec<u32>,
    mem_totals: BTreeMap<u32, f64>,
    samples: Arc<RwLock<Vec<TelemetrySample>>>,
    sampler: Option<Arc<dyn DeviceSampler>>,
    stopping: Arc<AtomicBool>,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryCollector {
    /// Create an idle collector
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            state: CollectorState::Idle,
            kind: DeviceKind::default(),
            devices: Vec::new(),
            mem_totals: BTreeMap::new(),
            samples: Arc::new(RwLock::new(Vec::new())),
            sampler: None,
            stopping: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            handle: None,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// Devices being sampled by the current or last run
    pub fn devices(&self) -> &[u32] {
        &self.devices
    }

    /// Snapshot of the samples collected so far
    pub async fn samples(&self) -> Vec<TelemetrySample> {
        self.samples.read().await.clone()
    }

    /// Initialize the sampler and spawn the sampling loop.
    ///
    /// Any failure here leaves the collector idle; the caller is expected to
    /// carry on without monitoring.
    pub async fn start(&mut self, sampler: Arc<dyn DeviceSampler>) -> Result<Vec<u32>> {
        if self.state != CollectorState::Idle {
            return Err(TelemetryError::InvalidState(format!(
                "cannot start collector in state {:?}",
                self.state
            )));
        }
        if !self.config.devices.is_enabled() {
            return Err(TelemetryError::Configuration(
                "telemetry is disabled for this run".to_string(),
            ));
        }

        let device_count = sampler.initialize().await?;
        let devices = self.config.devices.resolve(device_count);
        if devices.is_empty() {
            shutdown_quietly(sampler.as_ref()).await;
            return Err(TelemetryError::NoDevices);
        }

        let mut mem_totals = BTreeMap::new();
        for &device in &devices {
            match sampler.memory_total(device).await {
                Ok(total) => {
                    mem_totals.insert(device, bytes_to_mb(total));
                }
                Err(e) => {
                    shutdown_quietly(sampler.as_ref()).await;
                    return Err(TelemetryError::InitializationFailed(format!(
                        "reading memory capacity of device {}: {}",
                        device, e
                    )));
                }
            }
        }

        info!(
            "Monitoring devices via {}: {:?}",
            sampler.name(),
            devices
        );

        self.samples.write().await.clear();
        self.stopping.store(false, Ordering::SeqCst);

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(sampling_loop(
            Arc::clone(&sampler),
            devices.clone(),
            Arc::clone(&self.samples),
            Arc::clone(&self.stopping),
            self.config.sampling_interval,
            stop_rx,
        ));

        self.kind = sampler.device_kind();
        self.devices = devices.clone();
        self.mem_totals = mem_totals;
        self.sampler = Some(sampler);
        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        self.state = CollectorState::Running;

        Ok(devices)
    }

    /// Cancel the sampling loop, wait for it, and aggregate what was collected
    pub async fn stop(&mut self) -> TelemetrySummary {
        if self.state == CollectorState::Running {
            self.state = CollectorState::Stopping;
            self.stopping.store(true, Ordering::SeqCst);

            if let Some(tx) = self.stop_tx.take() {
                let _ = tx.send(());
            }
            if let Some(handle) = self.handle.take() {
                if let Err(e) = handle.await {
                    warn!("Telemetry sampling task ended abnormally: {}", e);
                }
            }
            if let Some(sampler) = self.sampler.take() {
                shutdown_quietly(sampler.as_ref()).await;
            }

            debug!("Telemetry collector stopped");
            self.state = CollectorState::Idle;
        }

        let samples = self.samples.read().await;
        TelemetrySummary::from_samples(self.kind, &samples, &self.mem_totals)
    }
}

impl Drop for TelemetryCollector {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn sampling_loop(
    sampler: Arc<dyn DeviceSampler>,
    devices: Vec<u32>,
    samples: Arc<RwLock<Vec<TelemetrySample>>>,
    stopping: Arc<AtomicBool>,
    interval: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                for &device in &devices {
                    let result = sampler.read(device).await;
                    if stopping.load(Ordering::SeqCst) {
                        return;
                    }
                    match result {
                        Ok(reading) => {
                            samples
                                .write()
                                .await
                                .push(TelemetrySample::from_reading(device, reading));
                        }
                        Err(e) => warn!("Error monitoring device {}: {}", device, e),
                    }
                }
            }
        }
    }
}

async fn shutdown_quietly(sampler: &dyn DeviceSampler) {
    if let Err(e) = sampler.shutdown().await {
        warn!("Telemetry sampler shutdown failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceSelection, SamplerBackend};
    use crate::mock::MockDeviceSampler;

    fn config(devices: DeviceSelection) -> TelemetryConfig {
        TelemetryConfig::new(SamplerBackend::Mock)
            .with_selection(devices)
            .with_sampling_interval(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_collects_each_interval() {
        let mut collector = TelemetryCollector::new(config(DeviceSelection::All));
        let sampler = Arc::new(MockDeviceSampler::new(2));

        let devices = collector.start(sampler).await.unwrap();
        assert_eq!(devices, vec![0, 1]);
        assert_eq!(collector.state(), CollectorState::Running);

        // Ticks at t=0,1,2,3
        tokio::time::sleep(Duration::from_millis(3500)).await;
        let summary = collector.stop().await;

        assert_eq!(collector.state(), CollectorState::Idle);
        assert_eq!(summary.devices.len(), 2);
        assert_eq!(summary.devices[&0].sample_count, 4);
        assert_eq!(summary.kind, DeviceKind::Gpu);
        assert_eq!(summary.devices[&0].avg_util, 45.0);
        assert_eq!(summary.devices[&1].max_util, 55.0);
        assert_eq!(summary.devices[&0].mem_total, 8192.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_carries_sampler_device_kind() {
        let mut collector = TelemetryCollector::new(config(DeviceSelection::All));
        let sampler = Arc::new(MockDeviceSampler::new(1).with_device_kind(DeviceKind::Host));

        collector.start(sampler).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let summary = collector.stop().await;

        assert_eq!(summary.kind, DeviceKind::Host);
        assert_eq!(summary.devices[&0].sample_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_does_not_stop_other_devices() {
        let mut collector = TelemetryCollector::new(config(DeviceSelection::All));
        let sampler = Arc::new(MockDeviceSampler::new(2).with_read_failure(1, 1));

        collector.start(sampler).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let summary = collector.stop().await;

        assert_eq!(summary.devices[&0].sample_count, 3);
        assert_eq!(summary.devices[&1].sample_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_samples_after_stop() {
        let mut collector = TelemetryCollector::new(config(DeviceSelection::Devices(vec![0])));
        collector.start(Arc::new(MockDeviceSampler::new(1))).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let summary = collector.stop().await;
        let count = collector.samples().await.len();
        assert_eq!(summary.devices[&0].sample_count, count);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(collector.samples().await.len(), count);
    }

    #[tokio::test]
    async fn test_init_failure_leaves_collector_idle() {
        let mut collector = TelemetryCollector::new(config(DeviceSelection::All));
        let sampler = Arc::new(MockDeviceSampler::new(2).with_init_failure());

        let err = collector.start(sampler).await.unwrap_err();
        assert!(err.disables_monitoring());
        assert_eq!(collector.state(), CollectorState::Idle);
        assert!(collector.stop().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_valid_devices() {
        let mut collector = TelemetryCollector::new(config(DeviceSelection::Devices(vec![5, 6])));
        let err = collector
            .start(Arc::new(MockDeviceSampler::new(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::NoDevices));
    }

    #[tokio::test]
    async fn test_disabled_selection_rejected() {
        let mut collector = TelemetryCollector::new(config(DeviceSelection::Disabled));
        let err = collector
            .start(Arc::new(MockDeviceSampler::new(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_rejected() {
        let mut collector = TelemetryCollector::new(config(DeviceSelection::All));
        collector.start(Arc::new(MockDeviceSampler::new(1))).await.unwrap();
        let err = collector
            .start(Arc::new(MockDeviceSampler::new(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidState(_)));
        collector.stop().await;
    }
}
