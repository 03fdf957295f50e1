//! Per-device aggregation of telemetry samples

use crate::sampler::{DeviceKind, TelemetrySample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregated readings for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    /// Compute utilization (percentage)
    pub avg_util: f64,
    pub max_util: f64,
    pub avg_mem_util: f64,
    pub max_mem_util: f64,
    pub avg_mem_used: f64,
    pub max_mem_used: f64,
    /// Memory capacity (MB)
    pub mem_total: f64,
    pub sample_count: usize,
}

/// Telemetry summary for a run, keyed by device id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    #[serde(default)]
    pub kind: DeviceKind,
    pub devices: BTreeMap<u32, DeviceSummary>,
}

impl TelemetrySummary {
    /// Aggregate samples per device.
    ///
    /// Devices that produced no samples are left out.
    pub fn from_samples(
        kind: DeviceKind,
        samples: &[TelemetrySample],
        mem_totals: &BTreeMap<u32, f64>,
    ) -> Self {
        let mut grouped: BTreeMap<u32, Vec<&TelemetrySample>> = BTreeMap::new();
        for sample in samples {
            grouped.entry(sample.device_id).or_default().push(sample);
        }

        let devices = grouped
            .into_iter()
            .map(|(device_id, samples)| {
                let util: Vec<f64> = samples.iter().map(|s| s.utilization).collect();
                let mem_util: Vec<f64> = samples.iter().map(|s| s.mem_util).collect();
                let mem_used: Vec<f64> = samples.iter().map(|s| s.mem_used_mb).collect();

                let summary = DeviceSummary {
                    avg_util: mean(&util),
                    max_util: max(&util),
                    avg_mem_util: mean(&mem_util),
                    max_mem_util: max(&mem_util),
                    avg_mem_used: mean(&mem_used),
                    max_mem_used: max(&mem_used),
                    mem_total: mem_totals.get(&device_id).copied().unwrap_or(0.0),
                    sample_count: samples.len(),
                };
                (device_id, summary)
            })
            .collect();

        Self { kind, devices }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn max(values: &[f64]) -> f64 {
    // Readings are non-negative.
    values.iter().copied().fold(0.0, f64::max)
}
