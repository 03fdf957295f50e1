//! Telemetry collection configuration

use crate::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default sampling cadence
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_secs(1);

/// Telemetry sampler backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerBackend {
    /// Host CPU and memory via sysinfo
    Host,
    /// NVIDIA GPUs via NVML
    Nvml,
    /// Mock backend for testing
    Mock,
}

impl fmt::Display for SamplerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerBackend::Host => write!(f, "host"),
            SamplerBackend::Nvml => write!(f, "nvml"),
            SamplerBackend::Mock => write!(f, "mock"),
        }
    }
}

impl FromStr for SamplerBackend {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "host" => Ok(SamplerBackend::Host),
            "nvml" => Ok(SamplerBackend::Nvml),
            "mock" => Ok(SamplerBackend::Mock),
            other => Err(TelemetryError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Which devices to sample during a run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelection {
    /// Telemetry disabled for the run
    #[default]
    Disabled,
    /// Every discovered device
    All,
    /// A specific set of device ids
    Devices(Vec<u32>),
}

impl DeviceSelection {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, DeviceSelection::Disabled)
    }

    /// Resolve the selection against the number of devices present.
    ///
    /// Ids outside `0..device_count` are dropped; the result is sorted and
    /// deduplicated.
    pub fn resolve(&self, device_count: u32) -> Vec<u32> {
        let mut ids: Vec<u32> = match self {
            DeviceSelection::Disabled => Vec::new(),
            DeviceSelection::All => (0..device_count).collect(),
            DeviceSelection::Devices(ids) => ids
                .iter()
                .copied()
                .filter(|id| *id < device_count)
                .collect(),
        };
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

impl FromStr for DeviceSelection {
    type Err = TelemetryError;

    /// Parses `-2` (disabled), `-1` (all devices) or a comma separated id list.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "-2" => Ok(DeviceSelection::Disabled),
            "-1" => Ok(DeviceSelection::All),
            list => {
                let ids = list
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| {
                        part.parse::<u32>().map_err(|_| {
                            TelemetryError::Configuration(format!(
                                "Invalid device id '{}'. Use '0' or '0,1,2', '-1' for all devices, '-2' to disable",
                                part
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(DeviceSelection::Devices(ids))
            }
        }
    }
}

impl fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelection::Disabled => write!(f, "-2"),
            DeviceSelection::All => write!(f, "-1"),
            DeviceSelection::Devices(ids) => {
                let parts: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

impl Serialize for DeviceSelection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DeviceSelection {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(i64),
            List(Vec<u32>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Repr::Number(n) => n.to_string().parse().map_err(serde::de::Error::custom),
            Repr::List(ids) => Ok(DeviceSelection::Devices(ids)),
        }
    }
}

/// Telemetry collector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Sampler backend to use
    pub backend: SamplerBackend,

    /// Devices to sample
    pub devices: DeviceSelection,

    /// Sampling cadence
    #[serde(with = "interval_ms")]
    pub sampling_interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            backend: SamplerBackend::Host,
            devices: DeviceSelection::Disabled,
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
        }
    }
}

impl TelemetryConfig {
    /// Create a new telemetry configuration
    pub fn new(backend: SamplerBackend) -> Self {
        Self {
            backend,
            ..Default::default()
        }
    }

    /// Set the device selection
    pub fn with_selection(mut self, devices: DeviceSelection) -> Self {
        self.devices = devices;
        self
    }

    /// Set the sampling interval
    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.sampling_interval.is_zero() {
            return Err("Sampling interval must be greater than 0".to_string());
        }
        Ok(())
    }
}

mod interval_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
