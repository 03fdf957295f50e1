//! Configuration management for streambench
//!
//! Provides a layered configuration system that supports YAML files and
//! environment variable overrides on top of built-in defaults.

use crate::metrics::{GoodputThresholds, MetricKind};
use crate::{BenchError, Result};
use bench_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides, e.g. `STREAMBENCH__TRAFFIC__BURSTINESS=0.5`
pub const ENV_PREFIX: &str = "STREAMBENCH";

/// Main configuration structure for a benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Backend identifier, resolved through the backend registry
    pub backend: String,

    /// Target endpoint
    pub endpoint: EndpointConfig,

    /// Arrival process and concurrency
    pub traffic: TrafficConfig,

    /// Statistics to report
    pub metrics: MetricsConfig,

    /// Background device telemetry
    pub telemetry: TelemetryConfig,

    /// Result persistence
    pub output: OutputConfig,

    /// Call the server's start/stop profile hooks around the run
    pub profile: bool,

    /// What happens to in-flight requests when the run is cancelled
    pub cancel_policy: CancelPolicy,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            backend: "mock".to_string(),
            endpoint: EndpointConfig::default(),
            traffic: TrafficConfig::default(),
            metrics: MetricsConfig::default(),
            telemetry: TelemetryConfig::default(),
            output: OutputConfig::default(),
            profile: false,
            cancel_policy: CancelPolicy::Drain,
        }
    }
}

impl BenchConfig {
    /// Load configuration with precedence:
    /// 1. Environment variables (highest)
    /// 2. Configuration file, when given
    /// 3. Defaults (lowest)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("metrics.percentile_metrics")
                .with_list_parse_key("metrics.metric_percentiles")
                .with_list_parse_key("metrics.goodput")
                .with_list_parse_key("endpoint.lora_modules"),
        );

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Load configuration from a specific file, without environment overrides
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path));

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Save configuration to a YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.backend.trim().is_empty() {
            return Err(BenchError::config("backend must not be empty"));
        }

        self.endpoint.validate()?;
        self.traffic.validate()?;
        self.metrics.validate()?;
        self.output.validate()?;
        self.telemetry.validate().map_err(BenchError::Configuration)?;

        Ok(())
    }
}

/// Target endpoint and per-request options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Server base URL; overrides host and port when set
    pub base_url: Option<String>,

    pub host: String,

    pub port: u16,

    /// API path appended to the base URL
    pub endpoint: String,

    /// Model id sent with each request
    pub model: String,

    /// Model name used by the API, defaults to `model`
    pub served_model_name: Option<String>,

    /// Logprobs per token to request
    pub logprobs: Option<u32>,

    /// Ask the server to ignore end-of-sequence tokens
    pub ignore_eos: bool,

    /// LoRA modules; each request picks one at random
    pub lora_modules: Vec<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            // 127.0.0.1 rather than localhost to force IPv4
            host: "127.0.0.1".to_string(),
            port: 8000,
            endpoint: "/v1/completions".to_string(),
            model: "test-model".to_string(),
            served_model_name: None,
            logprobs: None,
            ignore_eos: false,
            lora_modules: Vec::new(),
        }
    }
}

impl EndpointConfig {
    /// Base URL of the server
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }

    /// Full URL requests are sent to
    pub fn api_url(&self) -> String {
        format!("{}{}", self.base_url(), self.endpoint)
    }

    /// Model name used by the API
    pub fn model_name(&self) -> &str {
        self.served_model_name.as_deref().unwrap_or(&self.model)
    }

    fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(BenchError::config("endpoint.model must not be empty"));
        }
        if self.base_url.is_none() && self.host.trim().is_empty() {
            return Err(BenchError::config("either endpoint.base_url or endpoint.host is required"));
        }
        if self.lora_modules.iter().any(|m| m.trim().is_empty()) {
            return Err(BenchError::config("LoRA module names must not be empty"));
        }
        Ok(())
    }
}

/// Target request rate
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RequestRate {
    /// Release every request immediately
    #[default]
    Unbounded,
    /// Requests per second
    PerSecond(f64),
}

impl RequestRate {
    pub fn is_unbounded(&self) -> bool {
        matches!(self, RequestRate::Unbounded)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            RequestRate::Unbounded => Ok(()),
            RequestRate::PerSecond(rate) if rate.is_finite() && *rate > 0.0 => Ok(()),
            RequestRate::PerSecond(rate) => Err(BenchError::InvalidRequestRate(format!(
                "{} (expected a positive number or 'inf')",
                rate
            ))),
        }
    }
}

impl From<f64> for RequestRate {
    fn from(rate: f64) -> Self {
        if rate.is_infinite() && rate > 0.0 {
            RequestRate::Unbounded
        } else {
            RequestRate::PerSecond(rate)
        }
    }
}

impl FromStr for RequestRate {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("inf") || s.eq_ignore_ascii_case("infinity") {
            return Ok(RequestRate::Unbounded);
        }
        let rate: f64 = s
            .parse()
            .map_err(|_| BenchError::InvalidRequestRate(s.to_string()))?;
        let rate = RequestRate::from(rate);
        rate.validate()?;
        Ok(rate)
    }
}

impl fmt::Display for RequestRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestRate::Unbounded => write!(f, "inf"),
            RequestRate::PerSecond(rate) => write!(f, "{}", rate),
        }
    }
}

impl Serialize for RequestRate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            RequestRate::Unbounded => serializer.serialize_str("inf"),
            RequestRate::PerSecond(rate) => serializer.serialize_f64(*rate),
        }
    }
}

impl<'de> Deserialize<'de> for RequestRate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(rate) => Ok(RequestRate::from(rate)),
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Arrival process and concurrency settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Requests per second, or `inf` to send everything at once
    pub request_rate: RequestRate,

    /// Gamma shape of inter-arrival times; 1.0 is a Poisson process
    pub burstiness: f64,

    /// Maximum number of in-flight requests
    pub max_concurrency: Option<usize>,

    /// Seed for arrival sampling and LoRA selection
    pub seed: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            request_rate: RequestRate::Unbounded,
            burstiness: 1.0,
            max_concurrency: None,
            seed: 0,
        }
    }
}

impl TrafficConfig {
    fn validate(&self) -> Result<()> {
        self.request_rate.validate()?;
        if !(self.burstiness.is_finite() && self.burstiness > 0.0) {
            return Err(BenchError::InvalidBurstiness(self.burstiness));
        }
        if self.max_concurrency == Some(0) {
            return Err(BenchError::config("max_concurrency must be a positive integer"));
        }
        Ok(())
    }
}

/// Reported statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Metrics to report percentiles for
    pub percentile_metrics: Vec<MetricKind>,

    /// Percentiles to report, in [0, 100]
    pub metric_percentiles: Vec<f64>,

    /// Goodput objectives as `name:value_ms` pairs
    pub goodput: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            percentile_metrics: vec![MetricKind::Ttft, MetricKind::Tpot, MetricKind::Itl],
            metric_percentiles: vec![99.0],
            goodput: Vec::new(),
        }
    }
}

impl MetricsConfig {
    /// Parsed goodput thresholds, `None` when no objectives are configured
    pub fn goodput_thresholds(&self) -> Result<Option<GoodputThresholds>> {
        if self.goodput.is_empty() {
            return Ok(None);
        }
        GoodputThresholds::parse(&self.goodput).map(Some)
    }

    fn validate(&self) -> Result<()> {
        if let Some(p) = self
            .metric_percentiles
            .iter()
            .find(|p| !(p.is_finite() && (0.0..=100.0).contains(*p)))
        {
            return Err(BenchError::config(format!(
                "percentile {} is outside [0, 100]",
                p
            )));
        }
        self.goodput_thresholds()?;
        Ok(())
    }
}

/// Result persistence settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write the results to a JSON file
    pub save_result: bool,

    /// Include per-request arrays in the saved results
    pub save_detailed: bool,

    /// Directory for result files
    pub result_dir: Option<PathBuf>,

    /// Explicit result file name
    pub result_filename: Option<String>,

    /// `KEY=VALUE` pairs recorded alongside the results
    pub metadata: Vec<String>,

    /// Hide the completion progress bar
    pub disable_progress: bool,
}

impl OutputConfig {
    /// Parsed metadata pairs
    pub fn metadata_pairs(&self) -> Result<Vec<(String, String)>> {
        self.metadata
            .iter()
            .map(|item| match item.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Ok((key.trim().to_string(), value.trim().to_string()))
                }
                _ => Err(BenchError::config(format!(
                    "Invalid metadata '{}'. Please use KEY=VALUE format.",
                    item
                ))),
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        self.metadata_pairs().map(|_| ())
    }
}

/// Handling of already-dispatched requests when a run is cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelPolicy {
    /// Let in-flight requests finish
    #[default]
    Drain,
    /// Abort in-flight requests and record them as failed
    Abandon,
}
