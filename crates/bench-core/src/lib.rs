//! # bench-core
//!
//! Load generation and measurement for streaming request/response services.
//!
//! This crate provides:
//! - An arrival scheduler releasing requests on a Poisson/Gamma process
//! - A concurrency governor bounding in-flight dispatches
//! - The execution contract an external request executor must satisfy
//! - Latency/throughput aggregation with percentiles and goodput
//! - A runner tying these together with optional device telemetry
//!
//! ## Example
//!
//! ```rust,no_run
//! use bench_core::{BackendRegistry, BenchConfig, BenchmarkRunner, Request, WhitespaceTokenCounter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BenchConfig::load_from_file("streambench.yaml")?;
//!     let executor = BackendRegistry::with_defaults().resolve(&config.backend, &config.endpoint)?;
//!
//!     let runner = BenchmarkRunner::new(config, executor, Arc::new(WhitespaceTokenCounter));
//!     let requests = vec![Request::new("Hello", 1, 16)];
//!     let result = runner.run(requests).await?;
//!     println!("{}", result.render_summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod governor;
pub mod metrics;
pub mod report;
pub mod request;
pub mod runner;
pub mod scheduler;

// Mock collaborators for testing and dry runs
#[cfg(any(feature = "mock", test))]
pub mod mock;

// Re-export commonly used types
pub use config::{
    BenchConfig, CancelPolicy, EndpointConfig, MetricsConfig, OutputConfig, RequestRate,
    TrafficConfig,
};
pub use error::{BenchError, Result};
pub use executor::{
    BackendRegistry, ExecutionInput, RequestExecutor, TokenCounter, WhitespaceTokenCounter,
};
pub use governor::ConcurrencyGovernor;
pub use metrics::{GoodputThresholds, MetricKind, MetricsAggregator, SloMetric};
pub use report::{BenchmarkResult, PhaseStats, RequestDetails, RunReport};
pub use request::{Request, RequestOutcome};
pub use runner::BenchmarkRunner;
pub use scheduler::{ArrivalScheduler, Release};
