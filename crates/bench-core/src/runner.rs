//! Benchmark runner
//!
//! Drives one run: warm-up probe, optional profiling and telemetry, paced
//! dispatch under the concurrency limit, collection of every outcome and
//! aggregation into a [`BenchmarkResult`].

use crate::config::{BenchConfig, CancelPolicy};
use crate::executor::{ExecutionInput, RequestExecutor, TokenCounter};
use crate::governor::ConcurrencyGovernor;
use crate::metrics::MetricsAggregator;
use crate::report::{BenchmarkResult, RequestDetails};
use crate::request::{Request, RequestOutcome};
use crate::scheduler::ArrivalScheduler;
use crate::{BenchError, Result};

use bench_telemetry::{create_sampler, DeviceSampler, TelemetryCollector, TelemetrySummary};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Error recorded for in-flight requests aborted by a cancelled run
pub const ABANDONED_ERROR: &str = "abandoned: run cancelled";

/// Runs a benchmark against one executor
pub struct BenchmarkRunner {
    config: BenchConfig,
    executor: Arc<dyn RequestExecutor>,
    token_counter: Arc<dyn TokenCounter>,
    sampler: Option<Arc<dyn DeviceSampler>>,
    progress: Option<ProgressBar>,
}

impl BenchmarkRunner {
    pub fn new(
        config: BenchConfig,
        executor: Arc<dyn RequestExecutor>,
        token_counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            config,
            executor,
            token_counter,
            sampler: None,
            progress: None,
        }
    }

    /// Use `sampler` for telemetry instead of the configured backend
    pub fn with_sampler(mut self, sampler: Arc<dyn DeviceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Report completions on `bar` instead of a bar built from the output settings
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Run every request to completion
    pub async fn run(&self, requests: Vec<Request>) -> Result<BenchmarkResult> {
        self.run_until(requests, std::future::pending()).await
    }

    /// Run until all requests are done or `shutdown` resolves.
    ///
    /// On shutdown no further requests are released. Requests already in
    /// flight finish or are abandoned according to the cancel policy, and the
    /// report covers exactly the released requests.
    pub async fn run_until<F>(&self, requests: Vec<Request>, shutdown: F) -> Result<BenchmarkResult>
    where
        F: Future<Output = ()>,
    {
        // Everything that can be rejected is rejected before the first call
        self.config.validate()?;
        if requests.is_empty() {
            return Err(BenchError::config("no requests to run"));
        }
        let aggregator = MetricsAggregator::from_config(&self.config.metrics)?;
        let governor = ConcurrencyGovernor::new(self.config.traffic.max_concurrency)?;
        let traffic = &self.config.traffic;
        let mut scheduler = ArrivalScheduler::new(
            0..requests.len(),
            traffic.request_rate,
            traffic.burstiness,
            traffic.seed,
        )?;

        let endpoint = &self.config.endpoint;
        let probe = ExecutionInput::from_request(&requests[0], endpoint);
        self.warm_up(&probe).await?;

        if self.config.profile {
            self.profile_hook(&probe, "start_profile").await;
        }

        let mut collector = TelemetryCollector::new(self.config.telemetry.clone());
        let monitoring = self.start_telemetry(&mut collector).await;

        info!("Traffic request rate: {}", traffic.request_rate);
        info!(
            "Burstiness factor: {} ({})",
            traffic.burstiness,
            if traffic.burstiness == 1.0 { "Poisson process" } else { "Gamma distribution" }
        );
        info!("Maximum request concurrency: {:?}", traffic.max_concurrency);

        let lora_modules = &endpoint.lora_modules;
        let mut lora_rng = SmallRng::seed_from_u64(traffic.seed);
        let mut handles: Vec<JoinHandle<RequestOutcome>> = Vec::with_capacity(requests.len());
        let mut cancelled = false;
        let progress = self.progress_bar(requests.len() as u64);
        tokio::pin!(shutdown);

        let benchmark_start = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!("Run cancelled after releasing {} of {} requests", handles.len(), requests.len());
                    cancelled = true;
                    break;
                }
                release = scheduler.next_release() => {
                    let Some(release) = release else { break };
                    debug!(index = release.index, offset_ms = release.offset.as_millis() as u64, "Releasing request");

                    let mut input = ExecutionInput::from_request(&requests[release.item], endpoint);
                    if !lora_modules.is_empty() {
                        let module = &lora_modules[lora_rng.gen_range(0..lora_modules.len())];
                        input = input.with_lora(module);
                    }

                    let executor = Arc::clone(&self.executor);
                    let governor = governor.clone();
                    let progress = progress.clone();
                    handles.push(tokio::spawn(async move {
                        let outcome = governor.run(executor.execute(&input)).await;
                        progress.inc(1);
                        outcome
                    }));
                }
            }
        }

        let abandon = self.config.cancel_policy == CancelPolicy::Abandon;
        let mut outcomes = Vec::with_capacity(handles.len());
        for (index, mut handle) in handles.into_iter().enumerate() {
            if cancelled && abandon {
                handle.abort();
            }

            let joined = if abandon && !cancelled {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        warn!("Run cancelled; abandoning in-flight requests");
                        cancelled = true;
                        handle.abort();
                        (&mut handle).await
                    }
                    joined = &mut handle => joined,
                }
            } else {
                handle.await
            };

            let prompt_len = requests[index].prompt_len;
            outcomes.push(match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => RequestOutcome::failure(prompt_len, ABANDONED_ERROR),
                Err(e) => {
                    warn!("Dispatch task for request {} failed: {}", index, e);
                    RequestOutcome::failure(prompt_len, format!("dispatch task failed: {}", e))
                }
            });
        }
        let duration = benchmark_start.elapsed();
        if cancelled {
            progress.abandon();
        } else {
            progress.finish();
        }

        let telemetry = if monitoring {
            Some(collector.stop().await).filter(|summary: &TelemetrySummary| !summary.is_empty())
        } else {
            None
        };

        if self.config.profile {
            self.profile_hook(&probe, "stop_profile").await;
        }

        let released = &requests[..outcomes.len()];
        let (report, output_lens) =
            aggregator.aggregate(released, &outcomes, duration, self.token_counter.as_ref())?;
        let details = RequestDetails::new(released, &outcomes, output_lens);

        info!(
            "Benchmark finished: {} of {} requests succeeded in {:.2}s",
            report.completed, report.total_requests, report.duration_s
        );

        Ok(BenchmarkResult {
            report,
            details,
            telemetry,
            cancelled,
        })
    }

    /// Completion bar over `total` requests; hidden when progress output is disabled
    fn progress_bar(&self, total: u64) -> ProgressBar {
        if let Some(bar) = &self.progress {
            bar.set_length(total);
            return bar.clone();
        }
        if self.config.output.disable_progress {
            return ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::hidden());
        }

        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
            )
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    }

    /// Untimed single request; a failure means the endpoint is unusable
    async fn warm_up(&self, probe: &ExecutionInput) -> Result<()> {
        info!("Starting initial single prompt test run...");
        let outcome = self.executor.execute(probe).await;
        if !outcome.success {
            let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(BenchError::WarmupFailed(error));
        }
        info!("Initial test run completed. Starting main benchmark run...");
        Ok(())
    }

    async fn profile_hook(&self, probe: &ExecutionInput, hook: &str) {
        let url = format!("{}/{}", self.config.endpoint.base_url(), hook);
        let outcome = self.executor.execute(&probe.clone().with_api_url(url)).await;
        if outcome.success {
            info!("Profiler hook {} succeeded", hook);
        } else {
            warn!(
                "Profiler hook {} failed: {}",
                hook,
                outcome.error.unwrap_or_default()
            );
        }
    }

    /// Start monitoring if requested; returns whether it is running
    async fn start_telemetry(&self, collector: &mut TelemetryCollector) -> bool {
        if !self.config.telemetry.devices.is_enabled() {
            return false;
        }

        let sampler = match &self.sampler {
            Some(sampler) => Ok(Arc::clone(sampler)),
            None => create_sampler(&self.config.telemetry),
        };

        match sampler {
            Ok(sampler) => match collector.start(sampler).await {
                Ok(_) => true,
                Err(e) => {
                    warn!("Device monitoring disabled: {}", e);
                    false
                }
            },
            Err(e) => {
                warn!("Device monitoring disabled: {}", e);
                false
            }
        }
    }
}
