//! Mock executor for testing and dry runs

use crate::executor::{ExecutionInput, RequestExecutor};
use crate::request::RequestOutcome;

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Simulated service behaviour
#[derive(Debug, Clone)]
pub struct MockExecutorConfig {
    /// Delay before the first token
    pub ttft: Duration,
    /// Delay between subsequent tokens
    pub token_latency: Duration,
    /// Probability in [0, 1] that a call fails
    pub failure_rate: f64,
    /// Report the output token count instead of leaving it to re-tokenization
    pub report_output_tokens: bool,
    /// Keep the URL of every call, see [`MockExecutor::urls`]
    pub record_urls: bool,
    pub seed: u64,
}

impl Default for MockExecutorConfig {
    fn default() -> Self {
        Self {
            ttft: Duration::from_millis(50),
            token_latency: Duration::from_millis(10),
            failure_rate: 0.0,
            report_output_tokens: true,
            record_urls: false,
            seed: 0,
        }
    }
}

/// Executor that streams whitespace-separated tokens after fixed delays
pub struct MockExecutor {
    config: MockExecutorConfig,
    rng: Mutex<SmallRng>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new(config: MockExecutorConfig) -> Self {
        let rng = SmallRng::seed_from_u64(config.seed);
        Self {
            config,
            rng: Mutex::new(rng),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Executor whose every call fails
    pub fn failing() -> Self {
        Self::new(MockExecutorConfig {
            failure_rate: 1.0,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &MockExecutorConfig {
        &self.config
    }

    /// Number of calls made so far, warm-up included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// URLs called, in call order; empty unless `record_urls` is set
    pub async fn urls(&self) -> Vec<String> {
        self.urls.lock().await.clone()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new(MockExecutorConfig::default())
    }
}

#[async_trait]
impl RequestExecutor for MockExecutor {
    fn backend(&self) -> &str {
        "mock"
    }

    async fn execute(&self, input: &ExecutionInput) -> RequestOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.config.record_urls {
            self.urls.lock().await.push(input.api_url.clone());
        }

        let fails = {
            let mut rng = self.rng.lock().await;
            rng.gen_bool(self.config.failure_rate.clamp(0.0, 1.0))
        };

        let start = Instant::now();
        tokio::time::sleep(self.config.ttft).await;
        if fails {
            debug!(call, "Mock request failed");
            return RequestOutcome::failure(input.prompt_len, "mock failure: service unavailable");
        }
        let ttft = start.elapsed();

        let tokens = input.output_len.max(1);
        let mut itl = Vec::with_capacity(tokens - 1);
        let mut last = Instant::now();
        for _ in 1..tokens {
            tokio::time::sleep(self.config.token_latency).await;
            let now = Instant::now();
            itl.push(now - last);
            last = now;
        }

        let text = vec!["tok"; tokens].join(" ");
        let reported = self.config.report_output_tokens.then_some(tokens);

        RequestOutcome::success(input.prompt_len, start.elapsed())
            .with_ttft(ttft)
            .with_itl(itl)
            .with_output(text, reported)
    }
}

/// Setup test logging with appropriate levels
pub fn setup_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bench_core=debug,bench_telemetry=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use crate::request::Request;

    fn input(output_len: usize) -> ExecutionInput {
        ExecutionInput::from_request(&Request::new("hello", 1, output_len), &EndpointConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_requested_tokens() {
        let executor = MockExecutor::default();
        let outcome = executor.execute(&input(5)).await;

        assert!(outcome.success);
        assert_eq!(outcome.ttft, Some(Duration::from_millis(50)));
        assert_eq!(outcome.itl, vec![Duration::from_millis(10); 4]);
        assert_eq!(outcome.latency, Duration::from_millis(90));
        assert_eq!(outcome.output_tokens, Some(5));
        assert_eq!(outcome.generated_text.split_whitespace().count(), 5);
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_executor() {
        let executor = MockExecutor::failing();
        let outcome = executor.execute(&input(5)).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("mock failure"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_urls_recorded_only_on_request() {
        let executor = MockExecutor::default();
        for _ in 0..3 {
            executor.execute(&input(1)).await;
        }
        assert_eq!(executor.calls(), 3);
        assert!(executor.urls().await.is_empty());

        let executor = MockExecutor::new(MockExecutorConfig {
            record_urls: true,
            ..Default::default()
        });
        executor.execute(&input(1)).await;
        assert_eq!(executor.urls().await, vec!["http://127.0.0.1:8000/v1/completions"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreported_output_tokens() {
        let executor = MockExecutor::new(MockExecutorConfig {
            report_output_tokens: false,
            ..Default::default()
        });
        let outcome = executor.execute(&input(3)).await;
        assert_eq!(outcome.output_tokens, None);
        assert_eq!(outcome.generated_text, "tok tok tok");
    }
}
