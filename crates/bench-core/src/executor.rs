//! Request execution contract
//!
//! The harness never talks to a service itself. A [`RequestExecutor`] performs
//! one streaming call and reports timings in a [`RequestOutcome`]; backends are
//! looked up by name in a [`BackendRegistry`] once at startup.

use crate::config::EndpointConfig;
use crate::request::{Request, RequestOutcome};
use crate::{BenchError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Everything an executor needs to issue one call
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionInput {
    /// Model id sent with the request
    pub model: String,
    /// Model name used by the API
    pub model_name: String,
    pub api_url: String,
    pub prompt: String,
    pub prompt_len: usize,
    pub output_len: usize,
    pub logprobs: Option<u32>,
    pub multi_modal_content: Option<serde_json::Value>,
    pub ignore_eos: bool,
}

impl ExecutionInput {
    /// Build the call input for `request` against `endpoint`
    pub fn from_request(request: &Request, endpoint: &EndpointConfig) -> Self {
        Self {
            model: endpoint.model.clone(),
            model_name: endpoint.model_name().to_string(),
            api_url: endpoint.api_url(),
            prompt: request.prompt.clone(),
            prompt_len: request.prompt_len,
            output_len: request.expected_output_len,
            logprobs: endpoint.logprobs,
            multi_modal_content: request.multi_modal_data.clone(),
            ignore_eos: endpoint.ignore_eos,
        }
    }

    /// Target a LoRA module: it becomes both the model id and the model name
    pub fn with_lora(mut self, module: &str) -> Self {
        self.model = module.to_string();
        self.model_name = module.to_string();
        self
    }

    /// Point the call at a different URL, keeping the payload
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

/// Performs a single streaming request.
///
/// Implementations must produce exactly one outcome per call, never panic on
/// transport errors, and report failures through `success = false` with an
/// error description. Timing fields of a successful outcome must satisfy
/// `ttft <= latency` and `ttft + sum(itl) <= latency` up to clock precision.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Backend identifier
    fn backend(&self) -> &str;

    async fn execute(&self, input: &ExecutionInput) -> RequestOutcome;
}

/// Counts tokens in generated text when the service doesn't report them
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Whitespace-separated word count, an approximation of a real tokenizer
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenCounter;

impl TokenCounter for WhitespaceTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

type ExecutorFactory =
    Arc<dyn Fn(&EndpointConfig) -> Result<Arc<dyn RequestExecutor>> + Send + Sync>;

/// Name to executor factory mapping
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, ExecutorFactory>,
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in backends
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(any(feature = "mock", test))]
        registry.register("mock", |_endpoint| {
            Ok(Arc::new(crate::mock::MockExecutor::default()) as Arc<dyn RequestExecutor>)
        });

        registry
    }

    /// Register or replace a backend
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&EndpointConfig) -> Result<Arc<dyn RequestExecutor>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered backend names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the executor registered under `name`
    pub fn resolve(&self, name: &str, endpoint: &EndpointConfig) -> Result<Arc<dyn RequestExecutor>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| BenchError::UnknownBackend(name.to_string()))?;
        factory(endpoint)
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct EchoExecutor;

    #[async_trait]
    impl RequestExecutor for EchoExecutor {
        fn backend(&self) -> &str {
            "echo"
        }

        async fn execute(&self, input: &ExecutionInput) -> RequestOutcome {
            RequestOutcome::success(input.prompt_len, Duration::from_millis(1))
                .with_output(input.prompt.clone(), None)
        }
    }

    #[test]
    fn test_whitespace_counter() {
        let counter = WhitespaceTokenCounter;
        assert_eq!(counter.count("the quick  brown\nfox"), 4);
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("   "), 0);
    }

    #[test]
    fn test_execution_input_from_request() {
        let endpoint = EndpointConfig {
            served_model_name: Some("served".to_string()),
            logprobs: Some(5),
            ignore_eos: true,
            ..Default::default()
        };
        let request = Request::new("hello", 1, 32).with_multi_modal(serde_json::json!({"type": "image_url"}));

        let input = ExecutionInput::from_request(&request, &endpoint);
        assert_eq!(input.model, "test-model");
        assert_eq!(input.model_name, "served");
        assert_eq!(input.api_url, "http://127.0.0.1:8000/v1/completions");
        assert_eq!(input.output_len, 32);
        assert_eq!(input.logprobs, Some(5));
        assert!(input.ignore_eos);
        assert!(input.multi_modal_content.is_some());

        let lora = input.with_lora("sql-lora");
        assert_eq!(lora.model, "sql-lora");
        assert_eq!(lora.model_name, "sql-lora");
    }

    #[tokio::test]
    async fn test_registry_resolves_registered_backend() {
        let mut registry = BackendRegistry::new();
        registry.register("echo", |_| Ok(Arc::new(EchoExecutor) as Arc<dyn RequestExecutor>));

        let endpoint = EndpointConfig::default();
        let executor = registry.resolve("echo", &endpoint).unwrap();
        assert_eq!(executor.backend(), "echo");

        let input = ExecutionInput::from_request(&Request::new("a b c", 3, 4), &endpoint);
        let outcome = executor.execute(&input).await;
        assert!(outcome.success);
        assert_eq!(outcome.generated_text, "a b c");
    }

    #[test]
    fn test_unknown_backend() {
        let registry = BackendRegistry::with_defaults();
        assert!(registry.contains("mock"));

        let err = registry
            .resolve("tensorrt-llm", &EndpointConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, BenchError::UnknownBackend(ref name) if name == "tensorrt-llm"));
        assert!(err.is_configuration());
    }
}
