//! Request and outcome types exchanged with the executor

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single unit of benchmark work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Prompt text sent to the service
    pub prompt: String,

    /// Prompt length in tokens
    pub prompt_len: usize,

    /// Target output length in tokens
    pub expected_output_len: usize,

    /// Optional multi-modal payload, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_modal_data: Option<serde_json::Value>,
}

impl Request {
    pub fn new(prompt: impl Into<String>, prompt_len: usize, expected_output_len: usize) -> Self {
        Self {
            prompt: prompt.into(),
            prompt_len,
            expected_output_len,
            multi_modal_data: None,
        }
    }

    pub fn with_multi_modal(mut self, data: serde_json::Value) -> Self {
        self.multi_modal_data = Some(data);
        self
    }
}

/// Result of one dispatched request, produced exactly once by the executor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOutcome {
    pub success: bool,

    /// Failure description when `success` is false
    pub error: Option<String>,

    /// Text returned by the service
    pub generated_text: String,

    /// Time from call initiation to the first streamed token
    pub ttft: Option<Duration>,

    /// Gaps between consecutive tokens after the first
    pub itl: Vec<Duration>,

    /// Total request duration
    pub latency: Duration,

    /// Output token count, when the service reports it
    pub output_tokens: Option<usize>,

    /// Prompt length in tokens, echoed from the request
    pub prompt_len: usize,
}

impl RequestOutcome {
    /// A failed outcome carrying `error`
    pub fn failure(prompt_len: usize, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            prompt_len,
            ..Default::default()
        }
    }

    /// A successful outcome; token timings are filled in by the caller
    pub fn success(prompt_len: usize, latency: Duration) -> Self {
        Self {
            success: true,
            latency,
            prompt_len,
            ..Default::default()
        }
    }

    pub fn with_ttft(mut self, ttft: Duration) -> Self {
        self.ttft = Some(ttft);
        self
    }

    pub fn with_itl(mut self, itl: Vec<Duration>) -> Self {
        self.itl = itl;
        self
    }

    pub fn with_output(mut self, text: impl Into<String>, output_tokens: Option<usize>) -> Self {
        self.generated_text = text.into();
        self.output_tokens = output_tokens;
        self
    }
}
