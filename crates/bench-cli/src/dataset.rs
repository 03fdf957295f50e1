//! JSONL request datasets
//!
//! One request per line:
//! `{"prompt": "...", "prompt_len": 12, "expected_output_len": 128}` with an
//! optional `multi_modal_data` object. Blank lines are skipped.

use anyhow::{bail, Context, Result};
use bench_core::Request;
use std::path::Path;
use tracing::info;

/// Load requests from `path`, keeping at most `num_prompts` of them
pub fn load_requests(path: &Path, num_prompts: Option<usize>) -> Result<Vec<Request>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset {}", path.display()))?;

    let limit = num_prompts.unwrap_or(usize::MAX);
    let mut requests = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if requests.len() >= limit {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request: Request = serde_json::from_str(line).with_context(|| {
            format!("Invalid request at {}:{}", path.display(), line_no + 1)
        })?;
        requests.push(request);
    }

    if requests.is_empty() {
        bail!("Dataset {} contains no requests", path.display());
    }
    if let Some(wanted) = num_prompts {
        if requests.len() < wanted {
            bail!(
                "Dataset {} holds {} requests but {} were requested",
                path.display(),
                requests.len(),
                wanted
            );
        }
    }

    info!("Loaded {} requests from {}", requests.len(), path.display());
    Ok(requests)
}
