//! Result persistence

use anyhow::{Context, Result};
use bench_core::{BenchConfig, BenchmarkResult, RequestRate};
use chrono::{DateTime, Local};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

/// Default file name: `{backend}-{rate}qps[-concurrency{N}]-{model}-{timestamp}.json`
pub fn result_filename(config: &BenchConfig, now: &DateTime<Local>) -> String {
    let concurrency = config
        .traffic
        .max_concurrency
        .map(|n| format!("-concurrency{}", n))
        .unwrap_or_default();
    let model = config
        .endpoint
        .model
        .rsplit('/')
        .next()
        .unwrap_or(&config.endpoint.model);

    format!(
        "{}-{}qps{}-{}-{}.json",
        config.backend,
        config.traffic.request_rate,
        concurrency,
        model,
        now.format("%Y%m%d-%H%M%S")
    )
}

/// Run parameters and metadata merged with the result record
pub fn build_record(
    config: &BenchConfig,
    result: &BenchmarkResult,
    num_prompts: usize,
    now: &DateTime<Local>,
) -> Result<Value> {
    let mut record = serde_json::Map::new();

    record.insert("date".into(), json!(now.format("%Y%m%d-%H%M%S").to_string()));
    record.insert("backend".into(), json!(config.backend));
    record.insert("model_id".into(), json!(config.endpoint.model));
    record.insert("num_prompts".into(), json!(num_prompts));

    for (key, value) in config.output.metadata_pairs()? {
        record.insert(key, json!(value));
    }

    let request_rate = match config.traffic.request_rate {
        RequestRate::Unbounded => json!("inf"),
        RequestRate::PerSecond(rate) => json!(rate),
    };
    record.insert("request_rate".into(), request_rate);
    record.insert("burstiness".into(), json!(config.traffic.burstiness));
    record.insert("max_concurrency".into(), json!(config.traffic.max_concurrency));

    if let Value::Object(fields) = result.to_record(config.output.save_detailed) {
        record.extend(fields);
    }

    Ok(Value::Object(record))
}

/// Write the result file and return its path
pub fn save_result(
    config: &BenchConfig,
    result: &BenchmarkResult,
    num_prompts: usize,
) -> Result<PathBuf> {
    let now = Local::now();
    let record = build_record(config, result, num_prompts, &now)?;

    let filename = config
        .output
        .result_filename
        .clone()
        .unwrap_or_else(|| result_filename(config, &now));
    let path = match &config.output.result_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create result directory {}", dir.display()))?;
            dir.join(filename)
        }
        None => PathBuf::from(filename),
    };

    let content = serde_json::to_string_pretty(&record)?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write results to {}", path.display()))?;

    info!("Results saved to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::{PhaseStats, RequestDetails, RunReport};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    fn result() -> BenchmarkResult {
        BenchmarkResult {
            report: RunReport {
                duration_s: 1.0,
                total_requests: 1,
                completed: 1,
                failed: 0,
                total_input: 4,
                total_output: 8,
                request_throughput: 1.0,
                request_goodput: None,
                output_throughput: 8.0,
                total_token_throughput: 12.0,
                ttft: PhaseStats::default(),
                tpot: PhaseStats::default(),
                itl: PhaseStats::default(),
                e2el: PhaseStats::default(),
                selected_metrics: Vec::new(),
                percentiles: vec![99.0],
                warnings: Vec::new(),
            },
            details: RequestDetails {
                input_lens: vec![4],
                output_lens: vec![8],
                ttfts: vec![Some(0.05)],
                itls: vec![vec![0.01; 7]],
                generated_texts: vec!["out".to_string()],
                errors: vec![String::new()],
            },
            telemetry: None,
            cancelled: false,
        }
    }

    #[test]
    fn test_result_filename() {
        let mut config = BenchConfig::default();
        config.backend = "vllm".to_string();
        config.endpoint.model = "meta-llama/Llama-3.1-8B".to_string();
        assert_eq!(
            result_filename(&config, &fixed_time()),
            "vllm-infqps-Llama-3.1-8B-20240309-140507.json"
        );

        config.traffic.request_rate = RequestRate::PerSecond(2.5);
        config.traffic.max_concurrency = Some(8);
        assert_eq!(
            result_filename(&config, &fixed_time()),
            "vllm-2.5qps-concurrency8-Llama-3.1-8B-20240309-140507.json"
        );
    }

    #[test]
    fn test_record_merges_run_parameters() {
        let mut config = BenchConfig::default();
        config.output.metadata = vec!["gpu=H100".to_string()];

        let record = build_record(&config, &result(), 1, &fixed_time()).unwrap();
        assert_eq!(record["date"], "20240309-140507");
        assert_eq!(record["request_rate"], "inf");
        assert_eq!(record["max_concurrency"], Value::Null);
        assert_eq!(record["gpu"], "H100");
        assert_eq!(record["completed"], 1);
        assert!(record.get("generated_texts").is_none());

        config.output.save_detailed = true;
        let record = build_record(&config, &result(), 1, &fixed_time()).unwrap();
        assert_eq!(record["generated_texts"], json!(["out"]));
    }

    #[test]
    fn test_save_result_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = BenchConfig::default();
        config.output.result_dir = Some(temp_dir.path().join("nested"));
        config.output.result_filename = Some("run.json".to_string());

        let path = save_result(&config, &result(), 1).unwrap();
        assert_eq!(path, temp_dir.path().join("nested").join("run.json"));

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["backend"], "mock");
        assert_eq!(saved["total_output_tokens"], 8);
    }
}
