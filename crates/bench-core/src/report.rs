//! Run reports and their persisted/printed forms

use crate::metrics::MetricKind;
use crate::request::{Request, RequestOutcome};
use bench_telemetry::TelemetrySummary;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt::Write as _;

/// Distribution statistics of one latency phase, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_ms: f64,
    /// `(percentile, value)` pairs in the configured order
    pub percentiles_ms: Vec<(f64, f64)>,
    /// Number of values in the series
    pub count: usize,
}

/// Aggregate result of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Wall-clock span of the dispatch phase
    pub duration_s: f64,
    /// Requests released by the scheduler
    pub total_requests: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_input: usize,
    pub total_output: usize,
    pub request_throughput: f64,
    /// Only present when goodput objectives were configured
    pub request_goodput: Option<f64>,
    pub output_throughput: f64,
    pub total_token_throughput: f64,
    pub ttft: PhaseStats,
    pub tpot: PhaseStats,
    pub itl: PhaseStats,
    pub e2el: PhaseStats,
    /// Metrics whose statistics are reported
    pub selected_metrics: Vec<MetricKind>,
    pub percentiles: Vec<f64>,
    /// Conditions that make the numbers suspect, e.g. every request failing
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn phase(&self, metric: MetricKind) -> &PhaseStats {
        match metric {
            MetricKind::Ttft => &self.ttft,
            MetricKind::Tpot => &self.tpot,
            MetricKind::Itl => &self.itl,
            MetricKind::E2el => &self.e2el,
        }
    }

    pub fn all_failed(&self) -> bool {
        self.total_requests > 0 && self.completed == 0
    }
}

/// Per-request raw values, in release order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestDetails {
    pub input_lens: Vec<usize>,
    pub output_lens: Vec<usize>,
    /// Seconds; `None` when no token arrived
    pub ttfts: Vec<Option<f64>>,
    /// Seconds
    pub itls: Vec<Vec<f64>>,
    pub generated_texts: Vec<String>,
    /// Empty for successful requests
    pub errors: Vec<String>,
}

impl RequestDetails {
    pub fn new(requests: &[Request], outcomes: &[RequestOutcome], output_lens: Vec<usize>) -> Self {
        Self {
            input_lens: requests.iter().map(|r| r.prompt_len).collect(),
            output_lens,
            ttfts: outcomes
                .iter()
                .map(|o| o.ttft.map(|t| t.as_secs_f64()))
                .collect(),
            itls: outcomes
                .iter()
                .map(|o| o.itl.iter().map(|d| d.as_secs_f64()).collect())
                .collect(),
            generated_texts: outcomes.iter().map(|o| o.generated_text.clone()).collect(),
            errors: outcomes
                .iter()
                .map(|o| o.error.clone().unwrap_or_default())
                .collect(),
        }
    }
}

/// Everything a run produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub report: RunReport,
    pub details: RequestDetails,
    /// Present when monitoring ran and collected at least one sample
    pub telemetry: Option<TelemetrySummary>,
    /// The run was interrupted before every request was released
    pub cancelled: bool,
}

impl BenchmarkResult {
    /// Flat JSON record for persistence; per-request arrays only when `detailed`
    pub fn to_record(&self, detailed: bool) -> Value {
        let report = &self.report;
        let mut record = Map::new();

        record.insert("duration".into(), json!(report.duration_s));
        record.insert("completed".into(), json!(report.completed));
        record.insert("failed".into(), json!(report.failed));
        record.insert("total_input_tokens".into(), json!(report.total_input));
        record.insert("total_output_tokens".into(), json!(report.total_output));
        record.insert("request_throughput".into(), json!(report.request_throughput));
        if let Some(goodput) = report.request_goodput {
            record.insert("request_goodput".into(), json!(goodput));
        }
        record.insert("output_throughput".into(), json!(report.output_throughput));
        record.insert(
            "total_token_throughput".into(),
            json!(report.total_token_throughput),
        );

        for &metric in &report.selected_metrics {
            let stats = report.phase(metric);
            let name = metric.as_str();
            record.insert(format!("mean_{}_ms", name), json!(stats.mean_ms));
            record.insert(format!("median_{}_ms", name), json!(stats.median_ms));
            record.insert(format!("std_{}_ms", name), json!(stats.std_ms));
            for &(p, value) in &stats.percentiles_ms {
                record.insert(format!("p{}_{}_ms", percentile_label(p), name), json!(value));
            }
        }

        if detailed {
            let details = &self.details;
            record.insert("input_lens".into(), json!(details.input_lens));
            record.insert("output_lens".into(), json!(details.output_lens));
            record.insert("ttfts".into(), json!(details.ttfts));
            record.insert("itls".into(), json!(details.itls));
            record.insert("generated_texts".into(), json!(details.generated_texts));
            record.insert("errors".into(), json!(details.errors));
        }

        if let Some(telemetry) = self.telemetry.as_ref().filter(|t| !t.is_empty()) {
            let kind = telemetry.kind;
            let devices: Map<String, Value> = telemetry
                .devices
                .iter()
                .map(|(id, summary)| (format!("{}_{}", kind, id), json!(summary)))
                .collect();
            record.insert(format!("{}_stats", kind), Value::Object(devices));
        }

        if self.cancelled {
            record.insert("cancelled".into(), json!(true));
        }

        Value::Object(record)
    }

    /// Human-readable results table
    pub fn render_summary(&self) -> String {
        let report = &self.report;
        let mut out = String::new();

        let _ = writeln!(out, "{:=^55}", " Serving Benchmark Result ");
        let _ = writeln!(out, "{:<40} {:>14}", "Successful requests:", report.completed);
        let _ = writeln!(out, "{:<40} {:>14}", "Failed requests:", report.failed);
        let _ = writeln!(out, "{:<40} {:>14.2}", "Benchmark duration (s):", report.duration_s);
        let _ = writeln!(out, "{:<40} {:>14}", "Total input tokens:", report.total_input);
        let _ = writeln!(out, "{:<40} {:>14}", "Total generated tokens:", report.total_output);
        let _ = writeln!(
            out,
            "{:<40} {:>14.2}",
            "Request throughput (req/s):", report.request_throughput
        );
        if let Some(goodput) = report.request_goodput {
            let _ = writeln!(out, "{:<40} {:>14.2}", "Request goodput (req/s):", goodput);
        }
        let _ = writeln!(
            out,
            "{:<40} {:>14.2}",
            "Output token throughput (tok/s):", report.output_throughput
        );
        let _ = writeln!(
            out,
            "{:<40} {:>14.2}",
            "Total token throughput (tok/s):", report.total_token_throughput
        );

        if let Some(telemetry) = self.telemetry.as_ref().filter(|t| !t.is_empty()) {
            let _ = writeln!(out, "{:-^55}", " Device Statistics ");
            let kind = telemetry.kind;
            for (id, stats) in &telemetry.devices {
                let _ = writeln!(out, "[{} {}] ({} samples)", kind.title(), id, stats.sample_count);
                let _ = writeln!(out, "{:<40} {:>12.2} %", "Avg util:", stats.avg_util);
                let _ = writeln!(out, "{:<40} {:>12.2} %", "Max util:", stats.max_util);
                let _ = writeln!(out, "{:<40} {:>12.2} %", "Avg mem util:", stats.avg_mem_util);
                let _ = writeln!(out, "{:<40} {:>12.2} %", "Max mem util:", stats.max_mem_util);
                let _ = writeln!(out, "{:<40} {:>11.2} MB", "Avg mem used:", stats.avg_mem_used);
                let _ = writeln!(out, "{:<40} {:>11.2} MB", "Max mem used:", stats.max_mem_used);
                let _ = writeln!(out, "{:<40} {:>11.2} MB", "Total mem:", stats.mem_total);
            }
        }

        for &metric in &report.selected_metrics {
            let stats = report.phase(metric);
            let label = metric.label();
            let _ = writeln!(out, "{:-^55}", format!(" {} ", metric.title()));
            let _ = writeln!(out, "{:<40} {:>11.2} ms", format!("Mean {}:", label), stats.mean_ms);
            let _ = writeln!(out, "{:<40} {:>11.2} ms", format!("Median {}:", label), stats.median_ms);
            let _ = writeln!(out, "{:<40} {:>11.2} ms", format!("Std {}:", label), stats.std_ms);
            for &(p, value) in &stats.percentiles_ms {
                let _ = writeln!(
                    out,
                    "{:<40} {:>11.2} ms",
                    format!("P{} {}:", percentile_label(p), label),
                    value
                );
            }
        }

        for warning in &report.warnings {
            let _ = writeln!(out, "WARNING: {}", warning);
        }
        if self.cancelled {
            let _ = writeln!(out, "NOTE: run was cancelled before all requests were released");
        }
        let _ = writeln!(out, "{}", "=".repeat(55));

        out
    }
}

/// `99` for whole percentiles, `99.9` otherwise
fn percentile_label(p: f64) -> String {
    if p.fract() == 0.0 {
        format!("{}", p as i64)
    } else {
        format!("{}", p)
    }
}
