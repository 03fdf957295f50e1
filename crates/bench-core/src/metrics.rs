//! Latency and throughput aggregation
//!
//! Turns the complete outcome set of a run into a [`RunReport`]. Latency
//! statistics only consider successful requests; failed requests still count
//! towards the totals the throughputs are computed from. All latency values
//! are reported in milliseconds.

use crate::config::MetricsConfig;
use crate::executor::TokenCounter;
use crate::report::{PhaseStats, RunReport};
use crate::request::{Request, RequestOutcome};
use crate::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Latency phase a statistic block describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Time to first token
    Ttft,
    /// Time per output token, excluding the first
    Tpot,
    /// Inter-token latency
    Itl,
    /// End-to-end latency
    E2el,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Ttft,
        MetricKind::Tpot,
        MetricKind::Itl,
        MetricKind::E2el,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Ttft => "ttft",
            MetricKind::Tpot => "tpot",
            MetricKind::Itl => "itl",
            MetricKind::E2el => "e2el",
        }
    }

    /// Short upper-case label
    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::Ttft => "TTFT",
            MetricKind::Tpot => "TPOT",
            MetricKind::Itl => "ITL",
            MetricKind::E2el => "E2EL",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            MetricKind::Ttft => "Time to First Token",
            MetricKind::Tpot => "Time per Output Token (excl. 1st token)",
            MetricKind::Itl => "Inter-token Latency",
            MetricKind::E2el => "End-to-end Latency",
        }
    }

    /// Parse a comma-separated list such as `ttft,tpot,itl`
    pub fn parse_list(s: &str) -> Result<Vec<MetricKind>> {
        s.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for MetricKind {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ttft" => Ok(MetricKind::Ttft),
            "tpot" => Ok(MetricKind::Tpot),
            "itl" => Ok(MetricKind::Itl),
            "e2el" => Ok(MetricKind::E2el),
            other => Err(BenchError::InvalidMetric(format!(
                "'{}' (expected one of ttft, tpot, itl, e2el)",
                other
            ))),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics a service level objective can be set on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SloMetric {
    Ttft,
    Tpot,
    E2el,
}

impl SloMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            SloMetric::Ttft => "ttft",
            SloMetric::Tpot => "tpot",
            SloMetric::E2el => "e2el",
        }
    }
}

impl FromStr for SloMetric {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "ttft" => Ok(SloMetric::Ttft),
            "tpot" => Ok(SloMetric::Tpot),
            "e2el" => Ok(SloMetric::E2el),
            other => Err(BenchError::goodput(format!(
                "invalid metric name '{}'; the service level objective name should be one of ttft, tpot, e2el",
                other
            ))),
        }
    }
}

impl fmt::Display for SloMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-metric ceilings in milliseconds a request must meet to count as good
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoodputThresholds(BTreeMap<SloMetric, f64>);

impl GoodputThresholds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `name:value_ms` pairs
    pub fn parse<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        let mut thresholds = Self::new();
        for item in items {
            let item = item.as_ref();
            let (name, value) = item.split_once(':').ok_or_else(|| {
                BenchError::goodput(format!(
                    "'{}': specify service level objectives as \"KEY:VALUE\" pairs, \
                     where the key is a metric name and the value is a number in milliseconds",
                    item
                ))
            })?;
            let value: f64 = value.trim().parse().map_err(|_| {
                BenchError::goodput(format!(
                    "'{}': the service level objective value must be a number in milliseconds",
                    item
                ))
            })?;
            thresholds.insert(name.parse()?, value)?;
        }
        Ok(thresholds)
    }

    /// Set the ceiling for `metric`; negative or non-finite values are rejected
    pub fn insert(&mut self, metric: SloMetric, value_ms: f64) -> Result<()> {
        if !(value_ms.is_finite() && value_ms >= 0.0) {
            return Err(BenchError::goodput(format!(
                "invalid value {}:{}; the service level objective value should be non-negative",
                metric, value_ms
            )));
        }
        self.0.insert(metric, value_ms);
        Ok(())
    }

    pub fn get(&self, metric: SloMetric) -> Option<f64> {
        self.0.get(&metric).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SloMetric, f64)> + '_ {
        self.0.iter().map(|(metric, value)| (*metric, *value))
    }

    /// A request is good when every configured metric is at or below its ceiling
    fn is_good(&self, ttft_ms: f64, tpot_ms: f64, e2el_ms: f64) -> bool {
        self.iter().all(|(metric, ceiling)| {
            let value = match metric {
                SloMetric::Ttft => ttft_ms,
                SloMetric::Tpot => tpot_ms,
                SloMetric::E2el => e2el_ms,
            };
            value <= ceiling
        })
    }
}

/// Computes run reports from outcome sets
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    selected_metrics: Vec<MetricKind>,
    percentiles: Vec<f64>,
    goodput: Option<GoodputThresholds>,
}

impl MetricsAggregator {
    pub fn new(
        selected_metrics: Vec<MetricKind>,
        percentiles: Vec<f64>,
        goodput: Option<GoodputThresholds>,
    ) -> Self {
        Self {
            selected_metrics,
            percentiles,
            goodput: goodput.filter(|g| !g.is_empty()),
        }
    }

    pub fn from_config(config: &MetricsConfig) -> Result<Self> {
        Ok(Self::new(
            config.percentile_metrics.clone(),
            config.metric_percentiles.clone(),
            config.goodput_thresholds()?,
        ))
    }

    /// Aggregate `outcomes`, paired by position with the `requests` that produced them.
    ///
    /// `duration` is the wall-clock span of the dispatch phase. Output token
    /// counts the executor did not report are estimated with `tokens`. Returns
    /// the report and the per-request output lengths (0 for failures).
    pub fn aggregate(
        &self,
        requests: &[Request],
        outcomes: &[RequestOutcome],
        duration: Duration,
        tokens: &dyn TokenCounter,
    ) -> Result<(RunReport, Vec<usize>)> {
        if requests.len() != outcomes.len() {
            return Err(BenchError::Dispatch(format!(
                "{} outcomes collected for {} released requests",
                outcomes.len(),
                requests.len()
            )));
        }

        let mut output_lens = Vec::with_capacity(outcomes.len());
        let mut completed = 0usize;
        let mut good_completed = 0usize;
        let mut total_input = 0usize;
        let mut ttfts = Vec::new();
        let mut tpots = Vec::new();
        let mut itls = Vec::new();
        let mut e2els = Vec::new();

        for (request, outcome) in requests.iter().zip(outcomes) {
            if !outcome.success {
                output_lens.push(0);
                continue;
            }

            let output_len = outcome
                .output_tokens
                .unwrap_or_else(|| tokens.count(&outcome.generated_text));
            output_lens.push(output_len);
            total_input += request.prompt_len;
            completed += 1;

            let ttft_ms = outcome.ttft.map(as_millis_f64).unwrap_or(0.0);
            let e2el_ms = as_millis_f64(outcome.latency);

            // Single-token outputs have no TPOT; they count as 0 for goodput only
            let mut tpot_ms = 0.0;
            if output_len > 1 {
                let decode = outcome
                    .latency
                    .saturating_sub(outcome.ttft.unwrap_or(Duration::ZERO));
                tpot_ms = as_millis_f64(decode) / (output_len - 1) as f64;
                tpots.push(tpot_ms);
            }

            if let Some(goodput) = &self.goodput {
                if goodput.is_good(ttft_ms, tpot_ms, e2el_ms) {
                    good_completed += 1;
                }
            }

            ttfts.push(ttft_ms);
            itls.extend(outcome.itl.iter().copied().map(as_millis_f64));
            e2els.push(e2el_ms);
        }

        let total_output: usize = output_lens.iter().sum();
        let duration_s = duration.as_secs_f64();
        let per_second = |count: usize| {
            if duration_s > 0.0 {
                count as f64 / duration_s
            } else {
                0.0
            }
        };

        let mut warnings = Vec::new();
        if outcomes.is_empty() {
            warnings.push(
                "No requests were dispatched; all statistics are reported as zero.".to_string(),
            );
        } else if completed == 0 {
            warnings.push(
                "All requests failed. This is likely due to a misconfiguration on the benchmark arguments."
                    .to_string(),
            );
        } else {
            for &metric in &self.selected_metrics {
                let empty = match metric {
                    MetricKind::Ttft => ttfts.is_empty(),
                    MetricKind::Tpot => tpots.is_empty(),
                    MetricKind::Itl => itls.is_empty(),
                    MetricKind::E2el => e2els.is_empty(),
                };
                if empty {
                    warnings.push(format!(
                        "No {} values were recorded; its statistics are reported as zero.",
                        metric.label()
                    ));
                }
            }
        }
        if duration_s <= 0.0 && !outcomes.is_empty() {
            warnings.push("Run duration is zero; throughputs are reported as zero.".to_string());
        }
        for warning in &warnings {
            warn!("{}", warning);
        }

        let report = RunReport {
            duration_s,
            total_requests: outcomes.len(),
            completed,
            failed: outcomes.len() - completed,
            total_input,
            total_output,
            request_throughput: per_second(completed),
            request_goodput: self.goodput.as_ref().map(|_| per_second(good_completed)),
            output_throughput: per_second(total_output),
            total_token_throughput: per_second(total_input + total_output),
            ttft: phase_stats(ttfts, &self.percentiles),
            tpot: phase_stats(tpots, &self.percentiles),
            itl: phase_stats(itls, &self.percentiles),
            e2el: phase_stats(e2els, &self.percentiles),
            selected_metrics: self.selected_metrics.clone(),
            percentiles: self.percentiles.clone(),
            warnings,
        };

        debug!(
            completed = report.completed,
            failed = report.failed,
            duration_s = report.duration_s,
            "Aggregated run metrics"
        );

        Ok((report, output_lens))
    }
}

fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

/// Mean, median, population standard deviation and percentiles; all zero for an empty series
fn phase_stats(mut series: Vec<f64>, percentiles: &[f64]) -> PhaseStats {
    series.sort_by(f64::total_cmp);

    if series.is_empty() {
        return PhaseStats {
            percentiles_ms: percentiles.iter().map(|&p| (p, 0.0)).collect(),
            ..Default::default()
        };
    }

    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let variance = series.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;

    PhaseStats {
        mean_ms: mean,
        median_ms: percentile(&series, 50.0),
        std_ms: variance.sqrt(),
        percentiles_ms: percentiles
            .iter()
            .map(|&p| (p, percentile(&series, p)))
            .collect(),
        count: series.len(),
    }
}

/// Linear-interpolated percentile of a sorted series, `p` in [0, 100]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let idx = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = idx.floor() as usize;
    let upper = idx.ceil() as usize;
    let frac = idx - lower as f64;

    if upper >= sorted.len() {
        sorted[sorted.len() - 1]
    } else {
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::WhitespaceTokenCounter;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn aggregator(goodput: Option<GoodputThresholds>) -> MetricsAggregator {
        MetricsAggregator::new(
            MetricKind::ALL.to_vec(),
            vec![50.0, 90.0, 99.0],
            goodput,
        )
    }

    fn outcome(ttft: u64, latency: u64, output_tokens: usize) -> RequestOutcome {
        let itl = vec![ms((latency - ttft) / output_tokens.max(1) as u64); output_tokens.saturating_sub(1)];
        RequestOutcome::success(10, ms(latency))
            .with_ttft(ms(ttft))
            .with_itl(itl)
            .with_output("text", Some(output_tokens))
    }

    fn requests(n: usize) -> Vec<Request> {
        (0..n).map(|i| Request::new(format!("prompt {}", i), 10, 16)).collect()
    }

    #[test]
    fn test_metric_kind_parsing() {
        assert_eq!(
            MetricKind::parse_list("ttft, tpot,itl").unwrap(),
            vec![MetricKind::Ttft, MetricKind::Tpot, MetricKind::Itl]
        );
        assert!(matches!(
            MetricKind::parse_list("ttft,latency"),
            Err(BenchError::InvalidMetric(_))
        ));
        assert_eq!(MetricKind::E2el.to_string(), "e2el");
    }

    #[test]
    fn test_goodput_parsing() {
        let thresholds = GoodputThresholds::parse(&["ttft:100", "e2el:2500.5"]).unwrap();
        assert_eq!(thresholds.get(SloMetric::Ttft), Some(100.0));
        assert_eq!(thresholds.get(SloMetric::E2el), Some(2500.5));
        assert_eq!(thresholds.get(SloMetric::Tpot), None);

        for bad in ["ttft=100", "itl:5", "tpot:-1", "tpot:fast"] {
            let err = GoodputThresholds::parse(&[bad]).unwrap_err();
            assert!(matches!(err, BenchError::InvalidGoodput(_)), "{} accepted", bad);
        }
    }

    #[test]
    fn test_percentile_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 100.0), 4.0);
        assert_eq!(percentile(&sorted, 50.0), 2.5);
        assert!((percentile(&sorted, 90.0) - 3.7).abs() < 1e-9);
        assert_eq!(percentile(&[], 99.0), 0.0);
        assert_eq!(percentile(&[42.0], 1.0), 42.0);
    }

    #[test]
    fn test_percentile_monotonic() {
        let mut series: Vec<f64> = (0..97).map(|i| ((i * 37) % 101) as f64 * 1.5).collect();
        series.sort_by(f64::total_cmp);

        let mut last = f64::MIN;
        for step in 0..=1000 {
            let value = percentile(&series, step as f64 / 10.0);
            assert!(value >= last);
            last = value;
        }
    }

    #[test]
    fn test_population_std() {
        let stats = phase_stats(vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], &[]);
        assert_eq!(stats.mean_ms, 5.0);
        assert_eq!(stats.std_ms, 2.0);
        assert_eq!(stats.median_ms, 4.5);
        assert_eq!(stats.count, 8);
    }

    #[test]
    fn test_throughput_and_goodput_scenario() {
        let outcomes: Vec<_> = (0..10).map(|_| outcome(100, 1000, 10)).collect();
        let goodput = GoodputThresholds::parse(&["ttft:100"]).unwrap();

        let (report, output_lens) = aggregator(Some(goodput))
            .aggregate(&requests(10), &outcomes, Duration::from_secs(10), &WhitespaceTokenCounter)
            .unwrap();

        assert_eq!(report.completed, 10);
        assert_eq!(report.request_throughput, 1.0);
        assert_eq!(report.request_goodput, Some(1.0));
        assert_eq!(report.total_input, 100);
        assert_eq!(report.total_output, 100);
        assert_eq!(report.output_throughput, 10.0);
        assert_eq!(report.total_token_throughput, 20.0);
        assert_eq!(report.ttft.mean_ms, 100.0);
        assert_eq!(report.ttft.std_ms, 0.0);
        assert_eq!(report.tpot.mean_ms, 100.0);
        assert_eq!(report.e2el.median_ms, 1000.0);
        assert_eq!(output_lens, vec![10; 10]);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_goodput_boundary_is_inclusive() {
        let outcomes = vec![outcome(100, 500, 5), outcome(101, 500, 5)];
        let goodput = GoodputThresholds::parse(&["ttft:100"]).unwrap();

        let (report, _) = aggregator(Some(goodput))
            .aggregate(&requests(2), &outcomes, Duration::from_secs(1), &WhitespaceTokenCounter)
            .unwrap();
        assert_eq!(report.request_goodput, Some(1.0));
    }

    #[test]
    fn test_goodput_requires_every_objective() {
        // TPOT of the second request is (1000 - 100) / 3 = 300ms
        let outcomes = vec![outcome(100, 400, 4), outcome(100, 1000, 4)];
        let goodput = GoodputThresholds::parse(&["ttft:200", "tpot:150"]).unwrap();

        let (report, _) = aggregator(Some(goodput))
            .aggregate(&requests(2), &outcomes, Duration::from_secs(2), &WhitespaceTokenCounter)
            .unwrap();
        assert_eq!(report.request_goodput, Some(0.5));
    }

    #[test]
    fn test_single_token_output_excluded_from_tpot() {
        let outcomes = vec![outcome(80, 80, 1)];
        let goodput = GoodputThresholds::parse(&["tpot:0"]).unwrap();

        let (report, _) = aggregator(Some(goodput))
            .aggregate(&requests(1), &outcomes, Duration::from_secs(1), &WhitespaceTokenCounter)
            .unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(report.tpot.count, 0);
        assert_eq!(report.tpot.mean_ms, 0.0);
        // TPOT of 0 meets a 0ms ceiling
        assert_eq!(report.request_goodput, Some(1.0));
        assert_eq!(report.warnings.len(), 2); // empty TPOT and ITL series
    }

    #[test]
    fn test_all_failed() {
        let outcomes = vec![
            RequestOutcome::failure(10, "connection refused"),
            RequestOutcome::failure(10, "connection refused"),
        ];

        let (report, output_lens) = aggregator(None)
            .aggregate(&requests(2), &outcomes, Duration::from_secs(1), &WhitespaceTokenCounter)
            .unwrap();

        assert!(report.all_failed());
        assert_eq!(report.failed, 2);
        assert_eq!(report.total_input, 0);
        assert_eq!(report.request_throughput, 0.0);
        assert_eq!(report.request_goodput, None);
        for metric in MetricKind::ALL {
            let stats = report.phase(metric);
            assert_eq!(stats.mean_ms, 0.0);
            assert_eq!(stats.median_ms, 0.0);
            assert_eq!(stats.std_ms, 0.0);
            assert!(stats.percentiles_ms.iter().all(|&(_, v)| v == 0.0));
        }
        assert_eq!(output_lens, vec![0, 0]);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("All requests failed"));
    }

    #[test]
    fn test_no_dispatched_requests() {
        let (report, output_lens) = aggregator(None)
            .aggregate(&[], &[], Duration::ZERO, &WhitespaceTokenCounter)
            .unwrap();

        assert_eq!(report.total_requests, 0);
        assert_eq!(report.completed, 0);
        assert_eq!(report.request_throughput, 0.0);
        assert!(output_lens.is_empty());
        assert_eq!(
            report.warnings,
            vec!["No requests were dispatched; all statistics are reported as zero.".to_string()]
        );
    }

    #[test]
    fn test_failures_excluded_from_latency() {
        let outcomes = vec![
            outcome(50, 250, 5),
            RequestOutcome::failure(10, "timeout"),
        ];
        let (report, output_lens) = aggregator(None)
            .aggregate(&requests(2), &outcomes, Duration::from_secs(2), &WhitespaceTokenCounter)
            .unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.request_throughput, 0.5);
        assert_eq!(report.ttft.count, 1);
        assert_eq!(report.e2el.mean_ms, 250.0);
        assert_eq!(output_lens, vec![5, 0]);
    }

    #[test]
    fn test_missing_output_count_is_estimated() {
        let outcomes = vec![RequestOutcome::success(10, ms(300))
            .with_ttft(ms(100))
            .with_output("one two three four five", None)];

        let (report, output_lens) = aggregator(None)
            .aggregate(&requests(1), &outcomes, Duration::from_secs(1), &WhitespaceTokenCounter)
            .unwrap();
        assert_eq!(output_lens, vec![5]);
        assert_eq!(report.tpot.mean_ms, 50.0);
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let outcomes = vec![
            outcome(120, 900, 7),
            outcome(95, 640, 3),
            RequestOutcome::failure(10, "reset"),
            outcome(101, 1500, 12),
        ];
        let aggregator = aggregator(GoodputThresholds::parse(&["ttft:110", "e2el:1000"]).ok());

        let run = || {
            let (report, _) = aggregator
                .aggregate(&requests(4), &outcomes, Duration::from_millis(3200), &WhitespaceTokenCounter)
                .unwrap();
            serde_json::to_string(&report).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_zero_duration_does_not_divide() {
        let outcomes = vec![outcome(10, 20, 2)];
        let (report, _) = aggregator(None)
            .aggregate(&requests(1), &outcomes, Duration::ZERO, &WhitespaceTokenCounter)
            .unwrap();
        assert_eq!(report.request_throughput, 0.0);
        assert!(report.output_throughput.is_finite());
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let result = aggregator(None).aggregate(
            &requests(2),
            &[outcome(10, 20, 2)],
            Duration::from_secs(1),
            &WhitespaceTokenCounter,
        );
        assert!(result.is_err());
    }
}
