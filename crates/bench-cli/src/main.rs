use anyhow::{Context, Result};
use bench_core::{
    BackendRegistry, BenchConfig, BenchmarkRunner, MetricKind, RequestRate, WhitespaceTokenCounter,
};
use bench_telemetry::{DeviceSelection, SamplerBackend};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod dataset;
mod output;

/// Benchmark driver for streaming request/response services
#[derive(Parser)]
#[command(name = "streambench")]
#[command(about = "Load generation and latency measurement for streaming services")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a benchmark against a dataset
    Run(RunArgs),

    /// Validate a configuration file
    Validate {
        /// Path to the configuration YAML file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Generate an example configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "streambench.yaml")]
        output: PathBuf,
    },
}

/// Command-line overrides; anything left unset comes from the config file or environment
#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the configuration YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSONL dataset with one request per line
    #[arg(short, long)]
    dataset: PathBuf,

    /// Number of requests to take from the dataset
    #[arg(long)]
    num_prompts: Option<usize>,

    #[arg(long)]
    backend: Option<String>,

    /// Server base URL, overrides host and port
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// API path
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    served_model_name: Option<String>,

    /// Requests per second, or `inf` to send all requests at once
    #[arg(long)]
    request_rate: Option<RequestRate>,

    /// Gamma shape of inter-arrival times; 1.0 is a Poisson process
    #[arg(long)]
    burstiness: Option<f64>,

    #[arg(long)]
    max_concurrency: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Comma-separated metrics to report percentiles for (ttft, tpot, itl, e2el)
    #[arg(long)]
    percentile_metrics: Option<String>,

    /// Comma-separated percentiles, e.g. `25,50,99`
    #[arg(long)]
    metric_percentiles: Option<String>,

    /// Goodput objectives as `name:value_ms` pairs
    #[arg(long, num_args = 1..)]
    goodput: Vec<String>,

    /// Devices to monitor: `-1` for all, `-2` to disable, or a list such as `0,1`
    #[arg(long, allow_hyphen_values = true)]
    gpu_supervised: Option<DeviceSelection>,

    /// Telemetry sampler backend (host, nvml, mock)
    #[arg(long)]
    telemetry_backend: Option<SamplerBackend>,

    #[arg(long, num_args = 1..)]
    lora_modules: Vec<String>,

    /// Call the server's start/stop profile endpoints around the run
    #[arg(long)]
    profile: bool,

    #[arg(long)]
    save_result: bool,

    /// Include per-request arrays in the saved results
    #[arg(long)]
    save_detailed: bool,

    /// Do not show the completion progress bar
    #[arg(long)]
    disable_progress: bool,

    #[arg(long)]
    result_dir: Option<PathBuf>,

    #[arg(long)]
    result_filename: Option<String>,

    /// `KEY=VALUE` pairs stored with the results
    #[arg(long, num_args = 1..)]
    metadata: Vec<String>,
}

impl RunArgs {
    /// Apply command-line overrides on top of the loaded configuration
    fn apply(&self, config: &mut BenchConfig) -> Result<()> {
        if let Some(backend) = &self.backend {
            config.backend = backend.clone();
        }

        let endpoint = &mut config.endpoint;
        if let Some(base_url) = &self.base_url {
            endpoint.base_url = Some(base_url.clone());
        }
        if let Some(host) = &self.host {
            endpoint.host = host.clone();
        }
        if let Some(port) = self.port {
            endpoint.port = port;
        }
        if let Some(path) = &self.endpoint {
            endpoint.endpoint = path.clone();
        }
        if let Some(model) = &self.model {
            endpoint.model = model.clone();
        }
        if let Some(name) = &self.served_model_name {
            endpoint.served_model_name = Some(name.clone());
        }
        if !self.lora_modules.is_empty() {
            endpoint.lora_modules = self.lora_modules.clone();
        }

        let traffic = &mut config.traffic;
        if let Some(rate) = self.request_rate {
            traffic.request_rate = rate;
        }
        if let Some(burstiness) = self.burstiness {
            traffic.burstiness = burstiness;
        }
        if self.max_concurrency.is_some() {
            traffic.max_concurrency = self.max_concurrency;
        }
        if let Some(seed) = self.seed {
            traffic.seed = seed;
        }

        let metrics = &mut config.metrics;
        if let Some(names) = &self.percentile_metrics {
            metrics.percentile_metrics = MetricKind::parse_list(names)?;
        }
        if let Some(percentiles) = &self.metric_percentiles {
            metrics.metric_percentiles = percentiles
                .split(',')
                .map(|p| {
                    p.trim()
                        .parse::<f64>()
                        .with_context(|| format!("Invalid percentile '{}'", p.trim()))
                })
                .collect::<Result<_>>()?;
        }
        if !self.goodput.is_empty() {
            metrics.goodput = self.goodput.clone();
        }

        if let Some(selection) = &self.gpu_supervised {
            config.telemetry.devices = selection.clone();
        }
        if let Some(backend) = &self.telemetry_backend {
            config.telemetry.backend = backend.clone();
        }

        config.profile |= self.profile;
        config.output.save_result |= self.save_result;
        config.output.save_detailed |= self.save_detailed;
        config.output.disable_progress |= self.disable_progress;
        if let Some(dir) = &self.result_dir {
            config.output.result_dir = Some(dir.clone());
        }
        if let Some(name) = &self.result_filename {
            config.output.result_filename = Some(name.clone());
        }
        if !self.metadata.is_empty() {
            config.output.metadata = self.metadata.clone();
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    init_tracing(&cli.log_level, cli.verbose)?;

    let outcome = match cli.command {
        Commands::Run(args) => run_benchmark(args).await,
        Commands::Validate { config } => validate_config(config),
        Commands::Generate { output } => generate_example(output),
    };

    if let Err(e) = &outcome {
        error!("{:#}", e);
    }
    outcome
}

fn init_tracing(log_level: &str, verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        match log_level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "info" => tracing::Level::INFO,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "streambench={level},bench_core={level},bench_telemetry={level}",
                    level = level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

async fn run_benchmark(args: RunArgs) -> Result<()> {
    let mut config = BenchConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config)?;
    config.validate()?;

    let executor = BackendRegistry::with_defaults().resolve(&config.backend, &config.endpoint)?;
    let requests = dataset::load_requests(&args.dataset, args.num_prompts)?;
    let num_prompts = requests.len();

    info!("Benchmarking {} via {} backend", config.endpoint.api_url(), config.backend);
    let runner = BenchmarkRunner::new(config.clone(), executor, Arc::new(WhitespaceTokenCounter));

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal, cancelling run"),
            Err(e) => {
                warn!("Unable to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    let result = runner.run_until(requests, shutdown).await?;

    println!("{}", result.render_summary());

    if config.output.save_result || config.output.save_detailed {
        output::save_result(&config, &result, num_prompts)?;
    }

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    info!("Validating configuration file: {:?}", config_path);

    let config = BenchConfig::load(Some(config_path.as_path()))?;
    BackendRegistry::with_defaults().resolve(&config.backend, &config.endpoint)?;

    info!("Configuration is valid!");
    info!("  - Backend: {}", config.backend);
    info!("  - API URL: {}", config.endpoint.api_url());
    info!("  - Request rate: {}", config.traffic.request_rate);
    info!("  - Burstiness: {}", config.traffic.burstiness);
    info!("  - Max concurrency: {:?}", config.traffic.max_concurrency);
    info!("  - Monitored devices: {}", config.telemetry.devices);

    Ok(())
}

fn generate_example(output_path: PathBuf) -> Result<()> {
    info!("Generating example configuration");

    let config = example_config();
    config.validate()?;
    config.to_yaml_file(&output_path)?;

    info!("Example configuration saved to {:?}", output_path);
    Ok(())
}

fn example_config() -> BenchConfig {
    let mut config = BenchConfig::default();
    config.traffic.request_rate = RequestRate::PerSecond(10.0);
    config.traffic.max_concurrency = Some(64);
    config.metrics.percentile_metrics = MetricKind::ALL.to_vec();
    config.metrics.metric_percentiles = vec![50.0, 90.0, 99.0];
    config.metrics.goodput = vec!["ttft:500".to_string(), "tpot:50".to_string()];
    config.telemetry.devices = DeviceSelection::All;
    config.output.save_result = true;
    config.output.result_dir = Some(PathBuf::from("results"));
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn parse_run(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_run_args_override_config() {
        let args = parse_run(&[
            "streambench",
            "run",
            "--dataset",
            "data.jsonl",
            "--request-rate",
            "4",
            "--burstiness",
            "0.5",
            "--max-concurrency",
            "16",
            "--percentile-metrics",
            "ttft,e2el",
            "--metric-percentiles",
            "50,99.9",
            "--goodput",
            "ttft:200",
            "e2el:3000",
            "--gpu-supervised",
            "-1",
            "--telemetry-backend",
            "nvml",
            "--disable-progress",
            "--metadata",
            "tp=2",
        ]);

        let mut config = BenchConfig::default();
        args.apply(&mut config).unwrap();

        assert_eq!(config.traffic.request_rate, RequestRate::PerSecond(4.0));
        assert_eq!(config.traffic.burstiness, 0.5);
        assert_eq!(config.traffic.max_concurrency, Some(16));
        assert_eq!(
            config.metrics.percentile_metrics,
            vec![MetricKind::Ttft, MetricKind::E2el]
        );
        assert_eq!(config.metrics.metric_percentiles, vec![50.0, 99.9]);
        assert_eq!(config.metrics.goodput, vec!["ttft:200", "e2el:3000"]);
        assert_eq!(config.telemetry.devices, DeviceSelection::All);
        assert_eq!(config.telemetry.backend, SamplerBackend::Nvml);
        assert!(config.output.disable_progress);
        assert_eq!(config.output.metadata, vec!["tp=2"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let args = parse_run(&["streambench", "run", "-d", "x.jsonl", "--percentile-metrics", "p99"]);
        assert!(args.apply(&mut BenchConfig::default()).is_err());

        assert!(Cli::try_parse_from(["streambench", "run", "-d", "x", "--request-rate", "-1"]).is_err());
        assert!(Cli::try_parse_from(["streambench", "run", "-d", "x", "--telemetry-backend", "rocm"]).is_err());
    }

    #[test]
    fn test_example_config_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("example.yaml");

        generate_example(path.clone()).unwrap();
        let loaded = BenchConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, example_config());
    }

    #[tokio::test]
    async fn test_unknown_backend_fails_before_dispatch() {
        let mut data = NamedTempFile::new().unwrap();
        writeln!(data, r#"{{"prompt": "hi", "prompt_len": 1, "expected_output_len": 2}}"#).unwrap();

        let mut args = parse_run(&["streambench", "run", "-d", "unused"]);
        args.dataset = data.path().to_path_buf();
        args.backend = Some("tgi".to_string());

        let err = run_benchmark(args).await.unwrap_err();
        assert!(format!("{}", err).contains("Unknown backend"));
    }
}
