//! Showdown CLI
//!
//! Usage: `showdown --document <path> --query <text> [--config <path>] [--output <path>]`
//!
//! Writes the comparison report as JSON to stdout or to `--output`.

use anyhow::{bail, Context};
use metrics_exporter_prometheus::PrometheusBuilder;
use showdown_common::config::{AppConfig, ObservabilityConfig};
use showdown_common::metrics::{self, STAGE_BUCKETS};
use showdown_common::VERSION;
use showdown_engine::{Pipeline, RunContext};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    document: String,
    query: String,
    config: Option<String>,
    output: Option<String>,
}

fn parse_args(raw: &[String]) -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut iter = raw.iter().skip(1);
    while let Some(flag) = iter.next() {
        let value = iter
            .next()
            .with_context(|| format!("missing value for {}", flag))?
            .clone();
        match flag.as_str() {
            "--document" => args.document = value,
            "--query" => args.query = value,
            "--config" => args.config = Some(value),
            "--output" => args.output = Some(value),
            other => bail!("unknown argument {}", other),
        }
    }
    if args.document.is_empty() || args.query.is_empty() {
        bail!("usage: showdown --document <path> --query <text> [--config <path>] [--output <path>]");
    }
    Ok(args)
}

/// RUST_LOG wins over the configured level
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_exporter(port: u16) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .set_buckets(STAGE_BUCKETS)?
        .install()?;
    info!(port = port, "Prometheus exporter listening");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let raw: Vec<String> = std::env::args().collect();
    let args = parse_args(&raw)?;

    let config = match &args.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&ObservabilityConfig::default());
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    init_tracing(&config.observability);
    info!("Starting Showdown v{}", VERSION);

    if config.observability.metrics_port > 0 {
        install_exporter(config.observability.metrics_port)?;
    }
    metrics::register_metrics();

    let text = tokio::fs::read_to_string(&args.document)
        .await
        .with_context(|| format!("failed to read document {}", args.document))?;

    let pipeline = RunContext::from_config(config).and_then(Pipeline::new);
    let report = match pipeline {
        Ok(pipeline) => pipeline.run(&text, &args.query).await,
        Err(e) => Err(e),
    };
    let report = match report {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, code = ?e.code(), "Comparison run failed");
            std::process::exit(1);
        }
    };

    let json = report.to_json()?;
    match &args.output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("failed to write report {}", path))?;
            info!(path = %path, complete = report.complete, "Report written");
        }
        None => println!("{}", json),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        std::iter::once("showdown").chain(parts.iter().copied()).map(String::from).collect()
    }

    #[test]
    fn test_parse_args() {
        let args = parse_args(&argv(&["--document", "a.txt", "--query", "who?", "--output", "r.json"])).unwrap();
        assert_eq!(args.document, "a.txt");
        assert_eq!(args.query, "who?");
        assert_eq!(args.output.as_deref(), Some("r.json"));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_parse_args_rejects_incomplete() {
        assert!(parse_args(&argv(&["--document", "a.txt"])).is_err());
        assert!(parse_args(&argv(&["--document"])).is_err());
        assert!(parse_args(&argv(&["--verbose", "yes"])).is_err());
    }
}
