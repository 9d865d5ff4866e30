//! Metrics and observability utilities
//!
//! Provides metric descriptions and recording helpers with standardized
//! naming. Recording is a no-op until an exporter is installed.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all Showdown metrics
pub const METRICS_PREFIX: &str = "showdown";

/// Histogram buckets for stage and external-call latency (in seconds)
pub const STAGE_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.025,  // 25ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    120.0,  // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Total comparison runs by outcome"
    );

    describe_histogram!(
        format!("{}_run_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end comparison run latency"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Pipeline stage latency"
    );

    describe_counter!(
        format!("{}_stage_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Strategies or methods marked unavailable or incomplete"
    );

    describe_gauge!(
        format!("{}_chunk_count", METRICS_PREFIX),
        Unit::Count,
        "Chunks produced by the last run per strategy"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retrieval method latency"
    );

    describe_counter!(
        format!("{}_external_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Embedding and LLM calls by outcome"
    );

    describe_histogram!(
        format!("{}_external_call_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "External call latency including retries"
    );

    describe_counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        Unit::Count,
        "External call retries"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record a finished run
pub fn record_run(duration_secs: f64, complete: bool) {
    let outcome = if complete { "complete" } else { "incomplete" };

    counter!(
        format!("{}_runs_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(format!("{}_run_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record a pipeline stage
pub fn record_stage(stage: &str, duration_secs: f64) {
    histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .record(duration_secs);
}

/// Helper to record an excluded strategy or method
pub fn record_stage_failure(stage: &str, name: &str, reason: &str) {
    counter!(
        format!("{}_stage_failures_total", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "name" => name.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Helper to record chunking output
pub fn record_chunking(strategy: &str, chunk_count: usize) {
    gauge!(
        format!("{}_chunk_count", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .set(chunk_count as f64);
}

/// Helper to record retrieval latency
pub fn record_retrieval(method: &str, duration_secs: f64) {
    histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        "method" => method.to_string()
    )
    .record(duration_secs);
}

/// Helper to record an external call
pub fn record_external_call(service: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_external_calls_total", METRICS_PREFIX),
        "service" => service.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_external_call_duration_seconds", METRICS_PREFIX),
        "service" => service.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a retry
pub fn record_retry(service: &str) {
    counter!(
        format!("{}_retries_total", METRICS_PREFIX),
        "service" => service.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in STAGE_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recording_without_exporter() {
        // Recording must be safe before any recorder is installed
        record_run(0.5, true);
        record_stage("chunking", 0.01);
        record_external_call("llm", false, 0.2);
        record_retry("llm");
    }
}
