//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder
/// Returns a handle that can render the current snapshot
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    tracing::debug!("Prometheus metrics recorder installed");

    Ok(handle)
}

/// Record the outcome of a single-file download ("ok", "cached", "failed", "cancelled")
pub fn record_download(repo_id: &str, outcome: &'static str) {
    metrics::counter!("hf_cache_fetch_downloads_total",
        "repo" => repo_id.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a request served from an existing blob
pub fn record_cache_hit(repo_id: &str) {
    metrics::counter!("hf_cache_fetch_cache_hits_total",
        "repo" => repo_id.to_string()
    )
    .increment(1);
}

/// Record a transfer that continued from a partial blob
pub fn record_resume() {
    metrics::counter!("hf_cache_fetch_resumes_total").increment(1);
}

/// Add bytes written during one transfer session
pub fn record_bytes_transferred(bytes: u64) {
    metrics::counter!("hf_cache_fetch_bytes_transferred_total").increment(bytes);
}
