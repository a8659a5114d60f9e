use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("scoring_runs_total", "Stage runs started, by stage.");
        describe_counter!(
            "inference_layer_failures_total",
            "Inference calls that degraded to their safe default, by layer."
        );
        describe_counter!("messages_flagged_total", "Moderation verdicts that flagged.");
        describe_counter!("messages_processed_total", "Full three-stage runs completed.");
        describe_counter!(
            "crisis_alerts_total",
            "Verdicts that entered the crisis path."
        );
        describe_counter!(
            "store_write_failures_total",
            "Store writes that failed or were denied, by stage."
        );
        describe_histogram!("stage_elapsed_ms", "Wall time per pipeline stage.");
        describe_histogram!("inference_layer_ms", "Wall time per inference layer call.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder and register series descriptions.
    pub fn init() -> Self {
        // Use default buckets to avoid API differences across crate versions.
        let builder = PrometheusBuilder::new();

        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");

        ensure_metrics_described();

        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
