//! Binary entrypoint for the scoring service.
//! Boots the Axum HTTP server, wiring inference, the persistence backend,
//! hot-reloaded scoring config, crisis alerting, and metrics.
//!
//! See `README.md` for quickstart and configuration.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ghostinbox_scoring::api::{self, AppState};
use ghostinbox_scoring::config::{HotReloadScoring, InferenceConfig};
use ghostinbox_scoring::inference::build_inference_client;
use ghostinbox_scoring::metrics::Metrics;
use ghostinbox_scoring::notify::CrisisNotifier;
use ghostinbox_scoring::pipeline::Pipeline;
use ghostinbox_scoring::store::{DynStore, MemoryStore, RestStore};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ghostinbox_scoring=info,warn"));

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let metrics = Metrics::init();
    let scoring = HotReloadScoring::from_env();
    let inference = build_inference_client(&InferenceConfig::from_env());

    let store: DynStore = match RestStore::from_env() {
        Ok(rest) => {
            info!("persistence: supabase rest backend");
            Arc::new(rest)
        }
        Err(e) => {
            warn!(
                error = %e,
                "no usable SUPABASE_URL/SUPABASE_SERVICE_KEY; using the in-memory store, nothing survives a restart"
            );
            Arc::new(MemoryStore::new())
        }
    };

    let notifier = Arc::new(CrisisNotifier::from_env());
    let pipeline = Arc::new(Pipeline::new(inference, store, scoring, notifier));

    let state = AppState::new(pipeline);
    if state.internal_key.is_none() {
        warn!("INTERNAL_API_KEY is not set; scoring endpoints accept unauthenticated calls");
    }

    let app = api::create_router(state).merge(metrics.router());

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "scoring service listening");
    axum::serve(listener, app).await?;
    Ok(())
}
