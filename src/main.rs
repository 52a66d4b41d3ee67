//! Job harvester service entrypoint.
//! Boots logging, metrics, stores and adapters, the periodic scheduler, and
//! the Axum control surface.

use once_cell::sync::OnceCell;
use shuttle_axum::ShuttleAxum;
use tracing_appender::non_blocking::WorkerGuard;

use jobstream_harvester::ingest::{config, scheduler};
use jobstream_harvester::metrics::Metrics;

// Flushes the file log on shutdown.
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    let cfg = config::load_default()?;
    let guard = jobstream_harvester::logging::init(&cfg.log_path)?;
    let _ = LOG_GUARD.set(guard);

    let metrics = Metrics::init()?;
    let state = jobstream_harvester::bootstrap(&cfg).await?;

    match cfg.interval() {
        Some(every) => {
            scheduler::spawn_harvest_scheduler(state.orchestrator.clone(), every);
            tracing::info!(every_secs = every.as_secs(), "harvest scheduler started");
        }
        None => tracing::info!("periodic harvest disabled"),
    }

    let router = jobstream_harvester::router(state).merge(metrics.router());
    Ok(router.into())
}
