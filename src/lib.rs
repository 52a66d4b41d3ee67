// src/lib.rs
// Public library surface for the service binary and integration tests.

pub mod api;
pub mod delay;
pub mod fetch_queue;
pub mod http;
pub mod ingest;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod reputation;
pub mod status;
pub mod store;
pub mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::AppState;
use crate::delay::Delay;
use crate::http::{HttpFetch, ReqwestFetcher};
use crate::ingest::config::HarvestConfig;
use crate::ingest::providers::browserless::BrowserlessLauncher;
use crate::ingest::providers::{BrowserAdapter, GuestApiAdapter, MarkdownTableAdapter};
use crate::ingest::types::SourceAdapter;
use crate::ingest::Ingestor;
use crate::orchestrator::Orchestrator;
use crate::reputation::{FileReputationStore, ReputationGate, ReputationStore};
use crate::status::StatusCache;
use crate::store::{JobStore, SqliteStore};

pub use crate::api::router;

/// Wire stores, adapters and the orchestrator from config.
pub async fn bootstrap(cfg: &HarvestConfig) -> Result<AppState> {
    tokio::fs::create_dir_all(&cfg.data_dir)
        .await
        .with_context(|| format!("create data dir {}", cfg.data_dir.display()))?;

    let db = Arc::new(SqliteStore::connect(&cfg.database_url).await?);
    let jobs: Arc<dyn JobStore> = db.clone();
    let status = StatusCache::new(db, cfg.status_ttl());
    let reputation: Arc<dyn ReputationStore> =
        Arc::new(FileReputationStore::open(&cfg.data_dir).await?);

    let fetcher: Arc<dyn HttpFetch> = Arc::new(ReqwestFetcher::new(cfg.http_timeout())?);
    let delay = Delay::tokio();
    let ingestor = Ingestor::new(jobs.clone());
    let gate = Arc::new(ReputationGate::new(
        reputation.clone(),
        fetcher.clone(),
        delay.clone(),
        cfg.thresholds,
    ));

    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    match &cfg.browserless.url {
        Some(url) => {
            let launcher = Arc::new(BrowserlessLauncher::new(
                url,
                cfg.browserless.token.clone(),
                std::time::Duration::from_secs(cfg.browserless.request_timeout_secs),
            )?);
            for site in &cfg.browser_sites {
                let adapter = BrowserAdapter::new(
                    site.clone(),
                    launcher.clone(),
                    ingestor.clone(),
                    delay.clone(),
                    status.clone(),
                )
                .with_context(|| format!("browser site {}", site.name))?;
                adapters.push(Arc::new(adapter));
            }
        }
        None if !cfg.browser_sites.is_empty() => {
            tracing::warn!(
                sites = cfg.browser_sites.len(),
                "BROWSERLESS_URL not set, browser sites disabled"
            );
        }
        None => {}
    }

    for source in &cfg.markdown_sources {
        adapters.push(Arc::new(MarkdownTableAdapter::new(
            source.clone(),
            fetcher.clone(),
            ingestor.clone(),
            delay.clone(),
            status.clone(),
        )));
    }

    if cfg.guest_api.enabled {
        adapters.push(Arc::new(GuestApiAdapter::new(
            cfg.guest_api.clone(),
            fetcher.clone(),
            gate,
            ingestor.clone(),
            delay.clone(),
            status.clone(),
        )?));
    }

    let names: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
    tracing::info!(sources = ?names, "adapters configured");

    let orchestrator = Arc::new(Orchestrator::new(adapters, delay, cfg.stagger_window()));
    Ok(AppState {
        orchestrator,
        jobs,
        reputation,
        log_path: cfg.log_path.clone(),
    })
}
