// tests/metrics.rs
//
// One test per process: the Prometheus recorder is global.

use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use tower::ServiceExt;

use jobstream_harvester::ingest::types::JobPosting;
use jobstream_harvester::ingest::Ingestor;
use jobstream_harvester::metrics::Metrics;
use jobstream_harvester::store::MemoryJobStore;

#[tokio::test]
async fn metrics_endpoint_exposes_harvest_series() {
    let metrics = Metrics::init().expect("install recorder");

    let ingestor = Ingestor::new(Arc::new(MemoryJobStore::new()));
    let job = JobPosting::new("simplify", "Acme", "SWE Intern", "https://x/y", Utc::now());
    ingestor.save(job.clone()).await.unwrap();
    ingestor.save(job).await.unwrap();

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    for needle in ["harvest_jobs_saved_total 1", "harvest_jobs_duplicate_total 1"] {
        assert!(text.contains(needle), "missing `{needle}` in:\n{text}");
    }
}
