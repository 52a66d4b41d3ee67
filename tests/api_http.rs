// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use jobstream_harvester::api::{self, AppState};
use jobstream_harvester::delay::Delay;
use jobstream_harvester::ingest::types::{JobPosting, SourceAdapter};
use jobstream_harvester::orchestrator::Orchestrator;
use jobstream_harvester::reputation::{MemoryReputationStore, ReputationStore};
use jobstream_harvester::store::{JobStore, MemoryJobStore};
use jobstream_harvester::testing::{RecordingPacer, StaticAdapter};

const BODY_LIMIT: usize = 1024 * 1024;

struct TestApp {
    router: Router,
    jobs: Arc<dyn JobStore>,
    reputation: Arc<dyn ReputationStore>,
    _logs: tempfile::TempDir,
}

async fn test_app(adapters: Vec<Arc<dyn SourceAdapter>>) -> TestApp {
    let logs = tempfile::tempdir().unwrap();
    let log_path = logs.path().join("harvester.log");
    tokio::fs::write(&log_path, "line one\nline two\nline three\n")
        .await
        .unwrap();

    let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let reputation: Arc<dyn ReputationStore> = Arc::new(MemoryReputationStore::new());
    reputation.flag_for_review("https://co.example/company/acme").await.unwrap();

    let orchestrator = Arc::new(Orchestrator::new(
        adapters,
        Delay::new(Arc::new(RecordingPacer::default())),
        Duration::from_secs(3600),
    ));
    let router = api::router(AppState {
        orchestrator,
        jobs: jobs.clone(),
        reputation: reputation.clone(),
        log_path,
    });
    TestApp {
        router,
        jobs,
        reputation,
        _logs: logs,
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    (status, String::from_utf8(bytes.to_vec()).expect("utf8"))
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Json) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let app = test_app(vec![]).await;
    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn manual_trigger_refuses_overlap() {
    let slow = Arc::new(StaticAdapter::ok("slow", 2).with_gate());
    let gate = slow.gate_handle();
    let app = test_app(vec![slow.clone() as Arc<dyn SourceAdapter>]).await;

    let (status, body) = send(&app.router, Request::post("/scrape/now").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(serde_json::from_str::<Json>(&body).unwrap()["started"], true);

    let (status, body) = send(&app.router, Request::post("/scrape/now").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(serde_json::from_str::<Json>(&body).unwrap()["started"], false);

    gate.notify_one();
    for _ in 0..200 {
        let (status, _) = send(&app.router, Request::post("/scrape/now").body(Body::empty()).unwrap()).await;
        if status == StatusCode::ACCEPTED {
            gate.notify_one();
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run never finished");
}

#[tokio::test]
async fn scrape_status_reports_every_source() {
    let app = test_app(vec![
        Arc::new(StaticAdapter::ok("github", 0)) as Arc<dyn SourceAdapter>,
        Arc::new(StaticAdapter::failing("linkedin")),
    ])
    .await;

    let (status, body) = send(&app.router, get("/scrape/status")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v, json!({ "github": "success", "linkedin": "error" }));
}

#[tokio::test]
async fn jobs_are_served_once_then_on_request_all() {
    let app = test_app(vec![]).await;
    app.jobs
        .save(&JobPosting::new("simplify", "Acme", "SWE Intern", "https://x/y", Utc::now()))
        .await
        .unwrap();

    let (status, body) = send(&app.router, get("/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v.as_array().map(Vec::len), Some(1));
    assert_eq!(v[0]["jobLink"], "https://x/y");
    assert_eq!(v[0]["companyName"], "Acme");

    let (_, body) = send(&app.router, get("/jobs")).await;
    assert_eq!(body, "[]");

    let (_, body) = send(&app.router, get("/jobs?all=true")).await;
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v.as_array().map(Vec::len), Some(1));

    let (status, _) = send(&app.router, Request::delete("/jobs").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.jobs.count().await.unwrap(), 0);
}

#[tokio::test]
async fn review_list_promotion() {
    let app = test_app(vec![]).await;

    let (status, body) = send(&app.router, get("/review-list")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        serde_json::from_str::<Json>(&body).unwrap(),
        json!(["https://co.example/company/acme"])
    );

    let (status, _) = send(
        &app.router,
        post_json("/review-list", json!({ "identifier": "  ", "action": "blacklist" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        post_json(
            "/review-list",
            json!({ "identifier": "https://co.example/company/acme", "action": "greylist" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        post_json(
            "/review-list",
            json!({ "identifier": "https://co.example/company/other", "action": "whitelist" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app.router,
        post_json(
            "/review-list",
            json!({ "identifier": "https://co.example/company/acme", "action": "whitelist" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        serde_json::from_str::<Json>(&body).unwrap(),
        json!({ "identifier": "https://co.example/company/acme", "list": "whitelist" })
    );
    assert!(app.reputation.pending_review().await.unwrap().is_empty());
}

#[tokio::test]
async fn logs_tail_as_plain_text() {
    let app = test_app(vec![]).await;

    let resp = app.router.clone().oneshot(get("/logs?lines=2")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(String::from_utf8(bytes.to_vec()).unwrap(), "line two\nline three\n");
}
