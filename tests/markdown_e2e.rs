// tests/markdown_e2e.rs
//
// Markdown-table harvesting end to end: table text -> postings, and a full
// adapter cycle over a scripted contents API into the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use jobstream_harvester::delay::Delay;
use jobstream_harvester::http::FetchResponse;
use jobstream_harvester::ingest::providers::markdown_table::parse_tables;
use jobstream_harvester::ingest::providers::{MarkdownFile, MarkdownSource, MarkdownTableAdapter, TableSchema};
use jobstream_harvester::ingest::types::{SourceAdapter, Status};
use jobstream_harvester::ingest::Ingestor;
use jobstream_harvester::status::{MemoryStatusStore, StatusCache};
use jobstream_harvester::store::{JobStore, MemoryJobStore};
use jobstream_harvester::testing::{contents_body, RecordingPacer, ScriptedFetcher};

const STANDARD_HEADER: &str = "| Company | Role | Location | Application/Link | Date Posted |";

fn readme(rows: &[&str]) -> String {
    let mut s = format!(
        "# Summer Internships\n\nSome intro text.\n\n{STANDARD_HEADER}\n| --- | --- | --- | --- | --- |\n"
    );
    for r in rows {
        s.push_str(r);
        s.push('\n');
    }
    s.push_str("\n## Footer\n");
    s
}

#[test]
fn single_row_is_harvested_with_its_link() {
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
    let content = readme(&[
        r#"| [Acme](url) | SWE Intern | NY | <a href="https://x/y?ref=1">apply</a> | Mar 01 |"#,
    ]);

    let jobs = parse_tables(&content, TableSchema::Standard, "cvrve", now, 14);

    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.company_name, "Acme");
    assert_eq!(job.job_title, "SWE Intern");
    assert_eq!(job.job_link, "https://x/y");
    assert_eq!(job.location.as_deref(), Some("NY"));
    assert_eq!(job.source, "cvrve");
    assert_eq!(
        job.posted_at.date_naive(),
        chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    );
}

#[test]
fn continuation_rows_and_lookback_window() {
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
    let content = readme(&[
        "| **[Globex](https://globex.io)** | Backend Intern | Austin, TX | <a href=\"https://globex.io/jobs/1\">Apply</a> | 2d |",
        "| ↳ | Frontend Intern | Remote | <a href=\"https://globex.io/jobs/2\">Apply</a> | 3d |",
        "| Initech | Data Intern | Dallas, TX | https://initech.example/jobs/9 | Jan 15 |",
    ]);

    let jobs = parse_tables(&content, TableSchema::Standard, "cvrve", now, 14);

    let summary: Vec<_> = jobs
        .iter()
        .map(|j| (j.company_name.as_str(), j.job_link.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Globex", "https://globex.io/jobs/1"),
            ("Globex", "https://globex.io/jobs/2"),
        ]
    );
}

fn source() -> MarkdownSource {
    MarkdownSource {
        name: "simplify".into(),
        owner: "SimplifyJobs".into(),
        repo: "Summer2025-Internships".into(),
        git_ref: None,
        files: vec![MarkdownFile::new("README.md", TableSchema::Standard)],
        user_agent: "jobstream-test".into(),
        api_base: "https://api.github.test".into(),
    }
}

#[tokio::test]
async fn adapter_cycle_saves_new_rows_once() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.route(
        "/contents/README.md",
        vec![FetchResponse::new(
            200,
            contents_body(&readme(&[
                "| **Acme** | SWE Intern | NYC | [Apply](https://acme.example/jobs/1?src=gh) | 1d |",
                "| **Acme** | SWE Intern | NYC | [Apply](https://acme.example/jobs/1?src=list) | 1d |",
                "| Hooli | ML Intern | Palo Alto, CA | [Apply](https://hooli.example/ml) | 5d |",
            ])),
        )],
    );
    let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let pacer = Arc::new(RecordingPacer::default());
    let adapter = MarkdownTableAdapter::new(
        source(),
        fetcher.clone(),
        Ingestor::new(jobs.clone()),
        Delay::new(pacer.clone()),
        StatusCache::new(Arc::new(MemoryStatusStore::new()), Duration::from_secs(7200)),
    );

    let first = adapter.harvest().await.expect("harvest");
    assert_eq!(first.len(), 2);
    assert_eq!(jobs.count().await.unwrap(), 2);

    let second = adapter.harvest().await.expect("second harvest");
    assert!(second.is_empty(), "nothing new on the second cycle");
    assert_eq!(jobs.count().await.unwrap(), 2);

    let unread = jobs.claim_unread(false).await.unwrap();
    assert_eq!(unread.len(), 2);
    assert_eq!(unread[0].job_link, "https://acme.example/jobs/1");

    assert_eq!(
        fetcher.requests()[0]
            .headers
            .iter()
            .find(|(k, _)| k.as_str() == "user-agent")
            .map(|(_, v)| v.as_str()),
        Some("jobstream-test")
    );
    assert!(pacer
        .recorded()
        .iter()
        .all(|d| *d >= Duration::from_secs(5) && *d <= Duration::from_secs(15)));
}

#[tokio::test]
async fn status_probe_reads_first_file() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.route("/contents/README.md", vec![FetchResponse::new(200, contents_body("# hi"))]);
    let adapter = MarkdownTableAdapter::new(
        source(),
        fetcher.clone(),
        Ingestor::new(Arc::new(MemoryJobStore::new())),
        Delay::new(Arc::new(RecordingPacer::default())),
        StatusCache::new(Arc::new(MemoryStatusStore::new()), Duration::from_secs(7200)),
    );

    assert_eq!(adapter.check_status().await, Status::Success);
    assert_eq!(adapter.check_status().await, Status::Success);
    assert_eq!(fetcher.requests_matching("/contents/README.md"), 1);
}
