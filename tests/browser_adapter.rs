// tests/browser_adapter.rs
//
// Career-site adapter driven through a fake browser session.

use std::sync::Arc;
use std::time::Duration;

use jobstream_harvester::delay::Delay;
use jobstream_harvester::ingest::providers::{BrowserAdapter, BrowserSite};
use jobstream_harvester::ingest::types::{SourceAdapter, Status};
use jobstream_harvester::ingest::Ingestor;
use jobstream_harvester::status::{MemoryStatusStore, StatusCache};
use jobstream_harvester::store::{JobStore, MemoryJobStore};
use jobstream_harvester::testing::{FakeBrowser, RecordingPacer};

const SEARCH_URL: &str = "https://jobs.careers.microsoft.com/global/en/search?et=Internship&pg=1";

fn page(ids: &[u32]) -> String {
    ids.iter()
        .map(|id| {
            format!(
                r#"<div class="ms-List-cell"><div aria-label="Job item {id}">
                <h2 class="MZGzlrn8gfgSs8TZHhv2">Software Engineering Intern {id}</h2></div></div>"#
            )
        })
        .collect()
}

struct Harness {
    adapter: BrowserAdapter,
    jobs: Arc<dyn JobStore>,
    status: StatusCache,
    pacer: Arc<RecordingPacer>,
}

fn harness(browser: FakeBrowser) -> Harness {
    harness_for(BrowserSite::microsoft(), browser)
}

fn harness_for(site: BrowserSite, browser: FakeBrowser) -> Harness {
    let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let status = StatusCache::new(Arc::new(MemoryStatusStore::new()), Duration::from_secs(7200));
    let pacer = Arc::new(RecordingPacer::default());
    let adapter = BrowserAdapter::new(
        site,
        Arc::new(browser),
        Ingestor::new(jobs.clone()),
        Delay::new(pacer.clone()),
        status.clone(),
    )
    .expect("microsoft selectors compile");
    Harness {
        adapter,
        jobs,
        status,
        pacer,
    }
}

#[tokio::test]
async fn paginates_until_next_is_gone() {
    let browser = FakeBrowser::with_pages(SEARCH_URL, vec![page(&[101, 102]), page(&[102, 103])]);
    let h = harness(browser.clone());

    let jobs = h.adapter.harvest().await.expect("harvest");

    let links: Vec<_> = jobs.iter().map(|j| j.job_link.as_str()).collect();
    assert_eq!(
        links,
        vec![
            "https://jobs.careers.microsoft.com/global/en/job/101/",
            "https://jobs.careers.microsoft.com/global/en/job/102/",
            "https://jobs.careers.microsoft.com/global/en/job/103/",
        ]
    );
    assert!(jobs.iter().all(|j| j.company_name == "Microsoft"));
    assert_eq!(h.jobs.count().await.unwrap(), 3);
    assert_eq!(browser.opened(), 1);
    assert_eq!(browser.closed(), 1);
    assert_eq!(h.status.snapshot("microsoft").await, Status::Success);

    // One pause after the single successful click.
    let pauses = h.pacer.recorded();
    assert_eq!(pauses.len(), 1);
    assert!(pauses[0] >= Duration::from_secs(10) && pauses[0] <= Duration::from_secs(25));
}

#[tokio::test]
async fn site_without_next_control_stops_after_first_page() {
    let mut site = BrowserSite::microsoft();
    site.next_page = Some("  ".into());
    let browser = FakeBrowser::with_pages(SEARCH_URL, vec![page(&[1, 2]), page(&[3])]);
    let h = harness_for(site, browser.clone());

    let jobs = h.adapter.harvest().await.expect("harvest");

    assert_eq!(jobs.len(), 2);
    assert_eq!(browser.closed(), 1);
    assert!(h.pacer.recorded().is_empty(), "no click, no pause");
    assert_eq!(h.status.snapshot("microsoft").await, Status::Success);
}

#[tokio::test]
async fn max_pages_caps_pagination() {
    let mut site = BrowserSite::microsoft();
    site.max_pages = 2;
    let browser = FakeBrowser::with_pages(SEARCH_URL, vec![page(&[1]), page(&[2]), page(&[3])]);
    let h = harness_for(site, browser.clone());

    let jobs = h.adapter.harvest().await.expect("harvest");

    let links: Vec<_> = jobs.iter().map(|j| j.job_link.as_str()).collect();
    assert_eq!(
        links,
        vec![
            "https://jobs.careers.microsoft.com/global/en/job/1/",
            "https://jobs.careers.microsoft.com/global/en/job/2/",
        ]
    );
    assert_eq!(h.pacer.recorded().len(), 1);
    assert_eq!(browser.closed(), 1);
    assert_eq!(h.status.snapshot("microsoft").await, Status::Success);
}

#[tokio::test]
async fn list_timeout_fails_the_run_and_closes_the_session() {
    let browser = FakeBrowser::with_pages(SEARCH_URL, vec![page(&[1])]).failing_wait();
    let h = harness(browser.clone());

    let err = h.adapter.harvest().await.unwrap_err();
    assert!(format!("{err:#}").contains("microsoft"));
    assert_eq!(browser.closed(), 1);
    assert_eq!(h.jobs.count().await.unwrap(), 0);
    assert_eq!(h.status.snapshot("microsoft").await, Status::Error);
}

#[tokio::test]
async fn navigation_failure_reports_error_status() {
    let browser = FakeBrowser::with_pages(SEARCH_URL, vec![]).failing_navigation();
    let h = harness(browser.clone());

    assert_eq!(h.adapter.check_status().await, Status::Error);
    assert_eq!(browser.closed(), 1);
}
