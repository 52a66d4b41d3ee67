//! In-crate fakes for exercising adapters and the HTTP surface without a
//! network, a browser, or real sleeps.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use tokio::sync::Notify;

use crate::delay::Pacer;
use crate::http::{FetchError, FetchRequest, FetchResponse, HttpFetch};
use crate::ingest::providers::browser::{BrowserError, BrowserLauncher, BrowserSession};
use crate::ingest::types::{JobPosting, SourceAdapter, Status};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// Records requested sleeps and returns immediately.
#[derive(Default)]
pub struct RecordingPacer {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    pub fn recorded(&self) -> Vec<Duration> {
        lock(&self.slept).clone()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn sleep(&self, d: Duration) {
        lock(&self.slept).push(d);
        tokio::task::yield_now().await;
    }
}

pub type Scripted = Result<FetchResponse, FetchError>;

/// Replies by URL substring. The longest matching pattern wins; each
/// pattern plays its responses in order and repeats the last one forever.
/// Unmatched URLs get a 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, pattern: &str, responses: Vec<FetchResponse>) {
        self.route_results(pattern, responses.into_iter().map(Ok).collect());
    }

    pub fn route_results(&self, pattern: &str, responses: Vec<Scripted>) {
        lock(&self.routes).insert(pattern.to_string(), responses.into());
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        lock(&self.requests).clone()
    }

    pub fn requests_matching(&self, pattern: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.url.contains(pattern))
            .count()
    }
}

#[async_trait]
impl HttpFetch for ScriptedFetcher {
    async fn get(&self, req: FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = req.url.clone();
        lock(&self.requests).push(req);

        let mut routes = lock(&self.routes);
        let key = routes
            .keys()
            .filter(|p| url.contains(p.as_str()))
            .max_by_key(|p| p.len())
            .cloned();
        let Some(queue) = key.and_then(|k| routes.get_mut(&k)) else {
            return Ok(FetchResponse::new(404, ""));
        };
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.unwrap_or_else(|| Ok(FetchResponse::new(404, "")))
    }
}

/// A GitHub contents-API body for `text`, base64 wrapped like the real API.
pub fn contents_body(text: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(text);
    let wrapped: Vec<String> = encoded
        .as_bytes()
        .chunks(60)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect();
    serde_json::json!({
        "name": "README.md",
        "encoding": "base64",
        "content": wrapped.join("\n"),
    })
    .to_string()
}

/// One guest-API listing card.
pub fn listing_card(
    job_link: &str,
    company: &str,
    company_url: Option<&str>,
    location: &str,
    date: &str,
) -> String {
    let company_html = match company_url {
        Some(u) => format!(r#"<a class="hidden-nested-link" href="{u}">{company}</a>"#),
        None => format!(r#"<span class="hidden-nested-link">{company}</span>"#),
    };
    format!(
        r#"<li><div class="base-card relative base-card--link job-search-card">
  <a class="base-card__full-link" href="{job_link}"><span class="sr-only">Software Engineer Intern</span></a>
  <div class="base-search-card__info">
    <h3 class="base-search-card__title">
        Software Engineer Intern
    </h3>
    <h4 class="base-search-card__subtitle">{company_html}</h4>
    <div class="base-search-card__metadata">
      <span class="job-search-card__location">{location}</span>
      <div class="job-posting-benefits"><span class="job-posting-benefits__text">Actively Hiring</span></div>
      <time class="job-search-card__listdate" datetime="{date}">1 week ago</time>
    </div>
  </div>
</div></li>"#
    )
}

/// A fixed-result adapter. Optionally blocks `harvest` until released.
pub struct StaticAdapter {
    name: String,
    jobs: usize,
    fail: bool,
    gate: Option<Arc<Notify>>,
    status_checks: AtomicUsize,
    harvests: AtomicUsize,
}

impl StaticAdapter {
    pub fn ok(name: &str, jobs: usize) -> Self {
        Self {
            name: name.to_string(),
            jobs,
            fail: false,
            gate: None,
            status_checks: AtomicUsize::new(0),
            harvests: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::ok(name, 0)
        }
    }

    pub fn with_gate(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    /// Panics if the adapter was built without `with_gate`.
    pub fn gate_handle(&self) -> Arc<Notify> {
        self.gate.clone().expect("adapter built without gate")
    }

    pub fn status_checks(&self) -> usize {
        self.status_checks.load(Ordering::SeqCst)
    }

    /// Number of `harvest` calls started so far.
    pub fn harvests(&self) -> usize {
        self.harvests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn harvest(&self) -> anyhow::Result<Vec<JobPosting>> {
        self.harvests.fetch_add(1, Ordering::SeqCst);
        if let Some(g) = &self.gate {
            g.notified().await;
        }
        if self.fail {
            anyhow::bail!("{} is down", self.name);
        }
        Ok((0..self.jobs)
            .map(|i| {
                JobPosting::new(
                    &self.name,
                    "Acme",
                    "SWE Intern",
                    &format!("https://{}.example/jobs/{i}", self.name),
                    Utc::now(),
                )
            })
            .collect())
    }

    async fn check_status(&self) -> Status {
        self.status_checks.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail {
            Status::Error
        } else {
            Status::Success
        }
    }
}

/// Serves a fixed sequence of rendered pages; `click` advances to the next.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    pages: Arc<Vec<String>>,
    url: String,
    fail_goto: bool,
    fail_wait: bool,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl FakeBrowser {
    pub fn with_pages(url: &str, pages: Vec<String>) -> Self {
        Self {
            pages: Arc::new(pages),
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_goto = true;
        self
    }

    pub fn failing_wait(mut self) -> Self {
        self.fail_wait = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn open(&self, _user_agent: &str) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            browser: self.clone(),
            page: 0,
        }))
    }
}

struct FakeSession {
    browser: FakeBrowser,
    page: usize,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        if self.browser.fail_goto {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                message: "net::ERR_CONNECTION_RESET".into(),
            });
        }
        self.page = 0;
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        if self.browser.fail_wait {
            return Err(BrowserError::SelectorTimeout {
                selector: selector.to_string(),
                timeout,
            });
        }
        Ok(())
    }

    async fn content(&mut self) -> Result<String, BrowserError> {
        self.browser
            .pages
            .get(self.page)
            .cloned()
            .ok_or_else(|| BrowserError::Evaluation("no such page".into()))
    }

    fn current_url(&self) -> Option<String> {
        Some(self.browser.url.clone())
    }

    async fn click(&mut self, _selector: &str) -> Result<bool, BrowserError> {
        if self.page + 1 < self.browser.pages.len() {
            self.page += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn close(&mut self) {
        self.browser.closed.fetch_add(1, Ordering::SeqCst);
    }
}
