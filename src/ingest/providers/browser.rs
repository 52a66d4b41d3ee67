//! Career-site adapters driven by a headless browser.
//!
//! A run walks `Navigate -> WaitForList -> Extract -> ClickNext -> ...` and
//! always ends in `Close`. Navigation or selector failures end the run for
//! this site only and mark its status as `error`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::delay::Delay;
use crate::ingest::types::{JobPosting, SourceAdapter, Status};
use crate::ingest::Ingestor;
use crate::status::StatusCache;
use crate::store::SaveOutcome;

pub const LIST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrowserError {
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("timed out after {timeout:?} waiting for `{selector}`")]
    SelectorTimeout { selector: String, timeout: Duration },
    #[error("page evaluation failed: {0}")]
    Evaluation(String),
}

/// One open page. Implementations keep whatever state they need between calls.
#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError>;
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;
    async fn content(&mut self) -> Result<String, BrowserError>;
    fn current_url(&self) -> Option<String>;
    /// Click the first match of `selector`. `Ok(false)` when nothing matches.
    async fn click(&mut self, selector: &str) -> Result<bool, BrowserError>;
    async fn close(&mut self);
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open(&self, user_agent: &str) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIdLink {
    pub selector: String,
    /// Contains `{jobId}`.
    pub url_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowSelectors {
    pub list: String,
    pub title: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub job_id: Option<JobIdLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSite {
    pub name: String,
    pub company: String,
    pub listing_url: String,
    pub status_url: String,
    pub selectors: RowSelectors,
    #[serde(default)]
    pub next_page: Option<String>,
    pub status_selector: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

fn default_max_pages() -> usize {
    50
}

impl BrowserSite {
    pub fn google() -> Self {
        Self {
            name: "google".into(),
            company: "Google".into(),
            listing_url: "https://www.google.com/about/careers/applications/jobs/results?skills=software&sort_by=date&target_level=INTERN_AND_APPRENTICE".into(),
            status_url: "https://www.google.com/about/careers/applications/jobs/results?skills=software&sort_by=date&target_level=INTERN_AND_APPRENTICE".into(),
            selectors: RowSelectors {
                list: "li.lLd3Je".into(),
                title: "h3.QJPWVe".into(),
                link: Some(r#"a.WpHeLc.VfPpkd-mRLv6[jsname="hSRGPd"]"#.into()),
                job_id: None,
            },
            next_page: Some(
                r#"a.WpHeLc.VfPpkd-mRLv6[jsname="hSRGPd"][aria-label="Go to next page"]"#.into(),
            ),
            status_selector: "li.lLd3Je".into(),
            max_pages: default_max_pages(),
        }
    }

    pub fn microsoft() -> Self {
        Self {
            name: "microsoft".into(),
            company: "Microsoft".into(),
            listing_url: "https://jobs.careers.microsoft.com/global/en/search?p=Research%2C%20Applied%2C%20%26%20Data%20Sciences&p=Software%20Engineering&p=Security%20Engineering&et=Internship&l=en_us&pg=1&pgSz=20&o=Relevance&flt=true".into(),
            status_url: "https://jobs.careers.microsoft.com/global/en/search?p=Software%20Engineering&et=Internship".into(),
            selectors: RowSelectors {
                list: "div.ms-List-cell".into(),
                title: "h2.MZGzlrn8gfgSs8TZHhv2".into(),
                link: None,
                job_id: Some(JobIdLink {
                    selector: r#"div[aria-label^="Job item"]"#.into(),
                    url_template: "https://jobs.careers.microsoft.com/global/en/job/{jobId}/".into(),
                }),
            },
            next_page: Some(r#"button[aria-label="Go to next page"]"#.into()),
            status_selector: "div.ms-List-page".into(),
            max_pages: default_max_pages(),
        }
    }
}

struct CompiledSelectors {
    list: Selector,
    title: Selector,
    link: Option<Selector>,
    job_id: Option<(Selector, String)>,
}

fn compile(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector `{css}`: {e:?}"))
}

impl CompiledSelectors {
    fn new(s: &RowSelectors) -> anyhow::Result<Self> {
        if s.link.is_none() && s.job_id.is_none() {
            return Err(anyhow!("site needs a link selector or a job-id selector"));
        }
        Ok(Self {
            list: compile(&s.list)?,
            title: compile(&s.title)?,
            link: s.link.as_deref().map(compile).transpose()?,
            job_id: s
                .job_id
                .as_ref()
                .map(|j| compile(&j.selector).map(|sel| (sel, j.url_template.clone())))
                .transpose()?,
        })
    }
}

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("static digits regex"));

/// (title, link) for every list item that yields both.
fn extract_rows(html: &str, sel: &CompiledSelectors, page_url: Option<&str>) -> Vec<(String, String)> {
    let doc = Html::parse_document(html);
    let base = page_url.and_then(|u| Url::parse(u).ok());
    let mut out = Vec::new();

    for item in doc.select(&sel.list) {
        let title = item
            .select(&sel.title)
            .next()
            .map(|t| t.text().collect::<Vec<_>>().join(" "))
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        if title.is_empty() {
            continue;
        }

        let from_id = sel.job_id.as_ref().and_then(|(id_sel, template)| {
            let label = item.select(id_sel).next()?.value().attr("aria-label")?;
            let id = DIGITS.find(label)?.as_str();
            Some(template.replace("{jobId}", id))
        });
        let link = from_id.or_else(|| {
            let href = item.select(sel.link.as_ref()?).next()?.value().attr("href")?;
            match &base {
                Some(b) => b.join(href).ok().map(|u| u.to_string()),
                None => Some(href.to_string()),
            }
        });

        if let Some(link) = link {
            out.push((title, link));
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Navigate,
    WaitForList,
    Extract,
    ClickNext,
    Close,
}

pub struct BrowserAdapter {
    site: BrowserSite,
    selectors: CompiledSelectors,
    launcher: Arc<dyn BrowserLauncher>,
    ingestor: Ingestor,
    delay: Delay,
    status: StatusCache,
}

impl BrowserAdapter {
    pub fn new(
        site: BrowserSite,
        launcher: Arc<dyn BrowserLauncher>,
        ingestor: Ingestor,
        delay: Delay,
        status: StatusCache,
    ) -> anyhow::Result<Self> {
        let selectors = CompiledSelectors::new(&site.selectors)?;
        Ok(Self {
            site,
            selectors,
            launcher,
            ingestor,
            delay,
            status,
        })
    }

    async fn run(&self, session: &mut dyn BrowserSession) -> Result<Vec<JobPosting>, BrowserError> {
        let mut jobs = Vec::new();
        let mut pages = 0usize;
        let mut failure = None;
        let mut step = Step::Navigate;

        loop {
            step = match step {
                Step::Navigate => match session.goto(&self.site.listing_url).await {
                    Ok(()) => Step::WaitForList,
                    Err(e) => {
                        failure = Some(e);
                        Step::Close
                    }
                },
                Step::WaitForList => match session.wait_for(&self.site.selectors.list, LIST_TIMEOUT).await {
                    Ok(()) => Step::Extract,
                    Err(e) => {
                        failure = Some(e);
                        Step::Close
                    }
                },
                Step::Extract => match session.content().await {
                    Ok(html) => {
                        let url = session.current_url();
                        let rows = extract_rows(&html, &self.selectors, url.as_deref());
                        pages += 1;
                        tracing::info!(source = %self.site.name, page = pages, rows = rows.len(), "page extracted");
                        self.save_rows(rows, &mut jobs).await;

                        let more = self.site.next_page.as_deref().is_some_and(|s| !s.trim().is_empty());
                        if more && pages < self.site.max_pages {
                            Step::ClickNext
                        } else {
                            Step::Close
                        }
                    }
                    Err(e) => {
                        failure = Some(e);
                        Step::Close
                    }
                },
                Step::ClickNext => {
                    let next = self.site.next_page.as_deref().unwrap_or_default();
                    match session.click(next).await {
                        Ok(true) => {
                            self.delay.jitter(10_000, 25_000).await;
                            Step::WaitForList
                        }
                        Ok(false) => Step::Close,
                        Err(e) => {
                            tracing::warn!(source = %self.site.name, error = %e, "next page click failed, ending run");
                            Step::Close
                        }
                    }
                }
                Step::Close => {
                    session.close().await;
                    break;
                }
            };
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(jobs),
        }
    }

    async fn save_rows(&self, rows: Vec<(String, String)>, jobs: &mut Vec<JobPosting>) {
        let now = Utc::now();
        for (title, link) in rows {
            let job = JobPosting::new(&self.site.name, &self.site.company, &title, &link, now);
            match self.ingestor.save(job.clone()).await {
                Ok(Some(SaveOutcome::Inserted)) => jobs.push(job),
                Ok(_) => {}
                Err(e) => tracing::error!(source = %self.site.name, error = ?e, "failed to save posting"),
            }
        }
    }

    async fn probe(&self) -> Status {
        let mut session = match self.launcher.open(DESKTOP_USER_AGENT).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(source = %self.site.name, error = %e, "browser launch failed");
                return Status::Error;
            }
        };
        let result = match session.goto(&self.site.status_url).await {
            Ok(()) => session.wait_for(&self.site.status_selector, LIST_TIMEOUT).await,
            Err(e) => Err(e),
        };
        session.close().await;
        match result {
            Ok(()) => Status::Success,
            Err(e) => {
                tracing::warn!(source = %self.site.name, error = %e, "status probe failed");
                Status::Error
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for BrowserAdapter {
    fn name(&self) -> &str {
        &self.site.name
    }

    async fn harvest(&self) -> anyhow::Result<Vec<JobPosting>> {
        let outcome = match self.launcher.open(DESKTOP_USER_AGENT).await {
            Ok(mut session) => self.run(session.as_mut()).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(jobs) => {
                self.status.mark(&self.site.name, Status::Success).await;
                Ok(jobs)
            }
            Err(e) => {
                self.status.mark(&self.site.name, Status::Error).await;
                Err(anyhow::Error::new(e).context(format!("{} run failed", self.site.name)))
            }
        }
    }

    async fn check_status(&self) -> Status {
        self.status.check(&self.site.name, || self.probe()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_link_from_aria_label() {
        let sel = CompiledSelectors::new(&BrowserSite::microsoft().selectors).unwrap();
        let html = r#"<div class="ms-List-cell">
            <div aria-label="Job item 1789123"><h2 class="MZGzlrn8gfgSs8TZHhv2">Software Engineer: Internship</h2></div>
        </div>
        <div class="ms-List-cell"><div aria-label="Job item"><h2 class="MZGzlrn8gfgSs8TZHhv2">No id</h2></div></div>"#;
        let rows = extract_rows(html, &sel, None);
        assert_eq!(
            rows,
            vec![(
                "Software Engineer: Internship".to_string(),
                "https://jobs.careers.microsoft.com/global/en/job/1789123/".to_string()
            )]
        );
    }

    #[test]
    fn relative_links_resolve_against_page() {
        let sel = CompiledSelectors::new(&BrowserSite::google().selectors).unwrap();
        let html = r#"<ul><li class="lLd3Je"><h3 class="QJPWVe">Student Researcher</h3>
            <a class="WpHeLc VfPpkd-mRLv6" jsname="hSRGPd" href="jobs/results/123-student?q=x">Learn more</a></li></ul>"#;
        let rows = extract_rows(
            html,
            &sel,
            Some("https://www.google.com/about/careers/applications/jobs/results?page=2"),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].1,
            "https://www.google.com/about/careers/applications/jobs/jobs/results/123-student?q=x"
        );
    }

    #[test]
    fn site_without_link_strategy_is_rejected() {
        let mut site = BrowserSite::google();
        site.selectors.link = None;
        assert!(CompiledSelectors::new(&site.selectors).is_err());
    }
}
