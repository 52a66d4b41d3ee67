//! Keyword-paginated guest job-search API.
//!
//! Every keyword walks offsets 0, page_size, 2*page_size, ... until the API
//! answers 400/404 or returns an empty page. Throttling and other failures
//! retry the same offset with backoff, without an attempt cap, so a keyword
//! is never silently truncated.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use futures::future::join_all;
use metrics::counter;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::delay::Delay;
use crate::fetch_queue::FetchQueue;
use crate::http::{browser_headers, random_user_agent, FetchRequest, HttpFetch};
use crate::ingest::types::{JobPosting, SourceAdapter, Status};
use crate::ingest::Ingestor;
use crate::reputation::ReputationGate;
use crate::status::StatusCache;
use crate::store::SaveOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestApiConfig {
    pub enabled: bool,
    pub name: String,
    pub search_url: String,
    pub referer: String,
    pub keywords: Vec<String>,
    pub page_size: u64,
    /// Only postings newer than this many seconds are requested.
    pub posted_within_secs: u64,
    pub concurrency: usize,
    pub queue_jitter_ms: (u64, u64),
    pub status_keyword: String,
}

impl Default for GuestApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "linkedin".into(),
            search_url: "https://www.linkedin.com/jobs-guest/jobs/api/seeMoreJobPostings/search"
                .into(),
            referer: "https://www.linkedin.com/jobs/".into(),
            keywords: [
                "software intern",
                "software engineer intern",
                "software developer intern",
                "backend intern",
                "full stack intern",
                "computer science intern",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            page_size: 10,
            posted_within_secs: 1_209_600,
            concurrency: 1,
            queue_jitter_ms: (0, 30_000),
            status_keyword: "software intern".into(),
        }
    }
}

/// A listing card with everything the gate and the store need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub title: String,
    pub company: String,
    pub company_url: String,
    pub link: String,
    pub location: String,
    pub posted_at: DateTime<Utc>,
    pub actively_hiring: bool,
}

#[derive(Debug, Default)]
pub struct ListingPage {
    /// Cards on the page, including ones that were unusable.
    pub cards: usize,
    pub rows: Vec<ListingRow>,
}

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static listing selector")
}

static CARD: Lazy<Selector> = Lazy::new(|| sel("li div.base-card--link.job-search-card"));
static FULL_LINK: Lazy<Selector> = Lazy::new(|| sel(".base-card__full-link"));
static COMPANY: Lazy<Selector> = Lazy::new(|| sel(".hidden-nested-link"));
static TITLE: Lazy<Selector> = Lazy::new(|| sel(".base-search-card__title"));
static LOCATION: Lazy<Selector> = Lazy::new(|| sel(".job-search-card__location"));
static LISTDATE: Lazy<Selector> =
    Lazy::new(|| sel(".job-search-card__listdate, .job-search-card__listdate--new"));
static BENEFITS: Lazy<Selector> = Lazy::new(|| sel(".job-posting-benefits__text"));

fn first_text(el: &ElementRef<'_>, s: &Selector) -> String {
    el.select(s)
        .next()
        .map(|e| e.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

fn first_attr(el: &ElementRef<'_>, s: &Selector, attr: &str) -> Option<String> {
    el.select(s)
        .next()
        .and_then(|e| e.value().attr(attr))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Extract cards from a listing fragment. Cards without a job link or a
/// company profile link are counted but not returned.
pub fn parse_listing(html: &str, now: DateTime<Utc>) -> ListingPage {
    let doc = Html::parse_fragment(html);
    let mut page = ListingPage::default();

    for card in doc.select(&CARD) {
        page.cards += 1;
        let Some(link) = first_attr(&card, &FULL_LINK, "href") else {
            continue;
        };
        let Some(company_url) = first_attr(&card, &COMPANY, "href") else {
            continue;
        };
        let posted_at = first_attr(&card, &LISTDATE, "datetime")
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| Utc.from_utc_datetime(&d))
            .unwrap_or(now);

        let company = first_text(&card, &COMPANY);
        let title = first_text(&card, &TITLE);
        page.rows.push(ListingRow {
            title: if title.is_empty() { "No Title".into() } else { title },
            company: if company.is_empty() { "No Company".into() } else { company },
            company_url,
            link,
            location: first_text(&card, &LOCATION),
            posted_at,
            actively_hiring: first_text(&card, &BENEFITS).contains("Actively Hiring"),
        });
    }
    page
}

pub struct GuestApiAdapter {
    cfg: GuestApiConfig,
    search_url: Url,
    fetcher: Arc<dyn HttpFetch>,
    queue: Arc<FetchQueue>,
    gate: Arc<ReputationGate>,
    ingestor: Ingestor,
    delay: Delay,
    status: StatusCache,
}

impl GuestApiAdapter {
    pub fn new(
        cfg: GuestApiConfig,
        fetcher: Arc<dyn HttpFetch>,
        gate: Arc<ReputationGate>,
        ingestor: Ingestor,
        delay: Delay,
        status: StatusCache,
    ) -> anyhow::Result<Self> {
        let search_url = Url::parse(&cfg.search_url)
            .with_context(|| format!("invalid search url {}", cfg.search_url))?;
        let queue = Arc::new(FetchQueue::new(
            cfg.concurrency,
            cfg.queue_jitter_ms,
            delay.clone(),
        ));
        Ok(Self {
            cfg,
            search_url,
            fetcher,
            queue,
            gate,
            ingestor,
            delay,
            status,
        })
    }

    pub fn page_url(&self, keyword: &str, offset: u64) -> String {
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("keywords", keyword)
            .append_pair("start", &offset.to_string())
            .append_pair("f_TPR", &format!("r{}", self.cfg.posted_within_secs));
        url.to_string()
    }

    fn request(&self, keyword: &str, offset: u64) -> FetchRequest {
        FetchRequest::get(self.page_url(keyword, offset))
            .headers(browser_headers(random_user_agent(), Some(&self.cfg.referer)))
    }

    async fn harvest_keyword(&self, keyword: &str) -> Vec<JobPosting> {
        self.delay.jitter(5_000, 7_000).await;

        let mut jobs = Vec::new();
        let mut offset = 0u64;
        let mut attempt = 0u32;
        loop {
            self.delay.jitter(3_000, 7_000).await;
            tracing::info!(source = %self.cfg.name, keyword, offset, "fetching listing page");

            let req = self.request(keyword, offset);
            let fetched = self.queue.submit(offset, move || self.fetcher.get(req)).await;

            let resp = match fetched {
                Ok(resp) if resp.is_not_found() => {
                    tracing::info!(source = %self.cfg.name, keyword, offset, "keyword completed");
                    break;
                }
                Ok(resp) if resp.is_success() => resp,
                Ok(resp) => {
                    tracing::warn!(source = %self.cfg.name, keyword, offset, attempt, status = resp.status, "listing throttled or failed, backing off");
                    self.retry_later(&mut attempt).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(source = %self.cfg.name, keyword, offset, attempt, error = %e, "listing fetch failed, backing off");
                    self.retry_later(&mut attempt).await;
                    continue;
                }
            };
            attempt = 0;

            let page = parse_listing(&resp.body, Utc::now());
            tracing::debug!(keyword, offset, cards = page.cards, usable = page.rows.len(), "listing parsed");
            if page.cards == 0 {
                break;
            }

            for row in page.rows {
                if let Some(job) = self.admit(row).await {
                    jobs.push(job);
                }
            }
            offset += self.cfg.page_size;
        }
        jobs
    }

    async fn retry_later(&self, attempt: &mut u32) {
        counter!("harvest_fetch_retries_total").increment(1);
        self.delay.backoff(*attempt).await;
        *attempt = attempt.saturating_add(1);
    }

    /// Gate one row and persist it if it passes. Returns the posting when it
    /// was newly stored.
    async fn admit(&self, row: ListingRow) -> Option<JobPosting> {
        let accept = match self.gate.resolve(&row.company_url, &row.location).await {
            Ok(d) => {
                if !d.accept {
                    tracing::debug!(company = %row.company, title = %row.title, score = d.score, "rejected by reputation gate");
                }
                d.accept
            }
            Err(e) => {
                tracing::warn!(company = %row.company_url, error = ?e, "reputation lookup failed, accepting");
                true
            }
        };
        if !accept {
            return None;
        }

        let job = JobPosting::new(&self.cfg.name, &row.company, &row.title, &row.link, row.posted_at)
            .with_location(row.location)
            .with_actively_hiring(row.actively_hiring);
        match self.ingestor.save(job.clone()).await {
            Ok(Some(SaveOutcome::Inserted)) => Some(job),
            Ok(_) => None,
            Err(e) => {
                tracing::error!(link = %job.job_link, error = ?e, "failed to save posting");
                None
            }
        }
    }

    async fn probe(&self) -> Status {
        let req = self.request(&self.cfg.status_keyword, 0);
        match self.fetcher.get(req).await {
            Ok(resp) if resp.is_success() && resp.body.contains("job-search-card") => {
                Status::Success
            }
            Ok(resp) => {
                tracing::warn!(source = %self.cfg.name, status = resp.status, "status probe returned no listings");
                Status::Error
            }
            Err(e) => {
                tracing::warn!(source = %self.cfg.name, error = %e, "status probe failed");
                Status::Error
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for GuestApiAdapter {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    async fn harvest(&self) -> anyhow::Result<Vec<JobPosting>> {
        let per_keyword = join_all(self.cfg.keywords.iter().map(|k| self.harvest_keyword(k))).await;
        Ok(per_keyword.into_iter().flatten().collect())
    }

    async fn check_status(&self) -> Status {
        self.status.check(&self.cfg.name, || self.probe()).await
    }
}
