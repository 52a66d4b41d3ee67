//! Markdown-table adapter: pulls README-style files through the GitHub
//! contents API and feeds the parsed rows to the store.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};

use super::markdown_table::{parse_tables, TableSchema};
use crate::delay::Delay;
use crate::http::{FetchRequest, HttpFetch};
use crate::ingest::types::{JobPosting, SourceAdapter, Status};
use crate::ingest::Ingestor;
use crate::status::StatusCache;
use crate::store::SaveOutcome;

const DEFAULT_USER_AGENT: &str = "JobStream/1.0 (+https://github.com/jobstream)";
const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownFile {
    pub path: String,
    pub schema: TableSchema,
    #[serde(default)]
    pub lookback_days: Option<i64>,
}

impl MarkdownFile {
    pub fn new(path: &str, schema: TableSchema) -> Self {
        Self {
            path: path.to_string(),
            schema,
            lookback_days: None,
        }
    }

    fn lookback(&self) -> i64 {
        self.lookback_days
            .unwrap_or_else(|| self.schema.default_lookback_days())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownSource {
    pub name: String,
    pub owner: String,
    pub repo: String,
    #[serde(default, rename = "ref")]
    pub git_ref: Option<String>,
    pub files: Vec<MarkdownFile>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl MarkdownSource {
    pub fn contents_url(&self, path: &str) -> String {
        let mut url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo,
            path
        );
        if let Some(r) = &self.git_ref {
            url.push_str("?ref=");
            url.push_str(r);
        }
        url
    }
}

#[derive(Deserialize)]
struct ContentsResponse {
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

/// Decodes the `content` field of a contents-API response.
pub fn decode_contents(body: &str) -> anyhow::Result<String> {
    let resp: ContentsResponse = serde_json::from_str(body).context("contents json")?;
    if let Some(enc) = &resp.encoding {
        if enc != "base64" {
            return Err(anyhow!("unsupported content encoding {enc}"));
        }
    }
    // The API wraps base64 at 60 columns.
    let packed: String = resp.content.split_whitespace().collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(packed)
        .context("base64 decode")?;
    String::from_utf8(bytes).context("utf-8 content")
}

pub struct MarkdownTableAdapter {
    source: MarkdownSource,
    fetcher: Arc<dyn HttpFetch>,
    ingestor: Ingestor,
    delay: Delay,
    status: StatusCache,
    max_retries: u32,
}

impl MarkdownTableAdapter {
    pub fn new(
        source: MarkdownSource,
        fetcher: Arc<dyn HttpFetch>,
        ingestor: Ingestor,
        delay: Delay,
        status: StatusCache,
    ) -> Self {
        Self {
            source,
            fetcher,
            ingestor,
            delay,
            status,
            max_retries: 5,
        }
    }

    async fn fetch_once(&self, path: &str) -> anyhow::Result<String> {
        let url = self.source.contents_url(path);
        let req = FetchRequest::get(&url)
            .header("user-agent", &self.source.user_agent)
            .header("accept", "application/vnd.github+json");
        let resp = self.fetcher.get(req).await?;
        if !resp.is_success() {
            return Err(anyhow!("{url} returned {}", resp.status));
        }
        decode_contents(&resp.body)
    }

    /// One attempt plus up to `max_retries` retries with backoff.
    async fn fetch_with_retry(&self, path: &str) -> anyhow::Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_once(path).await {
                Ok(content) => return Ok(content),
                Err(e) if attempt < self.max_retries => {
                    tracing::warn!(source = %self.source.name, file = path, attempt, error = %e, "file fetch failed, retrying");
                    counter!("harvest_fetch_retries_total").increment(1);
                    self.delay.backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "{path}: giving up after {} attempts",
                        attempt + 1
                    )))
                }
            }
        }
    }

    async fn harvest_file(&self, file: &MarkdownFile) -> anyhow::Result<Vec<JobPosting>> {
        let content = self.fetch_with_retry(&file.path).await?;
        let rows = parse_tables(
            &content,
            file.schema,
            &self.source.name,
            Utc::now(),
            file.lookback(),
        );
        tracing::info!(source = %self.source.name, file = %file.path, rows = rows.len(), "table parsed");

        let mut saved = Vec::new();
        for job in rows {
            if let Some(SaveOutcome::Inserted) = self.ingestor.save(job.clone()).await? {
                saved.push(job);
            }
        }
        Ok(saved)
    }

    async fn probe(&self) -> Status {
        let Some(primary) = self.source.files.first() else {
            return Status::Error;
        };
        match self.fetch_once(&primary.path).await {
            Ok(content) if !content.trim().is_empty() => Status::Success,
            Ok(_) => Status::Error,
            Err(e) => {
                tracing::warn!(source = %self.source.name, error = %e, "status probe failed");
                Status::Error
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for MarkdownTableAdapter {
    fn name(&self) -> &str {
        &self.source.name
    }

    async fn harvest(&self) -> anyhow::Result<Vec<JobPosting>> {
        let mut jobs = Vec::new();
        let mut failures = 0usize;
        let mut last_err = None;

        for file in &self.source.files {
            self.delay.jitter(5_000, 15_000).await;
            match self.harvest_file(file).await {
                Ok(mut saved) => jobs.append(&mut saved),
                Err(e) => {
                    tracing::error!(source = %self.source.name, file = %file.path, error = ?e, "file abandoned for this cycle");
                    failures += 1;
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if failures == self.source.files.len() => Err(e),
            _ => Ok(jobs),
        }
    }

    async fn check_status(&self) -> Status {
        self.status.check(&self.source.name, || self.probe()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FetchResponse;
    use crate::status::MemoryStatusStore;
    use crate::store::{JobStore, MemoryJobStore};
    use crate::testing::{contents_body, RecordingPacer, ScriptedFetcher};
    use std::time::Duration;

    fn source() -> MarkdownSource {
        MarkdownSource {
            name: "cvrve".into(),
            owner: "cvrve".into(),
            repo: "Summer2025-Internships".into(),
            git_ref: Some("dev".into()),
            files: vec![
                MarkdownFile::new("OFFSEASON_README.md", TableSchema::OffSeason),
                MarkdownFile::new("README.md", TableSchema::Standard),
            ],
            user_agent: default_user_agent(),
            api_base: default_api_base(),
        }
    }

    fn adapter(
        fetcher: Arc<ScriptedFetcher>,
    ) -> (MarkdownTableAdapter, Arc<MemoryJobStore>, Arc<RecordingPacer>) {
        let store = Arc::new(MemoryJobStore::new());
        let pacer = Arc::new(RecordingPacer::default());
        let status = StatusCache::new(Arc::new(MemoryStatusStore::new()), Duration::from_secs(7200));
        let a = MarkdownTableAdapter::new(
            source(),
            fetcher,
            Ingestor::new(store.clone()),
            Delay::new(pacer.clone()),
            status,
        );
        (a, store, pacer)
    }

    #[test]
    fn contents_url_carries_ref() {
        assert_eq!(
            source().contents_url("README.md"),
            "https://api.github.com/repos/cvrve/Summer2025-Internships/contents/README.md?ref=dev"
        );
    }

    #[test]
    fn decodes_wrapped_base64() {
        let body = contents_body("hello\nworld");
        assert_eq!(decode_contents(&body).unwrap(), "hello\nworld");
    }

    #[tokio::test]
    async fn one_failing_file_does_not_stop_the_other() {
        let today = Utc::now().format("%b %d").to_string();
        let readme = format!(
            "{}\n|---|---|---|---|---|\n| [Acme](https://a.io) | SWE Intern | NY | <a href=\"https://x/y?ref=1\">apply</a> | {today} |\n",
            TableSchema::Standard.header()
        );
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.route("OFFSEASON_README.md", vec![FetchResponse::new(500, "")]);
        fetcher.route("/README.md", vec![FetchResponse::new(200, contents_body(&readme))]);
        let (a, store, pacer) = adapter(fetcher.clone());

        let jobs = a.harvest().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_link, "https://x/y");
        assert_eq!(store.count().await.unwrap(), 1);

        // Six attempts on the broken file, one on the good one.
        let offseason = fetcher
            .requests()
            .iter()
            .filter(|r| r.url.contains("OFFSEASON"))
            .count();
        assert_eq!(offseason, 6);
        let backoffs: Vec<_> = pacer
            .recorded()
            .into_iter()
            .filter(|d| *d >= Duration::from_secs(30))
            .collect();
        assert_eq!(backoffs.len(), 5);
    }

    #[tokio::test]
    async fn all_files_failing_is_an_error() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let (a, _, _) = adapter(fetcher);
        assert!(a.harvest().await.is_err());
    }

    #[tokio::test]
    async fn status_probe_checks_primary_file() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.route("OFFSEASON_README.md", vec![FetchResponse::new(200, contents_body("# table"))]);
        let (a, _, _) = adapter(fetcher.clone());
        assert_eq!(a.check_status().await, Status::Success);
        assert_eq!(a.check_status().await, Status::Success);
        assert_eq!(fetcher.requests().len(), 1);
    }
}
