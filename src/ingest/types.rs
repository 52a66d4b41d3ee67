// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// One harvested posting. `job_link` is always stored in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobPosting {
    pub company_name: String,
    pub job_title: String,
    pub job_link: String,
    pub posted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub actively_hiring: bool,
    #[serde(default)]
    pub source: String,
}

impl JobPosting {
    pub fn new(
        source: &str,
        company_name: &str,
        job_title: &str,
        job_link: &str,
        posted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            company_name: company_name.trim().to_string(),
            job_title: job_title.trim().to_string(),
            job_link: canonical_link(job_link),
            posted_at,
            location: None,
            actively_hiring: false,
            source: source.to_string(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        let loc = location.into();
        let loc = loc.trim();
        self.location = (!loc.is_empty()).then(|| loc.to_string());
        self
    }

    pub fn with_actively_hiring(mut self, hiring: bool) -> Self {
        self.actively_hiring = hiring;
        self
    }

    /// Company, title and link must all be present before a posting is persisted.
    pub fn is_complete(&self) -> bool {
        !self.company_name.is_empty() && !self.job_title.is_empty() && !self.job_link.is_empty()
    }
}

/// Dedup key: scheme + host + path. Query string and fragment are dropped.
pub fn canonical_link(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) if url.has_host() => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        _ => trimmed
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Health of one source as seen by the monitoring endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Unknown,
    Pending,
    Success,
    Error,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Pending => "pending",
            Status::Success => "success",
            Status::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Status::Pending,
            "success" => Status::Success,
            "error" => Status::Error,
            _ => Status::Unknown,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A self-contained harvester for one data source.
///
/// `harvest` persists what it finds as it goes and returns the postings it
/// accepted; `check_status` is a cheap liveness probe with its own caching.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn harvest(&self) -> Result<Vec<JobPosting>>;
    async fn check_status(&self) -> Status;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_link_strips_query_and_fragment() {
        assert_eq!(canonical_link("https://x/y?ref=1"), "https://x/y");
        assert_eq!(
            canonical_link(" https://jobs.example.com/view/42?trk=abc#top "),
            "https://jobs.example.com/view/42"
        );
    }

    #[test]
    fn canonical_link_falls_back_for_unparseable_input() {
        assert_eq!(canonical_link("/relative/path?x=1"), "/relative/path");
        assert_eq!(canonical_link("not a url#frag"), "not a url");
    }

    #[test]
    fn new_posting_is_canonical_and_trimmed() {
        let job = JobPosting::new("cvrve", " Acme ", "SWE Intern ", "https://x/y?ref=1", Utc::now())
            .with_location("  ");
        assert_eq!(job.company_name, "Acme");
        assert_eq!(job.job_title, "SWE Intern");
        assert_eq!(job.job_link, "https://x/y");
        assert!(job.location.is_none());
        assert!(job.is_complete());
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [Status::Unknown, Status::Pending, Status::Success, Status::Error] {
            assert_eq!(Status::parse(s.as_str()), s);
        }
        assert_eq!(Status::parse("bogus"), Status::Unknown);
    }
}
