// src/ingest/mod.rs
pub mod config;
pub mod providers;
pub mod scheduler;
pub mod types;

use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

use crate::ingest::types::JobPosting;
use crate::store::{JobStore, SaveOutcome};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("harvest_runs_total", "Completed harvest runs.");
        describe_counter!(
            "harvest_jobs_saved_total",
            "Postings inserted into the store."
        );
        describe_counter!(
            "harvest_jobs_duplicate_total",
            "Postings skipped because their link was already stored."
        );
        describe_counter!(
            "harvest_adapter_errors_total",
            "Adapter runs that ended in an error."
        );
        describe_counter!(
            "harvest_fetch_retries_total",
            "Outbound requests retried after throttling or failure."
        );
        describe_counter!(
            "reputation_rejected_total",
            "Postings dropped by the company reputation gate."
        );
        describe_counter!(
            "reputation_review_flagged_total",
            "Companies added to the manual-review list."
        );
        describe_histogram!("harvest_run_seconds", "Wall time of one harvest run.");
        describe_gauge!("harvest_last_run_ts", "Unix ts when the last harvest finished.");
    });
}

/// Normalize text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Drop markdown emphasis left over from table cells
    out = out.replace("**", "");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Front door to the job store used by every adapter: normalizes text,
/// drops incomplete postings, and counts what happened.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn JobStore>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        ensure_metrics_described();
        Self { store }
    }

    /// Returns `None` when the posting was incomplete and not offered to the store.
    pub async fn save(&self, mut job: JobPosting) -> anyhow::Result<Option<SaveOutcome>> {
        job.company_name = normalize_text(&job.company_name);
        job.job_title = normalize_text(&job.job_title);
        job.location = job.location.map(|l| normalize_text(&l)).filter(|l| !l.is_empty());
        if !job.is_complete() {
            tracing::debug!(source = %job.source, link = %job.job_link, "incomplete posting dropped");
            return Ok(None);
        }

        let outcome = self.store.save(&job).await?;
        match outcome {
            SaveOutcome::Inserted => {
                counter!("harvest_jobs_saved_total").increment(1);
                tracing::info!(
                    source = %job.source,
                    company = %job.company_name,
                    title = %job.job_title,
                    "job saved"
                );
            }
            SaveOutcome::Duplicate => {
                counter!("harvest_jobs_duplicate_total").increment(1);
                tracing::debug!(source = %job.source, link = %job.job_link, "job already stored");
            }
        }
        Ok(Some(outcome))
    }
}
