//! Company reputation gate.
//!
//! Resolves a company profile URL to an accept/reject decision using, in
//! order: the blacklist, the whitelist, cached follower counts, and finally a
//! live fetch of the public profile page. Anything that cannot be classified
//! automatically lands on the manual-review list and is accepted meanwhile.

pub mod store;

use std::sync::Arc;

use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::delay::Delay;
use crate::http::{browser_headers, random_user_agent, FetchRequest, HttpFetch};

pub use store::{
    FileReputationStore, ListKind, Listing, MemoryReputationStore, PromoteError, ReputationStore,
};

/// Score reported for whitelisted and review-pending companies.
pub const SCORE_MAX: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    Blacklisted,
    Whitelisted,
    Cached,
    Measured,
    ManualReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub accept: bool,
    pub score: u64,
    pub basis: Basis,
}

impl GateDecision {
    fn scored(score: u64, threshold: u64, basis: Basis) -> Self {
        Self {
            accept: score >= threshold,
            score,
            basis,
        }
    }

    fn review() -> Self {
        Self {
            accept: true,
            score: SCORE_MAX,
            basis: Basis::ManualReview,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub domestic: u64,
    pub international: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            domestic: 750_000,
            international: 850_000,
        }
    }
}

impl Thresholds {
    pub fn for_location(&self, location: &str) -> u64 {
        if is_us_location(location) {
            self.domestic
        } else {
            self.international
        }
    }
}

const US_STATES: &[&str] = &[
    "Alabama", "Alaska", "Arizona", "Arkansas", "California", "Colorado", "Connecticut",
    "Delaware", "Florida", "Georgia", "Hawaii", "Idaho", "Illinois", "Indiana", "Iowa",
    "Kansas", "Kentucky", "Louisiana", "Maine", "Maryland", "Massachusetts", "Michigan",
    "Minnesota", "Mississippi", "Missouri", "Montana", "Nebraska", "Nevada", "New Hampshire",
    "New Jersey", "New Mexico", "New York", "North Carolina", "North Dakota", "Ohio",
    "Oklahoma", "Oregon", "Pennsylvania", "Rhode Island", "South Carolina", "South Dakota",
    "Tennessee", "Texas", "Utah", "Vermont", "Virginia", "Washington", "West Virginia",
    "Wisconsin", "Wyoming", "District of Columbia", "D.C.", "United States", "USA", "U.S.",
];

const US_STATE_CODES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
    "VA", "WA", "WV", "WI", "WY", "DC",
];

/// True when the location names a US state or the US itself. Two-letter
/// codes only count as standalone tokens, so "Canada" does not match "CA".
pub fn is_us_location(location: &str) -> bool {
    if US_STATES.iter().any(|s| location.contains(s)) {
        return true;
    }
    location
        .split(|c: char| !c.is_ascii_alphabetic())
        .any(|tok| US_STATE_CODES.contains(&tok))
}

static FOLLOWER_LINE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("h3.top-card-layout__first-subline").expect("static follower selector")
});
static FOLLOWER_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\d,]+) followers").expect("static follower regex"));

/// Extracts the follower count from a public company profile page.
pub fn parse_follower_count(html: &str) -> Option<u64> {
    let doc = Html::parse_document(html);
    let text: String = doc
        .select(&FOLLOWER_LINE)
        .next()?
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    let caps = FOLLOWER_COUNT.captures(text.trim())?;
    let digits: String = caps[1].chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

pub struct ReputationGate {
    store: Arc<dyn ReputationStore>,
    fetcher: Arc<dyn HttpFetch>,
    delay: Delay,
    thresholds: Thresholds,
    max_error_attempts: u32,
}

impl ReputationGate {
    pub fn new(
        store: Arc<dyn ReputationStore>,
        fetcher: Arc<dyn HttpFetch>,
        delay: Delay,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            store,
            fetcher,
            delay,
            thresholds,
            max_error_attempts: 3,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReputationStore> {
        &self.store
    }

    /// Decide whether a posting from `company` located at `location` is kept.
    pub async fn resolve(&self, company: &str, location: &str) -> anyhow::Result<GateDecision> {
        let threshold = self.thresholds.for_location(location);

        let decision = match self.store.lookup(company).await? {
            Listing::Blacklisted => GateDecision {
                accept: false,
                score: 0,
                basis: Basis::Blacklisted,
            },
            Listing::Whitelisted => GateDecision {
                accept: true,
                score: SCORE_MAX,
                basis: Basis::Whitelisted,
            },
            Listing::Measured(score) => GateDecision::scored(score, threshold, Basis::Cached),
            Listing::PendingReview => GateDecision::review(),
            Listing::Unknown => self.measure(company, threshold).await?,
        };

        if !decision.accept {
            counter!("reputation_rejected_total").increment(1);
        }
        Ok(decision)
    }

    async fn measure(&self, company: &str, threshold: u64) -> anyhow::Result<GateDecision> {
        tracing::info!(company, "fetching company followers");
        let mut attempt: u32 = 0;
        let mut errors: u32 = 0;
        loop {
            let req = FetchRequest::get(company).headers(browser_headers(random_user_agent(), None));
            let outcome = self.fetcher.get(req).await;

            match outcome {
                Ok(resp) if resp.is_rate_limited() => {
                    tracing::warn!(company, attempt, "rate limited on profile lookup");
                    counter!("harvest_fetch_retries_total").increment(1);
                    self.delay.backoff(attempt).await;
                    attempt = attempt.saturating_add(1);
                }
                Ok(resp) if resp.is_not_found() => {
                    tracing::info!(company, status = resp.status, "profile not found");
                    return self.flag(company).await;
                }
                Ok(resp) if resp.is_success() => {
                    return match parse_follower_count(&resp.body) {
                        Some(score) => {
                            self.store.record_score(company, score).await?;
                            tracing::debug!(company, score, threshold, "followers measured");
                            Ok(GateDecision::scored(score, threshold, Basis::Measured))
                        }
                        None => {
                            tracing::info!(company, "follower count missing from profile");
                            self.flag(company).await
                        }
                    };
                }
                other => {
                    match &other {
                        Ok(resp) => {
                            tracing::warn!(company, attempt, status = resp.status, "profile lookup failed")
                        }
                        Err(e) => tracing::warn!(company, attempt, error = %e, "profile lookup failed"),
                    }
                    errors += 1;
                    if errors >= self.max_error_attempts {
                        return self.flag(company).await;
                    }
                    counter!("harvest_fetch_retries_total").increment(1);
                    self.delay.backoff(attempt).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    async fn flag(&self, company: &str) -> anyhow::Result<GateDecision> {
        if self.store.flag_for_review(company).await? {
            counter!("reputation_review_flagged_total").increment(1);
            tracing::info!(company, "added to manual review");
        }
        Ok(GateDecision::review())
    }
}
