//! Pipe-table parsing for community-maintained job lists.
//!
//! The header line selects the layout. A file may hold several tables with
//! the same header; each is parsed until the first line that is not a table
//! row.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ingest::normalize_text;
use crate::ingest::types::JobPosting;

const CONTINUATION: char = '↳';
const LOCKED: char = '🔒';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSchema {
    /// `| Company | Role | Location | Application/Link | Date Posted |`
    Standard,
    /// Standard plus a `Terms` column.
    OffSeason,
    /// `| Company | Position | Location | Salary | Posting | Age |`
    Salary,
    /// `| Company | Position | Location | Posting | Age |`
    International,
}

impl TableSchema {
    pub fn header(self) -> &'static str {
        match self {
            TableSchema::Standard => "| Company | Role | Location | Application/Link | Date Posted |",
            TableSchema::OffSeason => {
                "| Company | Role | Location | Terms | Application/Link | Date Posted |"
            }
            TableSchema::Salary => "| Company | Position | Location | Salary | Posting | Age |",
            TableSchema::International => "| Company | Position | Location | Posting | Age |",
        }
    }

    fn columns(self) -> usize {
        match self {
            TableSchema::Standard | TableSchema::International => 5,
            TableSchema::OffSeason | TableSchema::Salary => 6,
        }
    }

    fn link_column(self) -> usize {
        match self {
            TableSchema::Standard | TableSchema::International => 3,
            TableSchema::OffSeason | TableSchema::Salary => 4,
        }
    }

    fn date_column(self) -> usize {
        self.columns() - 1
    }

    pub fn default_lookback_days(self) -> i64 {
        match self {
            TableSchema::Salary => 7,
            _ => 14,
        }
    }

    fn row_regex(self) -> &'static Regex {
        static FIVE: Lazy<Regex> = Lazy::new(|| row_regex_for(5));
        static SIX: Lazy<Regex> = Lazy::new(|| row_regex_for(6));
        match self.columns() {
            5 => &FIVE,
            _ => &SIX,
        }
    }
}

fn row_regex_for(columns: usize) -> Regex {
    let mut pat = String::from(r"^\|");
    for _ in 0..columns {
        pat.push_str(r"\s*(.*?)\s*\|");
    }
    pat.push_str(r"\s*$");
    Regex::new(&pat).expect("static row regex")
}

static SEPARATOR_CELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^:?-{3,}:?$").expect("static separator regex"));
static MD_LINK_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\s*(.*?)\s*\]\s*\(.*?\)").expect("static name regex"));
static STRONG_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<strong>(.*?)</strong>").expect("static strong regex"));
static HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"href="([^"]+)""#).expect("static href regex"));
static MD_LINK_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\]\((https?://[^)\s]+)\)").expect("static md url regex"));
static BARE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"')]+"#).expect("static url regex"));
static RELATIVE_AGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+)\s*(mo|d|w|h)$").expect("static age regex"));

/// Parse every table introduced by `schema`'s header in `content`, keeping
/// rows posted within `lookback_days` of `now` (inclusive).
pub fn parse_tables(
    content: &str,
    schema: TableSchema,
    source: &str,
    now: DateTime<Utc>,
    lookback_days: i64,
) -> Vec<JobPosting> {
    let mut out = Vec::new();
    for (start, _) in content.match_indices(schema.header()) {
        let body = &content[start + schema.header().len()..];
        parse_table_body(body, schema, source, now, lookback_days, &mut out);
    }
    out
}

fn parse_table_body(
    body: &str,
    schema: TableSchema,
    source: &str,
    now: DateTime<Utc>,
    lookback_days: i64,
    out: &mut Vec<JobPosting>,
) {
    let mut last_company = String::new();

    // The header match leaves the rest of its line; skip it.
    for line in body.lines().skip(1).map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if !line.starts_with('|') {
            break;
        }
        let Some(caps) = schema.row_regex().captures(line) else {
            continue;
        };
        let cells: Vec<&str> = (1..=schema.columns())
            .map(|i| caps.get(i).map_or("", |m| m.as_str()))
            .collect();
        if cells.iter().all(|c| SEPARATOR_CELL.is_match(c)) {
            continue;
        }

        let company = if cells[0].contains(CONTINUATION) {
            last_company.clone()
        } else {
            let name = company_name(cells[0]);
            last_company = name.clone();
            name
        };

        let link_cell = cells[schema.link_column()];
        if link_cell.contains(LOCKED) {
            continue;
        }
        let Some(link) = extract_link(link_cell) else {
            continue;
        };

        let date_cell = cells[schema.date_column()];
        let posted_at = match parse_posted(date_cell, now) {
            Some(at) => at,
            // An age too large to represent is outside any lookback window.
            None if is_relative_age(date_cell) => continue,
            None => now,
        };
        if (now.date_naive() - posted_at.date_naive()).num_days() > lookback_days {
            continue;
        }

        let job = JobPosting::new(source, &company, &normalize_text(cells[1]), &link, posted_at)
            .with_location(normalize_text(&cells[2].replace("<br>", ", ").replace("</br>", ", ")));
        if job.is_complete() {
            out.push(job);
        }
    }
}

/// `[Name](url)`, `**[Name](url)**`, `<strong>Name</strong>` or plain text.
pub fn company_name(cell: &str) -> String {
    if let Some(c) = MD_LINK_NAME.captures(cell) {
        return normalize_text(&c[1]);
    }
    if let Some(c) = STRONG_NAME.captures(cell) {
        return normalize_text(&c[1]);
    }
    normalize_text(cell)
}

pub fn extract_link(cell: &str) -> Option<String> {
    if let Some(c) = HREF.captures(cell) {
        return Some(html_escape::decode_html_entities(&c[1]).into_owned());
    }
    if let Some(c) = MD_LINK_URL.captures(cell) {
        return Some(c[1].to_string());
    }
    BARE_URL.find(cell).map(|m| m.as_str().to_string())
}

fn is_relative_age(cell: &str) -> bool {
    RELATIVE_AGE.is_match(&normalize_text(cell))
}

/// `Mon DD` (current year, or last year if that would be in the future) or a
/// relative age like `3d`, `2w`, `1mo`, `5h`.
pub fn parse_posted(cell: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cell = normalize_text(cell);
    if let Some(c) = RELATIVE_AGE.captures(&cell) {
        let n: i64 = c[1].parse().ok()?;
        // Out-of-range ages yield None so the row is skipped.
        let age = match c[2].to_ascii_lowercase().as_str() {
            "h" => Duration::try_hours(n),
            "d" => Duration::try_days(n),
            "w" => Duration::try_weeks(n),
            _ => n.checked_mul(30).and_then(Duration::try_days),
        }?;
        return now.checked_sub_signed(age);
    }

    let today = now.date_naive();
    let mut date = parse_month_day(&cell, today.year())?;
    if date > today {
        date = parse_month_day(&cell, today.year() - 1)?;
    }
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn parse_month_day(cell: &str, year: i32) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{cell} {year}"), "%b %d %Y").ok()
}
