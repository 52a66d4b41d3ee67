//! Persistence for company reputation: the blacklist, whitelist, manual-review
//! list and measured follower scores.
//!
//! The file-backed store keeps one identifier per line (`id,count` for
//! scores) so the lists stay hand-editable.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Blacklisted,
    Whitelisted,
    Measured(u64),
    PendingReview,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Blacklist,
    Whitelist,
}

impl ListKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blacklist" => Some(ListKind::Blacklist),
            "whitelist" => Some(ListKind::Whitelist),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PromoteError {
    #[error("{0} is not pending review")]
    NotPending(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[async_trait]
pub trait ReputationStore: Send + Sync {
    async fn lookup(&self, id: &str) -> anyhow::Result<Listing>;
    async fn record_score(&self, id: &str, score: u64) -> anyhow::Result<()>;
    /// Returns false when the id was already in some list.
    async fn flag_for_review(&self, id: &str) -> anyhow::Result<bool>;
    async fn pending_review(&self) -> anyhow::Result<Vec<String>>;
    async fn promote(&self, id: &str, to: ListKind) -> Result<(), PromoteError>;
}

#[derive(Debug, Default, Clone)]
struct Lists {
    blacklist: HashSet<String>,
    whitelist: HashSet<String>,
    review: Vec<String>,
    scores: HashMap<String, u64>,
}

impl Lists {
    fn lookup(&self, id: &str) -> Listing {
        if self.blacklist.contains(id) {
            Listing::Blacklisted
        } else if self.whitelist.contains(id) {
            Listing::Whitelisted
        } else if let Some(score) = self.scores.get(id) {
            Listing::Measured(*score)
        } else if self.review.iter().any(|r| r == id) {
            Listing::PendingReview
        } else {
            Listing::Unknown
        }
    }

    fn is_listed(&self, id: &str) -> bool {
        self.blacklist.contains(id)
            || self.whitelist.contains(id)
            || self.review.iter().any(|r| r == id)
    }

    fn promote(&mut self, id: &str, to: ListKind) -> Result<(), PromoteError> {
        let Some(pos) = self.review.iter().position(|r| r == id) else {
            return Err(PromoteError::NotPending(id.to_string()));
        };
        self.review.remove(pos);
        match to {
            ListKind::Blacklist => {
                self.whitelist.remove(id);
                self.blacklist.insert(id.to_string());
            }
            ListKind::Whitelist => {
                self.blacklist.remove(id);
                self.whitelist.insert(id.to_string());
            }
        }
        Ok(())
    }
}

/// In-process store for tests and for running without a data directory.
#[derive(Default)]
pub struct MemoryReputationStore {
    lists: Mutex<Lists>,
}

impl MemoryReputationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blacklisted(mut self, id: &str) -> Self {
        self.lists.get_mut().blacklist.insert(id.into());
        self
    }

    pub fn with_whitelisted(mut self, id: &str) -> Self {
        self.lists.get_mut().whitelist.insert(id.into());
        self
    }

    pub fn with_score(mut self, id: &str, score: u64) -> Self {
        self.lists.get_mut().scores.insert(id.into(), score);
        self
    }
}

#[async_trait]
impl ReputationStore for MemoryReputationStore {
    async fn lookup(&self, id: &str) -> anyhow::Result<Listing> {
        Ok(self.lists.lock().await.lookup(id))
    }

    async fn record_score(&self, id: &str, score: u64) -> anyhow::Result<()> {
        self.lists.lock().await.scores.insert(id.to_string(), score);
        Ok(())
    }

    async fn flag_for_review(&self, id: &str) -> anyhow::Result<bool> {
        let mut lists = self.lists.lock().await;
        if lists.is_listed(id) {
            return Ok(false);
        }
        lists.review.push(id.to_string());
        Ok(true)
    }

    async fn pending_review(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.lists.lock().await.review.clone())
    }

    async fn promote(&self, id: &str, to: ListKind) -> Result<(), PromoteError> {
        self.lists.lock().await.promote(id, to)
    }
}

const BLACKLIST_FILE: &str = "blacklist.txt";
const WHITELIST_FILE: &str = "whitelist.txt";
const REVIEW_FILE: &str = "templist.txt";
const SCORES_FILE: &str = "followers.txt";

/// Store backed by four text files in one directory. Files are re-read on
/// every lookup so manual edits take effect without a restart. A single
/// mutex serializes writers inside this process.
pub struct FileReputationStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileReputationStore {
    pub async fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create reputation dir {}", dir.display()))?;
        for name in [BLACKLIST_FILE, WHITELIST_FILE, REVIEW_FILE, SCORES_FILE] {
            let path = dir.join(name);
            if tokio::fs::metadata(&path).await.is_err() {
                tokio::fs::write(&path, "")
                    .await
                    .with_context(|| format!("create {}", path.display()))?;
            }
        }
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    async fn load(&self) -> anyhow::Result<Lists> {
        let blacklist = read_ids(&self.dir.join(BLACKLIST_FILE)).await?;
        let whitelist = read_ids(&self.dir.join(WHITELIST_FILE)).await?;
        let review = read_ids(&self.dir.join(REVIEW_FILE)).await?;
        let scores = read_scores(&self.dir.join(SCORES_FILE)).await?;
        Ok(Lists {
            blacklist: blacklist.into_iter().collect(),
            whitelist: whitelist.into_iter().collect(),
            review,
            scores,
        })
    }

    async fn append(&self, name: &str, line: &str) -> anyhow::Result<()> {
        use tokio::io::AsyncWriteExt;

        let path = self.dir.join(name);
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        f.write_all(format!("{line}\n").as_bytes())
            .await
            .with_context(|| format!("append {}", path.display()))?;
        f.flush().await?;
        Ok(())
    }

    async fn rewrite(&self, name: &str, ids: &[String]) -> anyhow::Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let mut body = ids.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl ReputationStore for FileReputationStore {
    async fn lookup(&self, id: &str) -> anyhow::Result<Listing> {
        Ok(self.load().await?.lookup(id))
    }

    async fn record_score(&self, id: &str, score: u64) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.append(SCORES_FILE, &format!("{id},{score}")).await
    }

    async fn flag_for_review(&self, id: &str) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock().await;
        if self.load().await?.is_listed(id) {
            return Ok(false);
        }
        self.append(REVIEW_FILE, id).await?;
        Ok(true)
    }

    async fn pending_review(&self) -> anyhow::Result<Vec<String>> {
        read_ids(&self.dir.join(REVIEW_FILE)).await
    }

    async fn promote(&self, id: &str, to: ListKind) -> Result<(), PromoteError> {
        let _guard = self.write_lock.lock().await;
        let mut lists = self.load().await?;
        lists.promote(id, to)?;

        self.rewrite(REVIEW_FILE, &lists.review).await?;
        let mut black: Vec<String> = lists.blacklist.into_iter().collect();
        let mut white: Vec<String> = lists.whitelist.into_iter().collect();
        black.sort();
        white.sort();
        self.rewrite(BLACKLIST_FILE, &black).await?;
        self.rewrite(WHITELIST_FILE, &white).await?;
        tracing::info!(company = id, list = ?to, "review entry promoted");
        Ok(())
    }
}

async fn read_ids(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let mut seen = HashSet::new();
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| seen.insert(l.to_string()))
        .map(str::to_string)
        .collect())
}

async fn read_scores(path: &Path) -> anyhow::Result<HashMap<String, u64>> {
    let mut out = HashMap::new();
    for line in read_ids(path).await? {
        // Identifiers are URLs and may themselves contain commas.
        if let Some((id, count)) = line.rsplit_once(',') {
            if let Ok(n) = count.trim().parse::<u64>() {
                out.insert(id.trim().to_string(), n);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_lookup_precedence() {
        let store = MemoryReputationStore::new()
            .with_blacklisted("a")
            .with_whitelisted("b")
            .with_score("c", 12);
        assert_eq!(store.lookup("a").await.unwrap(), Listing::Blacklisted);
        assert_eq!(store.lookup("b").await.unwrap(), Listing::Whitelisted);
        assert_eq!(store.lookup("c").await.unwrap(), Listing::Measured(12));
        assert_eq!(store.lookup("d").await.unwrap(), Listing::Unknown);
    }

    #[tokio::test]
    async fn flag_is_idempotent_and_promotion_clears_review() {
        let store = MemoryReputationStore::new();
        assert!(store.flag_for_review("x").await.unwrap());
        assert!(!store.flag_for_review("x").await.unwrap());
        assert_eq!(store.pending_review().await.unwrap(), vec!["x".to_string()]);
        assert_eq!(store.lookup("x").await.unwrap(), Listing::PendingReview);

        store.promote("x", ListKind::Blacklist).await.unwrap();
        assert!(store.pending_review().await.unwrap().is_empty());
        assert_eq!(store.lookup("x").await.unwrap(), Listing::Blacklisted);

        // A listed id is never re-flagged.
        assert!(!store.flag_for_review("x").await.unwrap());
    }

    #[tokio::test]
    async fn promoting_unknown_id_is_not_pending() {
        let store = MemoryReputationStore::new();
        let err = store.promote("ghost", ListKind::Whitelist).await.unwrap_err();
        assert!(matches!(err, PromoteError::NotPending(id) if id == "ghost"));
    }

    #[test]
    fn list_kind_parse() {
        assert_eq!(ListKind::parse("Blacklist"), Some(ListKind::Blacklist));
        assert_eq!(ListKind::parse("whitelist"), Some(ListKind::Whitelist));
        assert_eq!(ListKind::parse("greylist"), None);
    }
}
