use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{JobStore, SaveOutcome};
use crate::ingest::types::{canonical_link, JobPosting};

#[derive(Default)]
struct Inner {
    all: Vec<JobPosting>,
    links: HashSet<String>,
    unread: VecDeque<usize>,
}

/// Check and insert happen under one lock, so concurrent savers of the same
/// link cannot both insert.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &JobPosting) -> anyhow::Result<SaveOutcome> {
        let mut job = job.clone();
        job.job_link = canonical_link(&job.job_link);

        let mut inner = self.inner.lock().await;
        if !inner.links.insert(job.job_link.clone()) {
            return Ok(SaveOutcome::Duplicate);
        }
        let idx = inner.all.len();
        inner.all.push(job);
        inner.unread.push_back(idx);
        Ok(SaveOutcome::Inserted)
    }

    async fn claim_unread(&self, all: bool) -> anyhow::Result<Vec<JobPosting>> {
        let mut inner = self.inner.lock().await;
        let unread: Vec<usize> = inner.unread.drain(..).collect();
        let out = if all {
            inner.all.clone()
        } else {
            unread.into_iter().map(|i| inner.all[i].clone()).collect()
        };
        Ok(out)
    }

    async fn purge(&self) -> anyhow::Result<()> {
        *self.inner.lock().await = Inner::default();
        Ok(())
    }

    async fn count(&self) -> anyhow::Result<usize> {
        Ok(self.inner.lock().await.all.len())
    }
}
