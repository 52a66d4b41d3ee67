//! Per-source health records and the TTL cache in front of status probes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::ingest::types::Status;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub source_name: String,
    pub status: Status,
    pub last_checked_at: DateTime<Utc>,
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, source: &str) -> anyhow::Result<Option<SourceStatus>>;
    async fn upsert(&self, record: SourceStatus) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryStatusStore {
    inner: RwLock<HashMap<String, SourceStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, source: &str) -> anyhow::Result<Option<SourceStatus>> {
        Ok(self.inner.read().await.get(source).cloned())
    }

    async fn upsert(&self, record: SourceStatus) -> anyhow::Result<()> {
        self.inner
            .write()
            .await
            .insert(record.source_name.clone(), record);
        Ok(())
    }
}

/// Probe results are reused for `ttl` only when the last probe succeeded;
/// failures are re-probed on every check.
#[derive(Clone)]
pub struct StatusCache {
    store: Arc<dyn StatusStore>,
    ttl: Duration,
}

impl StatusCache {
    pub fn new(store: Arc<dyn StatusStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn check<F, Fut>(&self, source: &str, probe: F) -> Status
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Status>,
    {
        let now = Utc::now();
        match self.store.get(source).await {
            Ok(Some(rec)) if self.is_fresh(&rec, now) => return rec.status,
            Ok(Some(_)) => {}
            Ok(None) => {
                // First sight: record as pending and already stale.
                let stale = now - self.ttl_chrono() - chrono::Duration::hours(1);
                self.write(source, Status::Pending, stale).await;
            }
            Err(e) => {
                tracing::warn!(error = ?e, source, "status store read failed");
            }
        }

        let status = probe().await;
        self.write(source, status, Utc::now()).await;
        tracing::debug!(source, status = %status, "status probed");
        status
    }

    pub async fn mark(&self, source: &str, status: Status) {
        self.write(source, status, Utc::now()).await;
    }

    pub async fn snapshot(&self, source: &str) -> Status {
        match self.store.get(source).await {
            Ok(Some(rec)) => rec.status,
            Ok(None) => Status::Unknown,
            Err(e) => {
                tracing::warn!(error = ?e, source, "status store read failed");
                Status::Unknown
            }
        }
    }

    fn is_fresh(&self, rec: &SourceStatus, now: DateTime<Utc>) -> bool {
        rec.status == Status::Success && now - rec.last_checked_at < self.ttl_chrono()
    }

    fn ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(2))
    }

    async fn write(&self, source: &str, status: Status, at: DateTime<Utc>) {
        let rec = SourceStatus {
            source_name: source.to_string(),
            status,
            last_checked_at: at,
        };
        if let Err(e) = self.store.upsert(rec).await {
            tracing::warn!(error = ?e, source, "status store upsert failed");
        }
    }
}
