//! Job persistence. `save` is the single place the one-record-per-link rule
//! is enforced; callers never pre-check existence.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::ingest::types::JobPosting;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    Duplicate,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert into the all-time store and the unread queue, unless a posting
    /// with the same canonical link already exists.
    async fn save(&self, job: &JobPosting) -> anyhow::Result<SaveOutcome>;

    /// Return every posting (`all`) or only the unread ones, oldest first,
    /// then clear the unread queue.
    async fn claim_unread(&self, all: bool) -> anyhow::Result<Vec<JobPosting>>;

    async fn purge(&self) -> anyhow::Result<()>;

    async fn count(&self) -> anyhow::Result<usize>;
}
