use crate::types::{Digest, FetchWindow, Item, Result, RunId, RunRecord, Score};
use async_trait::async_trait;

/// Source of research items for a fetch window (arXiv, fixtures, ...)
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Human-readable name for this source
    fn source_name(&self) -> String;

    /// Fetch every item published inside the window
    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<Item>>;
}

/// Language-model completion endpoint
#[async_trait]
pub trait TextEvaluator: Send + Sync {
    fn evaluator_name(&self) -> String;

    /// Run one completion and return the raw text of the reply
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Persistence for runs, items, scores and digests
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, record: &RunRecord) -> Result<()>;

    /// Overwrite status, counts and completion fields of an existing run
    async fn update_run(&self, record: &RunRecord) -> Result<()>;

    /// Upsert items by id; returns how many rows were new
    async fn save_items(&self, items: &[Item]) -> Result<usize>;

    async fn save_scores(&self, run_id: RunId, scores: &[Score]) -> Result<()>;

    async fn save_digest(&self, digest: &Digest) -> Result<()>;

    /// Digest of the most recent completed run, if any
    async fn latest_digest(&self) -> Result<Option<Digest>>;
}

/// Outbound channel for a rendered digest
#[async_trait]
pub trait DigestSender: Send + Sync {
    fn channel_name(&self) -> String;

    async fn send(&self, subject: &str, markdown: &str) -> Result<()>;
}
