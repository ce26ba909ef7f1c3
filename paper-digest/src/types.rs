use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

// Core types shared with the interfaces crate
pub use interfaces::defs::{
    CategoryCount, CategoryGroup, Digest, DigestEntry, FetchWindow, InterestEstimate, Item,
    PaperSummary, RunId, RunRecord, RunStatus, Score, Signal, SignalSet, FALLBACK_INTEREST,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    /// Minimum spacing between two requests to the feed host.
    pub min_interval_seconds: u64,
    pub page_size: usize,
    pub max_results: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://export.arxiv.org/api/query".to_string(),
            user_agent: "paper-digest/0.1 (weekly research digest)".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            min_interval_seconds: 3,
            page_size: 100,
            max_results: 200,
        }
    }
}

/// Outcome of one executed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub record: RunRecord,
    pub scores: Vec<Score>,
    pub digest: Digest,
    /// Number of estimator calls that fell back to the default interest.
    pub fallback_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid run transition from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Missing interest estimate for item {item_id}")]
    MissingInterest { item_id: String },

    #[error("Evaluator error: {0}")]
    Evaluator(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, DigestError>;
