use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type RunId = Uuid;

/// Interest value used whenever the text evaluator cannot produce a usable score.
pub const FALLBACK_INTEREST: f64 = 0.5;

/// A single fetched research record. Never mutated after the feed source hands it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub authors: Vec<String>,
    /// Deduplicated category codes, primary category first.
    pub categories: Vec<String>,
    pub link: String,
    pub pdf_url: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl Item {
    pub fn primary_category(&self) -> Option<&str> {
        self.categories.first().map(|c| c.as_str())
    }
}

/// Time window a run fetches papers from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    /// Window of `lookback_days` ending at `end`. Saturates at the earliest
    /// representable instant instead of overflowing.
    pub fn ending_at(end: DateTime<Utc>, lookback_days: u32) -> Self {
        let start = end
            .checked_sub_signed(Duration::days(i64::from(lookback_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Recency,
    Category,
    Interest,
    Author,
}

impl Signal {
    pub const ALL: [Signal; 4] = [Signal::Recency, Signal::Category, Signal::Interest, Signal::Author];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Recency => "recency",
            Signal::Category => "category",
            Signal::Interest => "interest",
            Signal::Author => "author",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized per-item feature values. Every stored value lies in [0,1].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalSet(BTreeMap<Signal, f64>);

impl SignalSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert a value, clamping it into [0,1]. NaN is stored as 0.
    pub fn insert(&mut self, signal: Signal, value: f64) {
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        self.0.insert(signal, value);
    }

    pub fn with(mut self, signal: Signal, value: f64) -> Self {
        self.insert(signal, value);
        self
    }

    pub fn get(&self, signal: Signal) -> Option<f64> {
        self.0.get(&signal).copied()
    }

    /// Value of a signal, 0 when absent.
    pub fn value(&self, signal: Signal) -> f64 {
        self.get(signal).unwrap_or(0.0)
    }

    pub fn contains(&self, signal: Signal) -> bool {
        self.0.contains_key(&signal)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Signal, f64)> + '_ {
        self.0.iter().map(|(s, v)| (*s, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Claimed-novelty estimate for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestEstimate {
    pub value: f64,
    pub rationale: Option<String>,
    pub fallback: bool,
}

impl InterestEstimate {
    /// Rescale a 1-10 rating into [0,1] via (raw - 1) / 9.
    pub fn from_rating(raw: u8, rationale: Option<String>) -> Self {
        let raw = raw.clamp(1, 10);
        Self {
            value: f64::from(raw - 1) / 9.0,
            rationale,
            fallback: false,
        }
    }

    pub fn fallback() -> Self {
        Self {
            value: FALLBACK_INTEREST,
            rationale: None,
            fallback: true,
        }
    }
}

/// Final score of one item within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub run_id: RunId,
    pub item_id: String,
    pub signals: SignalSet,
    pub final_score: f64,
    /// 1-based, unique within the run.
    pub rank: u32,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Fetching,
    Scoring,
    Compiling,
    Complete,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Fetching => "fetching",
            RunStatus::Scoring => "scoring",
            RunStatus::Compiling => "compiling",
            RunStatus::Complete => "complete",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Failed)
    }

    /// Linear progression; any non-terminal state may fail.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (from, RunStatus::Failed) => !from.is_terminal(),
            (RunStatus::Pending, RunStatus::Fetching) => true,
            (RunStatus::Fetching, RunStatus::Scoring) => true,
            (RunStatus::Scoring, RunStatus::Compiling) => true,
            (RunStatus::Compiling, RunStatus::Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "fetching" => Ok(RunStatus::Fetching),
            "scoring" => Ok(RunStatus::Scoring),
            "compiling" => Ok(RunStatus::Compiling),
            "complete" => Ok(RunStatus::Complete),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// Persisted view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub status: RunStatus,
    pub window: FetchWindow,
    pub items_count: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperSummary {
    pub takeaway: String,
    pub contribution: String,
    pub significance: String,
    pub limitations: Option<String>,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub rank: u32,
    pub item_id: String,
    pub title: String,
    pub link: String,
    pub category: String,
    pub final_score: f64,
    pub summary: PaperSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub category: String,
    pub label: String,
    pub entries: Vec<DigestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub label: String,
    pub count: usize,
}

/// Rendered, bucketed output of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub run_id: RunId,
    pub window: FetchWindow,
    pub breakthroughs: Vec<DigestEntry>,
    pub worth_skimming: Vec<CategoryGroup>,
    pub trends: Vec<CategoryCount>,
    pub markdown: String,
}

impl Digest {
    /// Item ids in bucket order: breakthroughs, then each skim group.
    pub fn item_ids(&self) -> Vec<&str> {
        self.breakthroughs
            .iter()
            .chain(self.worth_skimming.iter().flat_map(|g| g.entries.iter()))
            .map(|e| e.item_id.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.breakthroughs.len() + self.worth_skimming.iter().map(|g| g.entries.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
