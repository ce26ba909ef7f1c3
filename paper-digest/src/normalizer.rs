use crate::config::NormalizerConfig;
use crate::types::{FetchWindow, Item, Signal, SignalSet};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tracing::debug;

/// Turns raw per-item attributes into comparable [0,1] signals.
pub struct Normalizer {
    lookback_days: u32,
    lookback: Duration,
    priority_categories: HashSet<String>,
    category_baseline: f64,
    priority_authors: Vec<String>,
}

impl Normalizer {
    pub fn new(config: &NormalizerConfig) -> Self {
        Self {
            lookback_days: config.lookback_days,
            lookback: Duration::days(i64::from(config.lookback_days)),
            priority_categories: config.priority_categories.iter().cloned().collect(),
            category_baseline: config.category_baseline,
            priority_authors: config
                .priority_authors
                .iter()
                .map(|a| a.trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    /// Items older than the lookback window are excluded here, never scored as 0.
    pub fn within_window(&self, items: Vec<Item>, now: DateTime<Utc>) -> Vec<Item> {
        let total = items.len();
        let kept: Vec<Item> = items
            .into_iter()
            .filter(|item| now.signed_duration_since(item.published_at) <= self.lookback)
            .collect();

        if kept.len() < total {
            debug!("Dropped {} items outside the {}-day window", total - kept.len(), self.lookback.num_days());
        }
        kept
    }

    pub fn window_ending_at(&self, now: DateTime<Utc>) -> FetchWindow {
        FetchWindow::ending_at(now, self.lookback_days)
    }

    pub fn normalize(&self, item: &Item, now: DateTime<Utc>) -> SignalSet {
        let mut signals = SignalSet::new();
        signals.insert(Signal::Recency, self.recency(item.published_at, now));
        signals.insert(Signal::Category, self.category(&item.categories));
        if !self.priority_authors.is_empty() {
            signals.insert(Signal::Author, self.author(&item.authors));
        }
        signals
    }

    /// 1 - age/lookback. Future-dated items count as brand new.
    pub fn recency(&self, published_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age = now.signed_duration_since(published_at);
        if age <= Duration::zero() {
            return 1.0;
        }

        let age_secs = age.num_seconds() as f64;
        let lookback_secs = self.lookback.num_seconds() as f64;
        (1.0 - age_secs / lookback_secs).clamp(0.0, 1.0)
    }

    pub fn category(&self, categories: &[String]) -> f64 {
        if categories.iter().any(|c| self.priority_categories.contains(c)) {
            1.0
        } else {
            self.category_baseline
        }
    }

    /// Case-insensitive fragment match, e.g. "hinton" matches "Geoffrey Hinton"
    pub fn author(&self, authors: &[String]) -> f64 {
        let matched = authors.iter().any(|author| {
            let author = author.to_lowercase();
            self.priority_authors.iter().any(|fragment| author.contains(fragment.as_str()))
        });
        if matched {
            1.0
        } else {
            0.0
        }
    }
}
