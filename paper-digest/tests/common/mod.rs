#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use paper_digest::{DigestError, FeedSource, FetchWindow, Item, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reference time shared by the tests: 2024-01-15 12:00 UTC
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

/// Item published `age_hours` before `test_now()`
pub fn paper(id: &str, age_hours: i64, categories: &[&str]) -> Item {
    Item {
        id: id.to_string(),
        title: format!("Paper {}", id),
        abstract_text: format!("We study problem {}. Results are promising.", id),
        authors: vec!["Ada Lovelace".to_string()],
        categories: categories.iter().map(|c| c.to_string()).collect(),
        link: format!("https://arxiv.org/abs/{}", id),
        pdf_url: Some(format!("https://arxiv.org/pdf/{}.pdf", id)),
        published_at: test_now() - Duration::hours(age_hours),
    }
}

/// Feed source returning a fixed list and counting calls
pub struct StaticSource {
    items: Vec<Item>,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for StaticSource {
    fn source_name(&self) -> String {
        "static".to_string()
    }

    async fn fetch(&self, _window: &FetchWindow) -> Result<Vec<Item>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.clone())
    }
}

pub struct FailingSource;

#[async_trait]
impl FeedSource for FailingSource {
    fn source_name(&self) -> String {
        "failing".to_string()
    }

    async fn fetch(&self, _window: &FetchWindow) -> Result<Vec<Item>> {
        Err(DigestError::General("feed unavailable".to_string()))
    }
}
