use crate::parser::ArxivParser;
use crate::traits::FeedSource;
use crate::types::{DigestError, FetchConfig, FetchWindow, Item, Result};
use crate::utils::time::arxiv_day;
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

/// arXiv export API client. Requests are sequential and spaced by `min_interval_seconds`.
pub struct ArxivClient {
    client: Client,
    base_url: Url,
    config: FetchConfig,
    categories: Vec<String>,
    last_request: Mutex<Option<Instant>>,
}

impl ArxivClient {
    pub fn new(config: FetchConfig, categories: Vec<String>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            base_url,
            config,
            categories,
            last_request: Mutex::new(None),
        })
    }

    /// `(cat:A OR cat:B) AND submittedDate:[YYYYMMDD0000 TO YYYYMMDD2359]`
    pub fn build_query(categories: &[String], window: &FetchWindow) -> String {
        let cat_part = categories
            .iter()
            .map(|c| format!("cat:{}", c))
            .collect::<Vec<_>>()
            .join(" OR ");

        format!(
            "({}) AND submittedDate:[{}0000 TO {}2359]",
            cat_part,
            arxiv_day(window.start),
            arxiv_day(window.end)
        )
    }

    async fn fetch_page(&self, query: &str, start: usize, count: usize) -> Result<String> {
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 8),
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit().await;

            let request = self.client.get(self.base_url.clone()).query(&[
                ("search_query", query.to_string()),
                ("start", start.to_string()),
                ("max_results", count.to_string()),
                ("sortBy", "submittedDate".to_string()),
                ("sortOrder", "descending".to_string()),
            ]);

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body = response.text().await?;
                        debug!("Fetched page start={} ({} bytes)", start, body.len());
                        return Ok(body);
                    }

                    // Only throttling and server errors are worth another attempt
                    let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    last_error = Some(DigestError::General(format!(
                        "HTTP {}: {}",
                        status,
                        status.canonical_reason().unwrap_or("Unknown")
                    )));
                    if !retryable {
                        break;
                    }
                }
                Err(e) => {
                    let retryable = e.is_timeout() || e.is_connect();
                    last_error = Some(DigestError::Http(e));
                    if !retryable {
                        break;
                    }
                }
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!("Attempt {} failed for start={}, retrying in {:?}", attempt + 1, start, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        error!("Failed to fetch arXiv page start={} after retries", start);
        Err(last_error.unwrap_or_else(|| DigestError::General("Unknown fetch error".to_string())))
    }

    async fn apply_rate_limit(&self) {
        let min_interval = Duration::from_secs(self.config.min_interval_seconds);
        let mut last = self.last_request.lock().await;

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < min_interval {
                let wait_time = min_interval - elapsed;
                debug!("Rate limiting arXiv: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[async_trait]
impl FeedSource for ArxivClient {
    fn source_name(&self) -> String {
        format!("arXiv ({})", self.categories.join(","))
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<Vec<Item>> {
        if self.categories.is_empty() {
            return Err(DigestError::General("No arXiv categories configured".to_string()));
        }

        let query = Self::build_query(&self.categories, window);
        info!("Fetching arXiv papers: {}", query);

        let mut parser = ArxivParser::new();
        let mut items = Vec::new();
        let mut start = 0;
        let page_size = self.config.page_size.max(1);

        while start < self.config.max_results {
            let count = page_size.min(self.config.max_results - start);

            let body = match self.fetch_page(&query, start, count).await {
                Ok(body) => body,
                // Keep what earlier pages produced
                Err(e) if start > 0 => {
                    warn!("Stopping pagination at start={}: {}", start, e);
                    break;
                }
                Err(e) => return Err(e),
            };

            let page = parser.parse_page(&body)?;
            items.extend(page.items);

            if page.entries_seen < count {
                break;
            }
            start += count;
        }

        info!("Fetched {} papers from arXiv", items.len());
        Ok(items)
    }
}

/// Saved arXiv Atom response on disk, for offline runs
pub struct AtomFileSource {
    path: PathBuf,
}

impl AtomFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FeedSource for AtomFileSource {
    fn source_name(&self) -> String {
        format!("file {}", self.path.display())
    }

    /// Window filtering is left to the run, like any other source
    async fn fetch(&self, _window: &FetchWindow) -> Result<Vec<Item>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        if !ArxivParser::is_valid_feed_content(&content) {
            return Err(DigestError::Parse(format!(
                "{} does not look like an Atom feed",
                self.path.display()
            )));
        }

        let page = ArxivParser::new().parse_page(&content)?;
        info!("Loaded {} papers from {}", page.items.len(), self.path.display());
        Ok(page.items)
    }
}
