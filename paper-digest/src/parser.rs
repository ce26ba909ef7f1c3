use crate::types::{DigestError, Item, Result};
use crate::utils::{arxiv, text};
use feed_rs::parser;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Items parsed from one page of an arXiv Atom response
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub items: Vec<Item>,
    /// Raw entries in the page, including skipped ones. Drives pagination.
    pub entries_seen: usize,
    pub skipped: usize,
}

pub struct ArxivParser {
    seen_ids: HashSet<String>,
}

impl ArxivParser {
    pub fn new() -> Self {
        Self {
            seen_ids: HashSet::new(),
        }
    }

    pub fn parse_page(&mut self, content: &str) -> Result<ParsedPage> {
        debug!("Parsing arXiv response ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| DigestError::Parse(format!("Failed to parse feed: {}", e)))?;

        let mut page = ParsedPage {
            entries_seen: feed.entries.len(),
            ..Default::default()
        };

        for entry in feed.entries {
            // arXiv reports query errors as a single entry under /api/errors
            if entry.id.contains("/api/errors") {
                let message = entry
                    .summary
                    .map(|s| s.content)
                    .unwrap_or_else(|| "unknown arXiv API error".to_string());
                return Err(DigestError::Parse(format!("arXiv API error: {}", message.trim())));
            }

            match self.parse_entry(entry) {
                Some(item) => page.items.push(item),
                None => page.skipped += 1,
            }
        }

        info!(
            "Parsed {} items from {} entries ({} skipped)",
            page.items.len(),
            page.entries_seen,
            page.skipped
        );

        Ok(page)
    }

    fn parse_entry(&mut self, entry: feed_rs::model::Entry) -> Option<Item> {
        let id = match arxiv::extract_id(&entry.id) {
            Some(id) => id,
            None => {
                warn!("Skipping entry without an arXiv id: {:?}", entry.id);
                return None;
            }
        };

        if self.seen_ids.contains(&id) {
            debug!("Skipping duplicate entry: {}", id);
            return None;
        }

        let title = entry
            .title
            .map(|t| text::normalize_whitespace(&t.content))
            .unwrap_or_default();
        if title.is_empty() {
            warn!("Skipping entry {} with an empty title", id);
            return None;
        }

        let published_at = match entry.published.or(entry.updated) {
            Some(at) => at,
            None => {
                warn!("Skipping entry {} without a publication date", id);
                return None;
            }
        };

        let abstract_text = entry
            .summary
            .map(|s| text::normalize_whitespace(&s.content))
            .unwrap_or_default();

        let authors = entry
            .authors
            .into_iter()
            .map(|a| text::normalize_whitespace(&a.name))
            .filter(|name| !name.is_empty())
            .collect();

        // Set semantics, first occurrence keeps its position
        let mut seen_categories = HashSet::new();
        let categories = entry
            .categories
            .into_iter()
            .map(|c| c.term.trim().to_string())
            .filter(|term| !term.is_empty() && seen_categories.insert(term.clone()))
            .collect();

        let link = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref() == Some("alternate") || l.rel.is_none())
            .map(|l| l.href.clone())
            .unwrap_or_else(|| arxiv::abs_url(&id));

        let pdf_url = entry
            .links
            .iter()
            .find(|l| l.media_type.as_deref() == Some("application/pdf"))
            .map(|l| l.href.clone())
            .or_else(|| arxiv::pdf_from_abs(&link));

        self.seen_ids.insert(id.clone());

        Some(Item {
            id,
            title,
            abstract_text,
            authors,
            categories,
            link,
            pdf_url,
            published_at,
        })
    }

    pub fn is_valid_feed_content(content: &str) -> bool {
        let head: String = text::truncate_chars(content, 2048).to_lowercase();
        head.contains("<feed") && head.contains("http://www.w3.org/2005/atom")
    }

    pub fn clear_deduplication_cache(&mut self) {
        self.seen_ids.clear();
        debug!("Cleared deduplication cache");
    }

    pub fn seen_count(&self) -> usize {
        self.seen_ids.len()
    }
}

impl Default for ArxivParser {
    fn default() -> Self {
        Self::new()
    }
}
