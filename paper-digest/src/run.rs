use crate::config::DigestConfig;
use crate::digest::{DigestCompiler, RankedPaper};
use crate::llm_adapter::InterestEstimator;
use crate::normalizer::Normalizer;
use crate::scorer::{Scorer, ScoringInput};
use crate::traits::{FeedSource, RunStore, TextEvaluator};
use crate::types::{
    DigestError, InterestEstimate, Item, PaperSummary, Result, RunId, RunOutcome, RunRecord, RunStatus,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// One pass of fetch, score, compile. Consumed by `execute`, so a run is never reused.
pub struct DigestRun {
    record: RunRecord,
    config: DigestConfig,
    now: DateTime<Utc>,
    source: Arc<dyn FeedSource>,
    estimator: InterestEstimator,
    store: Arc<dyn RunStore>,
    persisted: bool,
}

impl DigestRun {
    pub fn new(
        config: DigestConfig,
        source: Arc<dyn FeedSource>,
        evaluator: Arc<dyn TextEvaluator>,
        store: Arc<dyn RunStore>,
    ) -> Self {
        let now = Utc::now();
        let estimator = InterestEstimator::new(
            evaluator,
            Duration::from_secs(config.evaluator.timeout_seconds),
        );
        let window = Normalizer::new(&config.normalizer).window_ending_at(now);

        Self {
            record: RunRecord {
                id: Uuid::new_v4(),
                status: RunStatus::Pending,
                window,
                items_count: 0,
                created_at: now,
                completed_at: None,
                error: None,
            },
            config,
            now,
            source,
            estimator,
            store,
            persisted: false,
        }
    }

    /// Pin the reference time used for the window and recency signal
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self.record.created_at = now;
        self.record.window = Normalizer::new(&self.config.normalizer).window_ending_at(now);
        self
    }

    /// Override the per-call evaluator timeout
    pub fn with_evaluator_timeout(mut self, timeout: Duration) -> Self {
        self.estimator = InterestEstimator::new(self.estimator.evaluator(), timeout);
        self
    }

    pub fn id(&self) -> RunId {
        self.record.id
    }

    pub fn status(&self) -> RunStatus {
        self.record.status
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    /// Move to `next` if the state machine allows it
    pub fn transition(&mut self, next: RunStatus) -> Result<()> {
        let from = self.record.status;
        if !from.can_transition_to(next) {
            return Err(DigestError::InvalidTransition { from, to: next });
        }

        self.record.status = next;
        if next.is_terminal() {
            self.record.completed_at = Some(Utc::now());
        }
        info!("Run {}: {} -> {}", self.record.id, from, next);
        Ok(())
    }

    async fn advance(&mut self, next: RunStatus) -> Result<()> {
        self.transition(next)?;
        self.store.update_run(&self.record).await
    }

    pub async fn execute(mut self) -> Result<RunOutcome> {
        info!(
            "Starting run {} for window {} .. {}",
            self.record.id, self.record.window.start, self.record.window.end
        );

        match self.run_stages().await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.mark_failed(&e).await;
                Err(e)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<RunOutcome> {
        // Configuration problems fail before any external call
        self.config.validate()?;
        let scorer = Scorer::new(self.config.weights, self.config.top_n)?;
        let normalizer = Normalizer::new(&self.config.normalizer);
        let compiler = DigestCompiler::new(self.config.breakthrough_count);

        self.store.create_run(&self.record).await?;
        self.persisted = true;

        // Fetching
        self.advance(RunStatus::Fetching).await?;
        let fetched = self.source.fetch(&self.record.window).await?;
        let fetched_count = fetched.len();
        let items = dedup_items(normalizer.within_window(fetched, self.now));
        info!(
            "Fetched {} items from {}, {} inside the window",
            fetched_count,
            self.source.source_name(),
            items.len()
        );
        self.store.save_items(&items).await?;
        self.record.items_count = items.len();

        // Scoring
        self.advance(RunStatus::Scoring).await?;
        let estimates = self.estimate_all(&items).await;
        let fallback_count = estimates.values().filter(|e| e.fallback).count();
        if fallback_count > 0 {
            warn!("{} of {} interest estimates used the fallback", fallback_count, items.len());
        }

        let inputs: Vec<ScoringInput<'_>> = items
            .iter()
            .map(|item| ScoringInput {
                item,
                signals: normalizer.normalize(item, self.now),
                interest: estimates.get(&item.id).cloned(),
            })
            .collect();
        let scores = scorer.rank(self.record.id, inputs)?;
        self.store.save_scores(self.record.id, &scores).await?;

        // Compiling
        self.advance(RunStatus::Compiling).await?;
        let by_id: HashMap<&str, &Item> = items.iter().map(|i| (i.id.as_str(), i)).collect();
        let ranked_items: Vec<&Item> = scores
            .iter()
            .filter_map(|s| by_id.get(s.item_id.as_str()).copied())
            .collect();
        let summaries = self.summarize_all(&ranked_items, &estimates).await;

        let mut ranked = Vec::with_capacity(scores.len());
        for score in &scores {
            let item = by_id
                .get(score.item_id.as_str())
                .copied()
                .ok_or_else(|| DigestError::General(format!("Ranked item {} vanished", score.item_id)))?;
            let summary = summaries
                .get(score.item_id.as_str())
                .ok_or_else(|| DigestError::General(format!("No summary for {}", score.item_id)))?;
            ranked.push(RankedPaper { score, item, summary });
        }

        let digest = compiler.compile(self.record.id, self.record.window, &ranked);
        self.store.save_digest(&digest).await?;

        self.advance(RunStatus::Complete).await?;
        info!(
            "Run {} complete: {} items, {} ranked",
            self.record.id,
            self.record.items_count,
            scores.len()
        );

        Ok(RunOutcome {
            record: self.record.clone(),
            scores,
            digest,
            fallback_count,
        })
    }

    /// Every estimate settles (value or fallback) before this returns
    async fn estimate_all(&self, items: &[Item]) -> HashMap<String, InterestEstimate> {
        let estimator = &self.estimator;
        stream::iter(items)
            .map(|item| async move {
                let estimate = estimator.estimate(&item.title, &item.abstract_text).await;
                (item.id.clone(), estimate)
            })
            .buffer_unordered(self.config.evaluator.max_concurrency)
            .collect()
            .await
    }

    async fn summarize_all(
        &self,
        items: &[&Item],
        estimates: &HashMap<String, InterestEstimate>,
    ) -> HashMap<String, PaperSummary> {
        let estimator = &self.estimator;
        stream::iter(items.iter().copied())
            .map(|item| async move {
                let (summary, _fallback) = estimator.summarize(item, estimates.get(&item.id)).await;
                (item.id.clone(), summary)
            })
            .buffer_unordered(self.config.evaluator.max_concurrency)
            .collect()
            .await
    }

    async fn mark_failed(&mut self, cause: &DigestError) {
        error!("Run {} failed: {}", self.record.id, cause);
        if self.record.status.is_terminal() {
            return;
        }

        self.record.error = Some(cause.to_string());
        if self.transition(RunStatus::Failed).is_err() {
            return;
        }

        if self.persisted {
            if let Err(e) = self.store.update_run(&self.record).await {
                error!("Failed to record failure of run {}: {}", self.record.id, e);
            }
        }
    }
}

/// First occurrence of each id wins
fn dedup_items(items: Vec<Item>) -> Vec<Item> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect()
}
