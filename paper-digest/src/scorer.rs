use crate::config::{ConfigError, Weights};
use crate::types::{DigestError, InterestEstimate, Item, Result, RunId, Score, Signal, SignalSet};
use std::cmp::Ordering;
use tracing::{debug, info};

/// Everything the ranker needs for one item
#[derive(Debug, Clone)]
pub struct ScoringInput<'a> {
    pub item: &'a Item,
    pub signals: SignalSet,
    /// Must be settled before ranking starts
    pub interest: Option<InterestEstimate>,
}

/// Fixed-weight linear blend with a total, deterministic ordering
pub struct Scorer {
    weights: Weights,
    top_n: usize,
}

impl Scorer {
    pub fn new(weights: Weights, top_n: usize) -> std::result::Result<Self, ConfigError> {
        weights.validate()?;
        Ok(Self { weights, top_n })
    }

    pub fn final_score(&self, signals: &SignalSet) -> f64 {
        Signal::ALL
            .iter()
            .map(|s| self.weights.get(*s) * signals.value(*s))
            .sum()
    }

    /// Score, sort and keep the top N. Ranks are 1-based positions.
    pub fn rank(&self, run_id: RunId, inputs: Vec<ScoringInput<'_>>) -> Result<Vec<Score>> {
        let mut scored = Vec::with_capacity(inputs.len());

        for input in inputs {
            let interest = input.interest.ok_or_else(|| DigestError::MissingInterest {
                item_id: input.item.id.clone(),
            })?;

            let mut signals = input.signals;
            signals.insert(Signal::Interest, interest.value);
            let final_score = self.final_score(&signals);

            scored.push((input.item, signals, final_score, interest.rationale));
        }

        scored.sort_by(|a, b| compare_ranked(a.2, a.0, b.2, b.0));

        let total = scored.len();
        scored.truncate(self.top_n);
        info!("Ranked {} items, kept top {}", total, scored.len());

        let scores = scored
            .into_iter()
            .enumerate()
            .map(|(idx, (item, signals, final_score, rationale))| {
                debug!("#{} {} final={:.4}", idx + 1, item.id, final_score);
                Score {
                    run_id,
                    item_id: item.id.clone(),
                    signals,
                    final_score,
                    rank: (idx + 1) as u32,
                    rationale,
                }
            })
            .collect();

        Ok(scores)
    }
}

/// Higher final first, then earlier publication, then smaller id
fn compare_ranked(a_final: f64, a: &Item, b_final: f64, b: &Item) -> Ordering {
    b_final
        .total_cmp(&a_final)
        .then_with(|| a.published_at.cmp(&b.published_at))
        .then_with(|| a.id.cmp(&b.id))
}
