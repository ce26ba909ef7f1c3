use crate::traits::RunStore;
use crate::types::{Digest, DigestError, Item, Result, RunId, RunRecord, RunStatus, Score, Signal};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// PostgreSQL-backed store
pub struct PgStore {
    db: Pool<Postgres>,
}

impl PgStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = PgPool::connect(database_url).await?;
        Ok(Self { db })
    }

    /// Apply the bundled schema. Every statement is idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .map_err(|e| DigestError::Database(e.into()))?;
        info!("Database schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl RunStore for PgStore {
    async fn create_run(&self, record: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, status, window_start, window_end, items_count, created_at, completed_at, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(record.window.start)
        .bind(record.window.end)
        .bind(record.items_count as i32)
        .bind(record.created_at)
        .bind(record.completed_at)
        .bind(&record.error)
        .execute(&self.db)
        .await?;

        info!("Created run {}", record.id);
        Ok(())
    }

    async fn update_run(&self, record: &RunRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = $1, items_count = $2, completed_at = $3, error = $4
            WHERE id = $5
            "#,
        )
        .bind(record.status.as_str())
        .bind(record.items_count as i32)
        .bind(record.completed_at)
        .bind(&record.error)
        .bind(record.id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DigestError::General(format!("Run not found: {}", record.id)));
        }

        debug!("Run {} is now {}", record.id, record.status);
        Ok(())
    }

    async fn save_items(&self, items: &[Item]) -> Result<usize> {
        let mut tx = self.db.begin().await?;
        let mut inserted = 0;

        for item in items {
            let result = sqlx::query(
                r#"
                INSERT INTO papers (arxiv_id, title, abstract, authors, categories, link, pdf_url, published_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (arxiv_id) DO NOTHING
                "#,
            )
            .bind(&item.id)
            .bind(&item.title)
            .bind(&item.abstract_text)
            .bind(&item.authors)
            .bind(&item.categories)
            .bind(&item.link)
            .bind(&item.pdf_url)
            .bind(item.published_at)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        info!("Saved {} papers ({} new)", items.len(), inserted);
        Ok(inserted)
    }

    async fn save_scores(&self, run_id: RunId, scores: &[Score]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        for score in scores {
            sqlx::query(
                r#"
                INSERT INTO paper_scores (run_id, arxiv_id, recency_score, category_score, interest_score,
                                          author_score, signals, final_score, rank, rationale)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(run_id)
            .bind(&score.item_id)
            .bind(score.signals.get(Signal::Recency))
            .bind(score.signals.get(Signal::Category))
            .bind(score.signals.get(Signal::Interest))
            .bind(score.signals.get(Signal::Author))
            .bind(Json(&score.signals))
            .bind(score.final_score)
            .bind(score.rank as i32)
            .bind(&score.rationale)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Saved {} scores for run {}", scores.len(), run_id);
        Ok(())
    }

    async fn save_digest(&self, digest: &Digest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO digests (run_id, markdown, sections)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(digest.run_id)
        .bind(&digest.markdown)
        .bind(Json(digest))
        .execute(&self.db)
        .await?;

        info!("Saved digest for run {}", digest.run_id);
        Ok(())
    }

    async fn latest_digest(&self) -> Result<Option<Digest>> {
        let row = sqlx::query(
            r#"
            SELECT d.sections
            FROM digests d
            JOIN runs r ON r.id = d.run_id
            WHERE r.status = $1
            ORDER BY r.completed_at DESC NULLS LAST, d.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(RunStatus::Complete.as_str())
        .fetch_optional(&self.db)
        .await?;

        row.map(|row| -> Result<Digest> {
            let Json(sections): Json<serde_json::Value> = row.try_get("sections")?;
            decode_digest(sections)
        })
        .transpose()
    }
}

/// Rebuild a digest from its stored JSONB sections. A document that no longer
/// matches the current shape is a database decode error, not a panic.
pub fn decode_digest(sections: serde_json::Value) -> Result<Digest> {
    serde_json::from_value(sections).map_err(|e| DigestError::Database(sqlx::Error::Decode(Box::new(e))))
}

#[derive(Default)]
struct MemoryState {
    runs: HashMap<RunId, RunRecord>,
    items: HashMap<String, Item>,
    scores: HashMap<RunId, Vec<Score>>,
    digests: Vec<Digest>,
}

/// In-process store for dry runs and tests
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run(&self, run_id: RunId) -> Option<RunRecord> {
        self.state.read().await.runs.get(&run_id).cloned()
    }

    pub async fn scores(&self, run_id: RunId) -> Vec<Score> {
        self.state
            .read()
            .await
            .scores
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn item_count(&self) -> usize {
        self.state.read().await.items.len()
    }

    pub async fn digest_count(&self) -> usize {
        self.state.read().await.digests.len()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, record: &RunRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if state.runs.contains_key(&record.id) {
            return Err(DigestError::General(format!("Run already exists: {}", record.id)));
        }
        state.runs.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_run(&self, record: &RunRecord) -> Result<()> {
        let mut state = self.state.write().await;
        match state.runs.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(DigestError::General(format!("Run not found: {}", record.id))),
        }
    }

    async fn save_items(&self, items: &[Item]) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut inserted = 0;
        for item in items {
            if !state.items.contains_key(&item.id) {
                state.items.insert(item.id.clone(), item.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn save_scores(&self, run_id: RunId, scores: &[Score]) -> Result<()> {
        let mut state = self.state.write().await;
        state.scores.insert(run_id, scores.to_vec());
        Ok(())
    }

    async fn save_digest(&self, digest: &Digest) -> Result<()> {
        let mut state = self.state.write().await;
        if state.digests.iter().any(|d| d.run_id == digest.run_id) {
            return Err(DigestError::General(format!("Digest already saved for run {}", digest.run_id)));
        }
        state.digests.push(digest.clone());
        Ok(())
    }

    async fn latest_digest(&self) -> Result<Option<Digest>> {
        let state = self.state.read().await;
        let latest = state
            .digests
            .iter()
            .filter_map(|d| {
                let run = state.runs.get(&d.run_id)?;
                (run.status == RunStatus::Complete).then_some((run.completed_at, d))
            })
            .max_by_key(|(completed_at, _)| *completed_at)
            .map(|(_, d)| d.clone());
        Ok(latest)
    }
}
