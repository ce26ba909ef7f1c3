mod common;

use anyhow::Result;
use chrono::Duration;
use common::{init_tracing, test_now};
use paper_digest::store::decode_digest;
use paper_digest::{
    Digest, DigestEntry, DigestError, FetchWindow, MemoryStore, PaperSummary, RunRecord,
    RunStatus, RunStore,
};
use tracing::info;
use uuid::Uuid;

fn record(status: RunStatus, completed_hours_ago: Option<i64>) -> RunRecord {
    let now = test_now();
    RunRecord {
        id: Uuid::new_v4(),
        status,
        window: FetchWindow::ending_at(now, 7),
        items_count: 1,
        created_at: now - Duration::hours(48),
        completed_at: completed_hours_ago.map(|h| now - Duration::hours(h)),
        error: None,
    }
}

fn digest_for(run: &RunRecord, title: &str) -> Digest {
    Digest {
        run_id: run.id,
        window: run.window,
        breakthroughs: vec![DigestEntry {
            rank: 1,
            item_id: "2401.00001".to_string(),
            title: title.to_string(),
            link: "https://arxiv.org/abs/2401.00001".to_string(),
            category: "cs.AI".to_string(),
            final_score: 0.91,
            summary: PaperSummary {
                takeaway: "Takeaway".to_string(),
                contribution: "Contribution".to_string(),
                significance: "Significance".to_string(),
                limitations: None,
                topic: Some("agents".to_string()),
            },
        }],
        worth_skimming: Vec::new(),
        trends: Vec::new(),
        markdown: format!("# {}", title),
    }
}

#[tokio::test]
async fn test_decode_digest_round_trips_stored_json() -> Result<()> {
    init_tracing();

    let run = record(RunStatus::Complete, Some(1));
    let digest = digest_for(&run, "Stored");
    let decoded = decode_digest(serde_json::to_value(&digest)?)?;

    assert_eq!(decoded, digest);
    Ok(())
}

#[tokio::test]
async fn test_decode_digest_rejects_malformed_sections() -> Result<()> {
    init_tracing();

    let result = decode_digest(serde_json::json!({ "bogus": 1 }));
    info!("Malformed sections decoded to: {:?}", result);

    assert!(matches!(result, Err(DigestError::Database(_))));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_run_is_rejected() -> Result<()> {
    init_tracing();

    let store = MemoryStore::new();
    let run = record(RunStatus::Pending, None);
    store.create_run(&run).await?;

    assert!(store.create_run(&run).await.is_err());
    assert_eq!(store.run(run.id).await, Some(run));
    Ok(())
}

#[tokio::test]
async fn test_update_of_unknown_run_fails() -> Result<()> {
    init_tracing();

    let store = MemoryStore::new();
    let run = record(RunStatus::Scoring, None);

    assert!(store.update_run(&run).await.is_err());
    assert!(store.run(run.id).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_latest_digest_skips_incomplete_runs() -> Result<()> {
    init_tracing();

    let store = MemoryStore::new();
    assert!(store.latest_digest().await?.is_none());

    let older = record(RunStatus::Complete, Some(30));
    let newer = record(RunStatus::Complete, Some(2));
    let failed = record(RunStatus::Failed, Some(1));
    for run in [&older, &newer, &failed] {
        store.create_run(run).await?;
    }
    store.save_digest(&digest_for(&older, "Older")).await?;
    store.save_digest(&digest_for(&newer, "Newer")).await?;
    store.save_digest(&digest_for(&failed, "Failed")).await?;

    let latest = store.latest_digest().await?.expect("a complete digest");
    assert_eq!(latest.run_id, newer.id);
    assert_eq!(store.digest_count().await, 3);

    // Same run cannot get a second digest
    assert!(store.save_digest(&digest_for(&newer, "Again")).await.is_err());
    Ok(())
}
