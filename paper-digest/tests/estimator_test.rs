mod common;

use anyhow::Result;
use common::{init_tracing, paper};
use paper_digest::llm_adapter::{
    extract_json_object, fallback_summary, parse_interest_reply, parse_summary_reply, MAX_ABSTRACT_CHARS,
};
use paper_digest::{InterestEstimator, MockEvaluator, TextEvaluator, FALLBACK_INTEREST};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn build_estimator(evaluator: MockEvaluator, timeout: Duration) -> (InterestEstimator, Arc<MockEvaluator>) {
    let mock = Arc::new(evaluator);
    let dyn_evaluator: Arc<dyn TextEvaluator> = mock.clone();
    (InterestEstimator::new(dyn_evaluator, timeout), mock)
}

#[tokio::test]
async fn test_reply_formats_are_accepted() -> Result<()> {
    init_tracing();

    assert_eq!(
        parse_interest_reply(r#"{"score": 8, "reasoning": "New objective"}"#),
        Some((8, Some("New objective".to_string())))
    );
    assert_eq!(
        parse_interest_reply("```json\n{\"score\": 3}\n```"),
        Some((3, None))
    );
    assert_eq!(
        parse_interest_reply("Sure! Here is my rating: {\"score\": 10, \"reasoning\": \" \"} Hope it helps."),
        Some((10, None))
    );
    assert_eq!(parse_interest_reply(r#"{"score": 7.6}"#), Some((8, None)));

    assert!(extract_json_object("[1, 2, 3]").is_none());
    assert!(extract_json_object("no json here").is_none());

    info!("Reply extraction covered");
    Ok(())
}

#[tokio::test]
async fn test_invalid_scores_are_rejected() -> Result<()> {
    init_tracing();

    assert_eq!(parse_interest_reply(r#"{"score": 0}"#), None);
    assert_eq!(parse_interest_reply(r#"{"score": 11}"#), None);
    assert_eq!(parse_interest_reply(r#"{"score": 10.6}"#), None);
    assert_eq!(parse_interest_reply(r#"{"score": "high"}"#), None);
    assert_eq!(parse_interest_reply(r#"{"reasoning": "no score"}"#), None);
    Ok(())
}

#[tokio::test]
async fn test_rating_rescales_to_unit_interval() -> Result<()> {
    init_tracing();

    let (estimator, _) = build_estimator(
        MockEvaluator::fixed(r#"{"score": 10, "reasoning": "Landmark"}"#),
        Duration::from_secs(5),
    );
    let estimate = estimator.estimate("A title", "An abstract.").await;
    assert_eq!(estimate.value, 1.0);
    assert!(!estimate.fallback);
    assert_eq!(estimate.rationale.as_deref(), Some("Landmark"));

    let (estimator, _) = estimator_with(r#"{"score": 1}"#);
    assert_eq!(estimator.estimate("A title", "An abstract.").await.value, 0.0);

    let (estimator, _) = estimator_with(r#"{"score": 4}"#);
    let value = estimator.estimate("A title", "An abstract.").await.value;
    assert!((value - 1.0 / 3.0).abs() < 1e-9);
    Ok(())
}

fn estimator_with(reply: &str) -> (InterestEstimator, Arc<MockEvaluator>) {
    build_estimator(MockEvaluator::fixed(reply), Duration::from_secs(5))
}

#[tokio::test]
async fn test_bad_replies_fall_back_to_midpoint() -> Result<()> {
    init_tracing();

    for reply in [r#"{"score": 42}"#, r#"{"score": "eight"}"#, "I cannot rate this.", ""] {
        let (estimator, mock) = estimator_with(reply);
        let estimate = estimator.estimate("A title", "An abstract.").await;
        assert_eq!(estimate.value, FALLBACK_INTEREST, "reply {:?}", reply);
        assert!(estimate.fallback);
        assert!(estimate.rationale.is_none());
        assert_eq!(mock.call_count(), 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_evaluator_failure_falls_back() -> Result<()> {
    init_tracing();

    let (estimator, mock) = build_estimator(MockEvaluator::failing(), Duration::from_secs(5));
    let estimate = estimator.estimate("A title", "An abstract.").await;
    assert_eq!(estimate.value, 0.5);
    assert!(estimate.fallback);
    assert_eq!(mock.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_hanging_evaluator_times_out() -> Result<()> {
    init_tracing();

    let (estimator, _) = build_estimator(MockEvaluator::hanging(), Duration::from_millis(50));
    let started = std::time::Instant::now();
    let estimate = estimator.estimate("A title", "An abstract.").await;

    assert_eq!(estimate.value, 0.5);
    assert!(estimate.fallback);
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[tokio::test]
async fn test_per_title_overrides_win() -> Result<()> {
    init_tracing();

    let item = paper("2401.00077", 1, &["cs.AI"]);
    let (estimator, _) = build_estimator(
        MockEvaluator::failing().with_reply(&item.title, r#"{"score": 7}"#),
        Duration::from_secs(5),
    );

    let estimate = estimator.estimate(&item.title, &item.abstract_text).await;
    assert!((estimate.value - 6.0 / 9.0).abs() < 1e-9);

    let other = estimator.estimate("Some other title", "Text.").await;
    assert!(other.fallback);
    Ok(())
}

#[tokio::test]
async fn test_heuristic_mock_is_deterministic() -> Result<()> {
    init_tracing();

    let (estimator, _) = build_estimator(MockEvaluator::new(), Duration::from_secs(5));
    let strong = estimator
        .estimate("A breakthrough foundation model", "A novel state-of-the-art method.")
        .await;
    let weak = estimator
        .estimate("An incremental case study", "We revisit a minor detail.")
        .await;

    assert!(!strong.fallback);
    assert!(!weak.fallback);
    assert!(strong.value > weak.value);
    assert_eq!(
        strong,
        estimator
            .estimate("A breakthrough foundation model", "A novel state-of-the-art method.")
            .await
    );
    Ok(())
}

#[tokio::test]
async fn test_summary_parsing_and_fallback() -> Result<()> {
    init_tracing();

    let item = paper("2401.00100", 1, &["cs.CL"]);
    let fallback = fallback_summary(&item, None);
    assert_eq!(fallback.contribution, "We study problem 2401.00100.");
    assert_eq!(fallback.significance, "Significance not assessed.");
    assert!(fallback.takeaway.chars().count() <= 103);

    let parsed = parse_summary_reply(
        r#"{"contribution": "A new tokenizer.", "significance": "Cheaper inference.", "category": "NLP"}"#,
        &fallback,
    )
    .expect("summary should parse");
    assert_eq!(parsed.contribution, "A new tokenizer.");
    assert_eq!(parsed.significance, "Cheaper inference.");
    assert_eq!(parsed.topic.as_deref(), Some("NLP"));
    assert_eq!(parsed.takeaway, fallback.takeaway);

    assert!(parse_summary_reply(r#"{"significance": "only this"}"#, &fallback).is_none());

    let (estimator, _) = build_estimator(MockEvaluator::failing(), Duration::from_secs(5));
    let (summary, used_fallback) = estimator.summarize(&item, None).await;
    assert!(used_fallback);
    assert_eq!(summary, fallback);
    Ok(())
}

#[tokio::test]
async fn test_long_abstracts_are_truncated_in_prompt() -> Result<()> {
    init_tracing();

    let abstract_text = "x".repeat(MAX_ABSTRACT_CHARS * 2);
    let prompt = paper_digest::llm_adapter::interest_prompt("Long", &abstract_text);
    assert!(prompt.contains(&"x".repeat(MAX_ABSTRACT_CHARS)));
    assert!(!prompt.contains(&"x".repeat(MAX_ABSTRACT_CHARS + 1)));
    Ok(())
}
