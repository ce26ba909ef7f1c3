mod common;

use anyhow::Result;
use clap::Parser;
use common::init_tracing;
use paper_digest::config::{EvaluatorProvider, NormalizerConfig, MAX_LOOKBACK_DAYS};
use paper_digest::llm_adapter::evaluator_from_config;
use paper_digest::{ConfigArgs, ConfigError, DigestConfig, DigestError, Signal, TextEvaluator, Weights};

#[derive(Parser)]
struct TestCli {
    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::test]
async fn test_defaults_are_valid() -> Result<()> {
    init_tracing();

    let config = DigestConfig::default();
    config.validate()?;
    assert_eq!(config.top_n, 20);
    assert_eq!(config.breakthrough_count, 5);
    assert_eq!(config.normalizer.lookback_days, 7);
    assert!((config.weights.sum() - 1.0).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_weight_validation() -> Result<()> {
    init_tracing();

    assert!(matches!(
        Weights::new(0.3, 0.3, 0.3).validate(),
        Err(ConfigError::WeightSum { .. })
    ));
    assert!(matches!(
        Weights::new(0.6, 0.6, -0.2).validate(),
        Err(ConfigError::WeightOutOfRange {
            signal: Signal::Interest,
            ..
        })
    ));
    assert!(Weights::new(0.25, 0.25, 0.5).validate().is_ok());
    assert!(Weights::new(0.2, 0.2, 0.4).with_author(0.2).validate().is_ok());
    Ok(())
}

#[tokio::test]
async fn test_config_validation_errors() -> Result<()> {
    init_tracing();

    let no_priority = DigestConfig {
        normalizer: NormalizerConfig {
            priority_categories: Vec::new(),
            ..NormalizerConfig::default()
        },
        ..DigestConfig::default()
    };
    assert_eq!(
        no_priority.validate(),
        Err(ConfigError::EmptyPriorityCategories { weight: 0.2 })
    );

    // Without a category weight the list may be empty
    let no_category_weight = DigestConfig {
        weights: Weights::new(0.5, 0.0, 0.5),
        ..no_priority
    };
    assert!(no_category_weight.validate().is_ok());

    let mut zero_lookback = DigestConfig::default();
    zero_lookback.normalizer.lookback_days = 0;
    assert_eq!(
        zero_lookback.validate(),
        Err(ConfigError::InvalidLookback { days: 0, max: MAX_LOOKBACK_DAYS })
    );

    let mut huge_lookback = DigestConfig::default();
    huge_lookback.normalizer.lookback_days = 100_000_000;
    assert_eq!(
        huge_lookback.validate(),
        Err(ConfigError::InvalidLookback {
            days: 100_000_000,
            max: MAX_LOOKBACK_DAYS
        })
    );
    huge_lookback.normalizer.lookback_days = MAX_LOOKBACK_DAYS;
    assert!(huge_lookback.validate().is_ok());

    // An author weight needs at least one author to match
    let author_weight = DigestConfig::default().with_weights(Weights::new(0.2, 0.2, 0.4).with_author(0.2));
    assert_eq!(
        author_weight.validate(),
        Err(ConfigError::EmptyPriorityAuthors { weight: 0.2 })
    );
    let with_authors = DigestConfig {
        normalizer: NormalizerConfig {
            priority_authors: vec!["hinton".to_string()],
            ..NormalizerConfig::default()
        },
        ..author_weight
    };
    assert!(with_authors.validate().is_ok());

    let mut bad_baseline = DigestConfig::default();
    bad_baseline.normalizer.category_baseline = 1.0;
    assert_eq!(bad_baseline.validate(), Err(ConfigError::InvalidBaseline(1.0)));

    assert_eq!(
        DigestConfig::default().with_buckets(3, 5).validate(),
        Err(ConfigError::InvalidBuckets {
            top_n: 3,
            breakthroughs: 5
        })
    );
    assert!(DigestConfig::default().with_buckets(0, 0).validate().is_err());
    assert!(DigestConfig::default().with_buckets(5, 5).validate().is_ok());

    assert_eq!(
        DigestConfig::default().with_concurrency(0, 60).validate(),
        Err(ConfigError::InvalidConcurrency)
    );
    assert_eq!(
        DigestConfig::default().with_concurrency(4, 0).validate(),
        Err(ConfigError::InvalidConcurrency)
    );
    Ok(())
}

#[tokio::test]
async fn test_overrides_layer_over_defaults() -> Result<()> {
    init_tracing();

    let config = ConfigArgs {
        categories: Some(vec![" cs.AI".to_string(), String::new(), "cs.RO ".to_string()]),
        lookback_days: Some(3),
        priority_authors: Some(vec!["Hinton".to_string()]),
        weight_recency: Some(0.2),
        weight_category: Some(0.2),
        weight_interest: Some(0.4),
        weight_author: Some(0.2),
        top_n: Some(10),
        breakthroughs: Some(2),
        llm_provider: Some(EvaluatorProvider::Mock),
        openai_api_key: Some(String::new()),
        smtp_host: Some("smtp.example.com".to_string()),
        smtp_user: Some("digest@example.com".to_string()),
        email_to: Some(vec!["reader@example.com".to_string()]),
        telegram_bot_token: Some("123:abc".to_string()),
        ..ConfigArgs::default()
    }
    .into_config();

    assert_eq!(config.categories, vec!["cs.AI", "cs.RO"]);
    assert_eq!(config.normalizer.lookback_days, 3);
    assert_eq!(config.normalizer.priority_authors, vec!["hinton"]);
    assert_eq!(config.weights, Weights::new(0.2, 0.2, 0.4).with_author(0.2));
    assert_eq!((config.top_n, config.breakthrough_count), (10, 2));
    assert_eq!(config.evaluator.provider, EvaluatorProvider::Mock);
    assert!(config.evaluator.openai_api_key.is_none());
    config.validate()?;

    let email = config.email.expect("email should be configured");
    assert_eq!(email.smtp_port, 587);
    assert_eq!(email.from, "digest@example.com");
    assert_eq!(email.to, vec!["reader@example.com"]);

    // Token without a chat id leaves Telegram off
    assert!(config.telegram.is_none());
    Ok(())
}

#[tokio::test]
async fn test_command_line_flags() -> Result<()> {
    init_tracing();

    let cli = TestCli::try_parse_from([
        "paper-digest",
        "--categories",
        "cs.AI,cs.LG",
        "--weight-recency",
        "0.1",
        "--weight-category",
        "0.1",
        "--weight-interest",
        "0.8",
        "--llm-provider",
        "openai",
        "--telegram-bot-token",
        "123:abc",
        "--telegram-chat-id=-100200",
    ])?;
    let config = cli.config.into_config();

    assert_eq!(config.categories, vec!["cs.AI", "cs.LG"]);
    assert!((config.weights.interest - 0.8).abs() < 1e-9);
    assert_eq!(config.evaluator.provider, EvaluatorProvider::OpenAi);
    let telegram = config.telegram.expect("telegram should be configured");
    assert_eq!(telegram.chat_id, "-100200");
    assert_eq!(telegram.api_base, "https://api.telegram.org");
    Ok(())
}

#[tokio::test]
async fn test_openai_requires_key() -> Result<()> {
    init_tracing();

    let mut config = DigestConfig::default();
    config.evaluator.provider = EvaluatorProvider::OpenAi;
    config.evaluator.openai_api_key = None;

    match evaluator_from_config(&config.evaluator) {
        Err(DigestError::Config(ConfigError::MissingSetting(name))) => assert_eq!(name, "OPENAI_API_KEY"),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("OpenAI evaluator needs an API key"),
    }

    config.evaluator.provider = EvaluatorProvider::Mock;
    assert_eq!(evaluator_from_config(&config.evaluator)?.evaluator_name(), "mock");
    Ok(())
}
