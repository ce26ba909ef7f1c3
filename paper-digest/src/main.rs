use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use paper_digest::config::{DigestConfig, EvaluatorProvider};
use paper_digest::digest::digest_subject;
use paper_digest::llm_adapter::evaluator_from_config;
use paper_digest::{
    ArxivClient, AtomFileSource, ConfigArgs, Digest, DigestRun, DigestSender, EmailSender, FeedSource,
    MemoryStore, PgStore, RunStore, TelegramSender,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "paper-digest")]
#[command(about = "Fetch, rank and deliver a weekly research-paper digest")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute one digest run
    Run {
        /// Use the deterministic mock evaluator instead of a language model
        #[arg(long)]
        offline: bool,

        /// Skip email and Telegram delivery
        #[arg(long)]
        no_send: bool,

        /// Where to write the rendered Markdown
        #[arg(long, default_value = "latest_digest.md")]
        output: PathBuf,

        /// Keep everything in memory instead of PostgreSQL
        #[arg(long)]
        dry_run: bool,

        /// Read a saved arXiv Atom response instead of calling the API
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Send the latest stored digest
    Send {
        #[arg(long)]
        email: bool,

        #[arg(long)]
        telegram: bool,
    },
    /// Print the validated effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env must be loaded before clap reads the environment
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = cli.config.into_config();

    match cli.command {
        Command::Run {
            offline,
            no_send,
            output,
            dry_run,
            input,
        } => {
            if offline {
                config.evaluator.provider = EvaluatorProvider::Mock;
            }
            run_digest(config, no_send, output, dry_run, input).await
        }
        Command::Send { email, telegram } => {
            // Neither flag means both channels
            let (email, telegram) = if !email && !telegram { (true, true) } else { (email, telegram) };
            send_latest(&config, email, telegram).await
        }
        Command::Config => {
            config.validate().context("Invalid configuration")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run_digest(
    config: DigestConfig,
    no_send: bool,
    output: PathBuf,
    dry_run: bool,
    input: Option<PathBuf>,
) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let store: Arc<dyn RunStore> = if dry_run {
        info!("Dry run: using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(open_store(&config).await?)
    };

    let source: Arc<dyn FeedSource> = match input {
        Some(path) => Arc::new(AtomFileSource::new(path)),
        None => Arc::new(ArxivClient::new(config.fetch.clone(), config.categories.clone())?),
    };

    let evaluator = evaluator_from_config(&config.evaluator)?;
    let run = DigestRun::new(config.clone(), source, evaluator, store);
    let run_id = run.id();

    let outcome = run
        .execute()
        .await
        .with_context(|| format!("Run {} failed", run_id))?;

    tokio::fs::write(&output, &outcome.digest.markdown)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        "Digest with {} papers written to {} ({} interest fallbacks)",
        outcome.digest.len(),
        output.display(),
        outcome.fallback_count
    );

    if no_send {
        return Ok(());
    }

    let sent = deliver(&config, &outcome.digest, true, true).await;
    if sent == 0 {
        warn!("Digest was not delivered to any channel");
    }
    Ok(())
}

async fn send_latest(config: &DigestConfig, email: bool, telegram: bool) -> Result<()> {
    let store = open_store(config).await?;
    let digest = match store.latest_digest().await? {
        Some(digest) => digest,
        None => bail!("No completed digest found. Run `paper-digest run` first."),
    };

    let sent = deliver(config, &digest, email, telegram).await;
    if sent == 0 {
        bail!("Digest was not sent to any channel");
    }
    Ok(())
}

async fn open_store(config: &DigestConfig) -> Result<PgStore> {
    let store = PgStore::new(&config.database_url)
        .await
        .context("Failed to connect to PostgreSQL (check DATABASE_URL)")?;
    store.migrate().await?;
    Ok(store)
}

/// Returns how many channels accepted the digest
async fn deliver(config: &DigestConfig, digest: &Digest, email: bool, telegram: bool) -> usize {
    let mut senders: Vec<Box<dyn DigestSender>> = Vec::new();

    if email {
        match &config.email {
            Some(email_config) => senders.push(Box::new(EmailSender::new(email_config.clone()))),
            None => warn!("Email not configured. Set SMTP_HOST, SMTP_USER, SMTP_PASS and EMAIL_TO."),
        }
    }

    if telegram {
        match &config.telegram {
            Some(telegram_config) => match TelegramSender::new(telegram_config.clone()) {
                Ok(sender) => senders.push(Box::new(sender)),
                Err(e) => error!("Failed to set up Telegram: {}", e),
            },
            None => warn!("Telegram not configured. Set TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID."),
        }
    }

    let subject = digest_subject(&digest.window);
    let mut sent = 0;
    for sender in senders {
        match sender.send(&subject, &digest.markdown).await {
            Ok(()) => {
                info!("Delivered digest via {}", sender.channel_name());
                sent += 1;
            }
            Err(e) => error!("Delivery via {} failed: {}", sender.channel_name(), e),
        }
    }
    sent
}
