pub mod config;
pub mod digest;
pub mod fetcher;
pub mod llm_adapter;
pub mod normalizer;
pub mod notify;
pub mod parser;
pub mod run;
pub mod scorer;
pub mod store;
pub mod traits;
pub mod types;
pub mod utils;

pub use config::{ConfigArgs, ConfigError, DigestConfig, Weights};
pub use digest::{DigestCompiler, RankedPaper};
pub use fetcher::{ArxivClient, AtomFileSource};
pub use llm_adapter::{InterestEstimator, MockEvaluator, OllamaEvaluator, OpenAiEvaluator};
pub use normalizer::Normalizer;
pub use notify::{EmailSender, TelegramSender};
pub use parser::ArxivParser;
pub use run::DigestRun;
pub use scorer::{Scorer, ScoringInput};
pub use store::{MemoryStore, PgStore};
pub use traits::{DigestSender, FeedSource, RunStore, TextEvaluator};
pub use types::*;
