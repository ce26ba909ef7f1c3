use crate::config::{ConfigError, EvaluatorConfig, EvaluatorProvider};
use crate::traits::TextEvaluator;
use crate::types::{DigestError, InterestEstimate, Item, PaperSummary, Result};
use crate::utils::text;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Abstracts are cut to this many characters before being sent out.
pub const MAX_ABSTRACT_CHARS: usize = 2000;

pub const INTEREST_SYSTEM_PROMPT: &str = "You are an expert AI researcher acting as a paper reviewer. \
You assess the claimed novelty and impact of AI papers from their abstracts. \
You are critical and not easily impressed.";

const INTEREST_PROMPT: &str = "Rate this paper's CLAIMED novelty/impact on an integer scale from 1 to 10, based on its abstract.

Title: {title}
Abstract: {abstract}

Scale:
- 1-3: Incremental improvement, minor tweak, or application of existing methods.
- 4-6: Solid contribution, valuable benchmark, or interesting application.
- 7-8: Significant advance, state-of-the-art results on major benchmarks, or novel architecture.
- 9-10: Major breakthrough, foundational work, or paradigm shift.

Respond with valid JSON only:
{\"score\": <integer 1-10>, \"reasoning\": \"<one sentence>\"}";

pub const SUMMARY_SYSTEM_PROMPT: &str = "You are an expert AI researcher acting as a technical writer. \
You summarize AI papers for a weekly digest. \
You are concise and focus on why the work matters.";

const SUMMARY_PROMPT: &str = "Summarize this paper for a technical audience.

Title: {title}
Abstract: {abstract}

Respond with a JSON object with these fields:
- \"contribution\": one sentence on what is new.
- \"significance\": one sentence on why it matters.
- \"limitations\": one sentence on constraints or caveats, or null.
- \"category\": best fit topic (e.g. \"LLMs\", \"Computer Vision\", \"Robotics\").
- \"takeaway\": a punchy 3-5 word takeaway.

Output valid JSON only.";

pub fn interest_prompt(title: &str, abstract_text: &str) -> String {
    fill_template(INTEREST_PROMPT, title, abstract_text)
}

pub fn summary_prompt(title: &str, abstract_text: &str) -> String {
    fill_template(SUMMARY_PROMPT, title, abstract_text)
}

fn fill_template(template: &str, title: &str, abstract_text: &str) -> String {
    template
        .replace("{title}", title)
        .replace("{abstract}", text::truncate_chars(abstract_text, MAX_ABSTRACT_CHARS))
}

/// Find a JSON object in model output: the whole reply, a ```json fence, or the outermost `{...}`.
pub fn extract_json_object(reply: &str) -> Option<Value> {
    let reply = reply.trim();

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(reply) {
        return Some(value);
    }

    if let Some(fence_start) = reply.find("```") {
        let after = &reply[fence_start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(fence_end) = after.find("```") {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(after[..fence_end].trim()) {
                return Some(value);
            }
        }
    }

    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&reply[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Parse an interest reply into a 1-10 rating. Decimal ratings are rounded first.
pub fn parse_interest_reply(reply: &str) -> Option<(u8, Option<String>)> {
    let value = extract_json_object(reply)?;
    let score = value.get("score")?.as_f64()?;
    if !score.is_finite() {
        return None;
    }

    let rounded = score.round();
    if !(1.0..=10.0).contains(&rounded) {
        return None;
    }

    let reasoning = value
        .get("reasoning")
        .and_then(|r| r.as_str())
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    Some((rounded as u8, reasoning))
}

/// Parse a summary reply. Missing fields are filled from `fallback`.
pub fn parse_summary_reply(reply: &str, fallback: &PaperSummary) -> Option<PaperSummary> {
    let value = extract_json_object(reply)?;
    let field = |name: &str| {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .map(|s| text::normalize_whitespace(s))
            .filter(|s| !s.is_empty())
    };

    let contribution = field("contribution");
    let takeaway = field("takeaway");
    if contribution.is_none() && takeaway.is_none() {
        return None;
    }

    Some(PaperSummary {
        takeaway: takeaway.unwrap_or_else(|| fallback.takeaway.clone()),
        contribution: contribution.unwrap_or_else(|| fallback.contribution.clone()),
        significance: field("significance").unwrap_or_else(|| fallback.significance.clone()),
        limitations: field("limitations"),
        topic: field("category").or_else(|| field("topic")),
    })
}

/// Summary built without any model call
pub fn fallback_summary(item: &Item, interest: Option<&InterestEstimate>) -> PaperSummary {
    let first = text::first_sentence(&item.abstract_text);
    let contribution = if first.is_empty() { item.title.clone() } else { first };
    let significance = interest
        .and_then(|i| i.rationale.clone())
        .unwrap_or_else(|| "Significance not assessed.".to_string());

    PaperSummary {
        takeaway: text::ellipsize(&contribution, 100),
        contribution,
        significance,
        limitations: None,
        topic: None,
    }
}

/// Claimed-novelty estimator. Every failure resolves to the fixed fallback.
#[derive(Clone)]
pub struct InterestEstimator {
    evaluator: Arc<dyn TextEvaluator>,
    timeout: Duration,
}

impl InterestEstimator {
    pub fn new(evaluator: Arc<dyn TextEvaluator>, timeout: Duration) -> Self {
        Self { evaluator, timeout }
    }

    pub fn evaluator(&self) -> Arc<dyn TextEvaluator> {
        Arc::clone(&self.evaluator)
    }

    pub async fn estimate(&self, title: &str, abstract_text: &str) -> InterestEstimate {
        let prompt = interest_prompt(title, abstract_text);
        let reply = match self.complete(INTEREST_SYSTEM_PROMPT, &prompt).await {
            Some(reply) => reply,
            None => return InterestEstimate::fallback(),
        };

        match parse_interest_reply(&reply) {
            Some((raw, rationale)) => {
                debug!("Interest {} for '{}'", raw, title);
                InterestEstimate::from_rating(raw, rationale)
            }
            None => {
                warn!("Malformed interest reply for '{}', using fallback", title);
                InterestEstimate::fallback()
            }
        }
    }

    /// Returns the summary and whether the fallback was used
    pub async fn summarize(&self, item: &Item, interest: Option<&InterestEstimate>) -> (PaperSummary, bool) {
        let fallback = fallback_summary(item, interest);
        let prompt = summary_prompt(&item.title, &item.abstract_text);

        let parsed = match self.complete(SUMMARY_SYSTEM_PROMPT, &prompt).await {
            Some(reply) => parse_summary_reply(&reply, &fallback),
            None => None,
        };

        match parsed {
            Some(summary) => (summary, false),
            None => {
                warn!("No usable summary for {}, using fallback", item.id);
                (fallback, true)
            }
        }
    }

    async fn complete(&self, system: &str, prompt: &str) -> Option<String> {
        match tokio::time::timeout(self.timeout, self.evaluator.complete(system, prompt)).await {
            Ok(Ok(reply)) => Some(reply),
            Ok(Err(e)) => {
                warn!("Evaluator {} failed: {}", self.evaluator.evaluator_name(), e);
                None
            }
            Err(_) => {
                warn!("Evaluator {} timed out after {:?}", self.evaluator.evaluator_name(), self.timeout);
                None
            }
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI chat completions in JSON mode
pub struct OpenAiEvaluator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or(ConfigError::MissingSetting("OPENAI_API_KEY"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.openai_base_url.trim_end_matches('/')),
            api_key,
            model: config.openai_model.clone(),
        })
    }
}

#[async_trait]
impl TextEvaluator for OpenAiEvaluator {
    fn evaluator_name(&self) -> String {
        format!("openai:{}", self.model)
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = OpenAiRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: 0.0,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DigestError::Evaluator(format!("OpenAI error {}: {}", status, body)));
        }

        let reply: OpenAiResponse = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DigestError::Evaluator("Empty response from OpenAI".to_string()))
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    format: &'static str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: ReplyMessage,
}

/// Local Ollama server, `/api/chat` with JSON output
pub struct OllamaEvaluator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", config.ollama_base_url.trim_end_matches('/')),
            model: config.ollama_model.clone(),
        })
    }
}

#[async_trait]
impl TextEvaluator for OllamaEvaluator {
    fn evaluator_name(&self) -> String {
        format!("ollama:{}", self.model)
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = OllamaRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
            stream: false,
            format: "json",
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DigestError::Evaluator(format!("Ollama error {}: {}", status, body)));
        }

        let reply: OllamaResponse = response.json().await?;
        reply
            .message
            .content
            .ok_or_else(|| DigestError::Evaluator("Empty response from Ollama".to_string()))
    }
}

#[derive(Debug, Clone)]
enum MockBehavior {
    /// Keyword heuristic over the prompt text
    Heuristic,
    /// Same reply for every call
    Fixed(String),
    Fail,
    /// Never resolves; exercises the timeout path
    Hang,
}

/// Deterministic evaluator for development and tests
pub struct MockEvaluator {
    behavior: MockBehavior,
    overrides: HashMap<String, String>,
    response_delay_ms: u64,
    calls: AtomicUsize,
}

impl MockEvaluator {
    pub fn new() -> Self {
        Self {
            behavior: MockBehavior::Heuristic,
            overrides: HashMap::new(),
            response_delay_ms: 0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fixed(reply: impl Into<String>) -> Self {
        Self {
            behavior: MockBehavior::Fixed(reply.into()),
            ..Self::new()
        }
    }

    pub fn failing() -> Self {
        Self {
            behavior: MockBehavior::Fail,
            ..Self::new()
        }
    }

    pub fn hanging() -> Self {
        Self {
            behavior: MockBehavior::Hang,
            ..Self::new()
        }
    }

    /// Reply verbatim for prompts whose title matches exactly
    pub fn with_reply(mut self, title: &str, reply: impl Into<String>) -> Self {
        self.overrides.insert(title.to_string(), reply.into());
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn prompt_field<'a>(prompt: &'a str, label: &str) -> &'a str {
        prompt
            .lines()
            .find_map(|line| line.strip_prefix(label))
            .map(str::trim)
            .unwrap_or("")
    }

    fn heuristic_rating(title: &str, abstract_text: &str) -> u8 {
        let body = format!("{} {}", title, abstract_text).to_lowercase();
        let strong = ["breakthrough", "state-of-the-art", "foundation", "paradigm", "first"];
        let solid = ["novel", "benchmark", "outperform", "scalable", "efficient"];
        let weak = ["incremental", "minor", "revisit", "case study"];

        let mut rating: i32 = 5;
        rating += 2 * strong.iter().filter(|w| body.contains(*w)).count() as i32;
        rating += solid.iter().filter(|w| body.contains(*w)).count() as i32;
        rating -= 2 * weak.iter().filter(|w| body.contains(*w)).count() as i32;
        rating.clamp(1, 10) as u8
    }

    fn heuristic_reply(system: &str, prompt: &str) -> String {
        let title = Self::prompt_field(prompt, "Title:");
        let abstract_text = Self::prompt_field(prompt, "Abstract:");

        if system == INTEREST_SYSTEM_PROMPT {
            let rating = Self::heuristic_rating(title, abstract_text);
            serde_json::json!({
                "score": rating,
                "reasoning": format!("Keyword heuristic rated '{}' at {}/10.", title, rating),
            })
            .to_string()
        } else {
            let contribution = text::first_sentence(abstract_text);
            serde_json::json!({
                "contribution": contribution,
                "significance": format!("Relevant to readers following {}.", title),
                "limitations": null,
                "category": "General",
                "takeaway": text::ellipsize(title, 40),
            })
            .to_string()
        }
    }
}

impl Default for MockEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextEvaluator for MockEvaluator {
    fn evaluator_name(&self) -> String {
        "mock".to_string()
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.response_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.response_delay_ms)).await;
        }

        let title = Self::prompt_field(prompt, "Title:");
        if let Some(reply) = self.overrides.get(title) {
            return Ok(reply.clone());
        }

        match &self.behavior {
            MockBehavior::Heuristic => Ok(Self::heuristic_reply(system, prompt)),
            MockBehavior::Fixed(reply) => Ok(reply.clone()),
            MockBehavior::Fail => Err(DigestError::Evaluator("mock evaluator failure".to_string())),
            MockBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(DigestError::Evaluator("unreachable".to_string()))
            }
        }
    }
}

/// Build the evaluator selected by configuration
pub fn evaluator_from_config(config: &EvaluatorConfig) -> Result<Arc<dyn TextEvaluator>> {
    let evaluator: Arc<dyn TextEvaluator> = match config.provider {
        EvaluatorProvider::OpenAi => Arc::new(OpenAiEvaluator::new(config)?),
        EvaluatorProvider::Ollama => Arc::new(OllamaEvaluator::new(config)?),
        EvaluatorProvider::Mock => Arc::new(MockEvaluator::new()),
    };
    info!("Using text evaluator: {}", evaluator.evaluator_name());
    Ok(evaluator)
}
