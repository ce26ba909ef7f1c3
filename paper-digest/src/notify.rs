use crate::config::{EmailConfig, TelegramConfig};
use crate::traits::DigestSender;
use crate::types::{DigestError, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Telegram rejects messages longer than this many UTF-16 code units
pub const TELEGRAM_MAX_MESSAGE: usize = 4096;

/// SMTP delivery with STARTTLS. The body is the Markdown digest as plain text.
pub struct EmailSender {
    config: EmailConfig,
}

impl EmailSender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, subject: &str, markdown: &str) -> Result<Message> {
        let from = self
            .config
            .from
            .parse::<Mailbox>()
            .map_err(|e| DigestError::Delivery(format!("Invalid sender address: {}", e)))?;

        let mut builder = Message::builder().from(from).subject(subject);
        for recipient in &self.config.to {
            let to = recipient
                .parse::<Mailbox>()
                .map_err(|e| DigestError::Delivery(format!("Invalid recipient {}: {}", recipient, e)))?;
            builder = builder.to(to);
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(markdown.to_string())
            .map_err(|e| DigestError::Delivery(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl DigestSender for EmailSender {
    fn channel_name(&self) -> String {
        "email".to_string()
    }

    async fn send(&self, subject: &str, markdown: &str) -> Result<()> {
        if self.config.to.is_empty() {
            return Err(DigestError::Delivery("No email recipients configured".to_string()));
        }

        let message = self.build_message(subject, markdown)?;
        let mailer = SmtpTransport::starttls_relay(&self.config.smtp_host)
            .map_err(|e| DigestError::Delivery(format!("SMTP setup failed: {}", e)))?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .timeout(Some(Duration::from_secs(30)))
            .build();

        info!("Sending email to {}", self.config.to.join(", "));

        // lettre's SmtpTransport is blocking
        tokio::task::spawn_blocking(move || mailer.send(&message))
            .await
            .map_err(|e| DigestError::Delivery(format!("Email task failed: {}", e)))?
            .map_err(|e| DigestError::Delivery(format!("Failed to send email via SMTP: {}", e)))?;

        info!("Email sent successfully");
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API `sendMessage`, one call per chunk
pub struct TelegramSender {
    client: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramSender {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }

    async fn send_chunk(&self, chunk: &str) -> Result<()> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token
        );

        let request = SendMessageRequest {
            chat_id: &self.config.chat_id,
            text: chunk,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();
        let reply: TelegramResponse = response.json().await?;

        if !status.is_success() || !reply.ok {
            return Err(DigestError::Delivery(format!(
                "Telegram rejected message ({}): {}",
                status,
                reply.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DigestSender for TelegramSender {
    fn channel_name(&self) -> String {
        "telegram".to_string()
    }

    /// Telegram has no subject line; the digest heading carries the title
    async fn send(&self, _subject: &str, markdown: &str) -> Result<()> {
        let text = convert_for_telegram(markdown);
        let chunks = split_message(&text, TELEGRAM_MAX_MESSAGE);

        for (i, chunk) in chunks.iter().enumerate() {
            if chunks.len() > 1 {
                info!("Sending Telegram message part {}/{}", i + 1, chunks.len());
            }
            self.send_chunk(chunk).await?;
        }

        info!("Telegram messages sent successfully");
        Ok(())
    }
}

/// Telegram Markdown has no headings, images or quotes: headings become bold lines
pub fn convert_for_telegram(markdown: &str) -> String {
    let without_images = strip_images(markdown);

    let mut lines = Vec::new();
    let mut blank_run = 0;
    for line in without_images.lines() {
        let line = line.strip_prefix("> ").unwrap_or(line);
        let trimmed_heading = line.trim_start_matches('#');
        let heading_level = line.len() - trimmed_heading.len();

        let converted = if (1..=3).contains(&heading_level) && trimmed_heading.starts_with(' ') {
            format!("*{}*", trimmed_heading.trim())
        } else {
            line.to_string()
        };

        // Collapse runs of blank lines to a single one
        if converted.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(converted);
    }

    lines.join("\n").trim().to_string()
}

/// Remove `![alt](target)` references
fn strip_images(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("![") {
        let candidate = &rest[start..];
        let end = candidate
            .find("](")
            .and_then(|mid| candidate[mid..].find(')').map(|close| mid + close + 1));

        match end {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &candidate[end..];
            }
            None => {
                out.push_str(&rest[..start + 2]);
                rest = &rest[start + 2..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Message length as Telegram counts it. Emoji outside the BMP count twice.
pub fn telegram_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Split on paragraph boundaries, then lines, then characters. Every chunk fits
/// `limit` as measured by [`telegram_len`].
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    // One surrogate pair must always fit
    let limit = limit.max(2);
    if telegram_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        if telegram_len(paragraph) > limit {
            flush(&mut chunks, &mut current);
            for line in paragraph.split('\n') {
                for piece in hard_wrap(line, limit) {
                    if telegram_len(&current) + telegram_len(&piece) + 1 > limit {
                        flush(&mut chunks, &mut current);
                    }
                    current.push_str(&piece);
                    current.push('\n');
                }
            }
        } else {
            if telegram_len(&current) + telegram_len(paragraph) + 2 > limit {
                flush(&mut chunks, &mut current);
            }
            current.push_str(paragraph);
            current.push_str("\n\n");
        }
    }
    flush(&mut chunks, &mut current);

    if chunks.iter().any(|c| telegram_len(c) > limit) {
        warn!("Telegram chunk exceeds {} UTF-16 units", limit);
    }
    chunks
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    current.clear();
}

fn hard_wrap(line: &str, limit: usize) -> Vec<String> {
    if telegram_len(line) <= limit {
        return vec![line.to_string()];
    }

    let mut pieces = Vec::new();
    let mut piece = String::new();
    let mut width = 0;
    for c in line.chars() {
        if width + c.len_utf16() > limit {
            pieces.push(std::mem::take(&mut piece));
            width = 0;
        }
        piece.push(c);
        width += c.len_utf16();
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}
