use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::prompt;

/// Text completion backend. Implementations must be safe to share across sessions.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    json_mode: bool,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>, // "json" for structured output
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url,
            model,
            json_mode: true,
            client,
        }
    }

    /// Plain text output instead of forced JSON
    pub fn free_text(mut self) -> Self {
        self.json_mode = false;
        self
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: self.json_mode.then_some("json"),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "llama3".to_string(),
            Duration::from_secs(60),
        )
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.generate(prompt).await
    }
}

/// Cut the outermost `open`..`close` span out of a completion that may carry prose or fences
fn json_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn parse_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    // Whichever bracket opens first is the outermost value
    let mut shapes = [('{', '}'), ('[', ']')];
    shapes.sort_by_key(|(open, _)| trimmed.find(*open).unwrap_or(usize::MAX));
    shapes
        .into_iter()
        .filter_map(|(open, close)| json_span(trimmed, open, close))
        .find_map(|span| serde_json::from_str(span).ok())
}

/// Non-empty string value of `key`; models sometimes write the string "null"
pub fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}

/// Ask for JSON, asking the model to repair its own output when it is not valid
pub async fn generate_json_with_retry(
    llm: &dyn LanguageModel,
    prompt: &str,
    max_retries: usize,
) -> Result<serde_json::Value> {
    let attempts = max_retries.max(1);
    for attempt in 0..attempts {
        let response = llm.complete(prompt).await?;

        if let Some(value) = parse_json(&response) {
            return Ok(value);
        }
        debug!(attempt = attempt + 1, "LLM returned invalid JSON, asking for a fix");

        // If invalid, retry with correction prompt
        if attempt < attempts - 1 {
            let corrected = llm.complete(&prompt::build_retry_prompt(&response)).await?;
            if let Some(value) = parse_json(&corrected) {
                return Ok(value);
            }
        }
    }

    warn!(attempts = attempts, "Giving up on JSON output");
    anyhow::bail!("Failed to get valid JSON after {} retries", attempts)
}
