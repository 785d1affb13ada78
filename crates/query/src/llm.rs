use anyhow::{Context, Result};
use async_trait::async_trait;
use extract::LanguageModel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANSWER_SYSTEM: &str = "You answer questions about documents the user uploaded. \
Never claim a document says something that is not in the provided text.";

/// Sampling knobs passed through to the model server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub temperature: f32,
    /// Cap on generated tokens
    pub num_predict: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            num_predict: 512,
        }
    }
}

/// Free-text completions for answering questions.
#[derive(Clone)]
pub struct QueryLLM {
    base_url: String,
    model: String,
    system: String,
    options: SamplingOptions,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: SamplingOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done_reason: Option<String>,
}

impl QueryLLM {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            system: ANSWER_SYSTEM.to_string(),
            options: SamplingOptions::default(),
            client,
        }
    }

    pub fn with_options(mut self, options: SamplingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            system: &self.system,
            stream: false,
            options: self.options,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach model server at {}", self.base_url))?;

        if !response.status().is_success() {
            anyhow::bail!("Answer generation failed: {}", response.status());
        }

        let body: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse generation response")?;

        if body.done_reason.as_deref() == Some("length") {
            tracing::debug!(model = %self.model, "Answer truncated at num_predict");
        }
        Ok(body.response)
    }
}

impl Default for QueryLLM {
    fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "llama3".to_string(),
            Duration::from_secs(120),
        )
    }
}

#[async_trait]
impl LanguageModel for QueryLLM {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.generate(prompt).await
    }
}
