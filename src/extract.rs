//! Question-extraction collaborator boundary.
//!
//! Extraction itself happens outside the core (an upstream service reads
//! incoming messages and pulls out candidate questions); this module only
//! fixes the interface the pipeline consumes, plus a thin remote adapter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GenerationConfig;

/// One question pulled out of an item by the extraction collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedQuestion {
    pub text: String,
    #[serde(default)]
    pub answer_text: Option<String>,
    /// Extraction confidence in `[0.0, 1.0]`.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

/// Trait for the extraction collaborator consumed by the pipeline.
#[async_trait]
pub trait QuestionExtractor: Send + Sync {
    /// Extract candidate questions from one item's content.
    async fn extract(&self, content: &str) -> Result<Vec<ExtractedQuestion>>;
}

/// Remote extractor hitting the same chat-completions endpoint as the
/// generation collaborator, expecting a JSON array back.
pub struct RemoteExtractor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl RemoteExtractor {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl QuestionExtractor for RemoteExtractor {
    async fn extract(&self, content: &str) -> Result<Vec<ExtractedQuestion>> {
        let prompt = format!(
            "Extract the customer questions from this message as a JSON array of \
             {{\"text\", \"answer_text\", \"confidence\"}} objects. Reply with JSON only. \
             Return [] if there are none.\n\n{content}"
        );

        let mut request = self.client.post(&self.endpoint).json(&serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You extract questions from customer messages."},
                {"role": "user", "content": prompt},
            ],
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("extraction request failed")?;
        anyhow::ensure!(
            response.status().is_success(),
            "extraction endpoint returned HTTP {}",
            response.status()
        );

        let body: ChatResponse = response
            .json()
            .await
            .context("malformed extraction response")?;
        let raw = body
            .choices
            .into_iter()
            .next()
            .context("extraction endpoint returned no choices")?
            .message
            .content;

        let questions: Vec<ExtractedQuestion> = serde_json::from_str(raw.trim())
            .context("extraction response was not a JSON question array")?;
        Ok(questions
            .into_iter()
            .map(|mut q| {
                q.confidence = q.confidence.clamp(0.0, 1.0);
                q
            })
            .collect())
    }
}
