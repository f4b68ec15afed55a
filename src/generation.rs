//! Text-generation collaborator boundary.
//!
//! Provides the [`TextGenerator`] trait (consolidated answers, categories,
//! tags, text improvement) and a remote chat-completions implementation.
//! Every operation is best-effort: callers fall back to a deterministic
//! default on failure rather than aborting the run — the fallback values
//! live here so all call sites agree on them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GenerationConfig;

/// Answer used when consolidation fails and no member answer exists.
pub const FALLBACK_ANSWER: &str =
    "We don't have a detailed answer for this yet. Please contact support for assistance.";

/// Category used when categorization fails.
pub const FALLBACK_CATEGORY: &str = "general";

/// Trait for the text-generation collaborator.
///
/// All methods are fallible; none of them are load-bearing for correctness.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Consolidate a set of questions (and any answers found with them) into
    /// one canonical answer.
    async fn consolidate(&self, questions: &[&str], answers: &[&str]) -> Result<String>;

    /// Assign a category to a question text.
    async fn categorize(&self, text: &str) -> Result<String>;

    /// Extract a small tag set from a question text.
    async fn extract_tags(&self, text: &str) -> Result<Vec<String>>;

    /// Improve a text given surrounding context, returning the revised text.
    async fn improve(&self, text: &str, context: &str) -> Result<String>;
}

/// Create a text generator from config.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn TextGenerator>> {
    Ok(Box::new(RemoteGenerator::new(config)?))
}

/// Chat-completions-backed generator.
pub struct RemoteGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
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

impl RemoteGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        let api_key = std::env::var(&config.api_key_env).ok();

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Send one prompt, return the first choice's text.
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let mut request = self.client.post(&self.endpoint).json(&serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("generation request failed")?;
        anyhow::ensure!(
            response.status().is_success(),
            "generation endpoint returned HTTP {}",
            response.status()
        );

        let body: ChatResponse = response
            .json()
            .await
            .context("malformed generation response")?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .context("generation endpoint returned no choices")?;
        Ok(choice.message.content.trim().to_string())
    }
}

#[async_trait]
impl TextGenerator for RemoteGenerator {
    async fn consolidate(&self, questions: &[&str], answers: &[&str]) -> Result<String> {
        let mut prompt = String::from(
            "These user questions ask the same thing. Write one clear, complete answer.\n\nQuestions:\n",
        );
        for q in questions {
            prompt.push_str("- ");
            prompt.push_str(q);
            prompt.push('\n');
        }
        if !answers.is_empty() {
            prompt.push_str("\nAnswers observed so far:\n");
            for a in answers {
                prompt.push_str("- ");
                prompt.push_str(a);
                prompt.push('\n');
            }
        }
        self.complete("You write concise FAQ answers.", &prompt).await
    }

    async fn categorize(&self, text: &str) -> Result<String> {
        let prompt = format!(
            "Assign a single short lowercase category to this question. Reply with the category only.\n\n{text}"
        );
        let category = self.complete("You categorize FAQ questions.", &prompt).await?;
        Ok(category.to_lowercase())
    }

    async fn extract_tags(&self, text: &str) -> Result<Vec<String>> {
        let prompt = format!(
            "Extract up to 5 short lowercase tags from this question as a JSON array of strings. Reply with JSON only.\n\n{text}"
        );
        let raw = self.complete("You extract tags from FAQ questions.", &prompt).await?;
        let tags: Vec<String> =
            serde_json::from_str(raw.trim()).context("tag response was not a JSON string array")?;
        Ok(tags)
    }

    async fn improve(&self, text: &str, context: &str) -> Result<String> {
        let prompt = format!("Context:\n{context}\n\nImprove this text, keeping its meaning:\n{text}");
        self.complete("You edit text for clarity.", &prompt).await
    }
}
