//! Remote embedding provider over an OpenAI-style HTTP endpoint.
//!
//! Responses are cached per text in-process: the endpoint is deterministic
//! for identical input, so re-embedding the same question across runs is
//! wasted latency and quota.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::SimilarityProvider;
use crate::config::SimilarityConfig;

/// Dimensions produced by the default embedding model.
pub const REMOTE_EMBEDDING_DIM: usize = 1536;

pub struct RemoteSimilarityProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    cache: Mutex<HashMap<String, Vec<f32>>>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl RemoteSimilarityProvider {
    pub fn new(config: &SimilarityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(var = %config.api_key_env, "no API key in environment, requests will be unauthenticated");
        }

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            cache: Mutex::new(HashMap::new()),
        })
    }

    async fn request_embeddings(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut request = self.client.post(&self.endpoint).json(&serde_json::json!({
            "model": self.model,
            "input": inputs,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("embedding request failed")?;

        anyhow::ensure!(
            response.status().is_success(),
            "embedding endpoint returned HTTP {}",
            response.status()
        );

        let body: EmbeddingsResponse = response
            .json()
            .await
            .context("malformed embedding response")?;

        anyhow::ensure!(
            body.data.len() == inputs.len(),
            "embedding endpoint returned {} vectors for {} inputs",
            body.data.len(),
            inputs.len()
        );

        Ok(body.data.into_iter().map(|row| row.embedding).collect())
    }

    fn cached(&self, text: &str) -> Option<Vec<f32>> {
        self.cache
            .lock()
            .expect("embedding cache lock poisoned")
            .get(text)
            .cloned()
    }

    fn store(&self, text: &str, embedding: &[f32]) {
        self.cache
            .lock()
            .expect("embedding cache lock poisoned")
            .insert(text.to_string(), embedding.to_vec());
    }
}

#[async_trait]
impl SimilarityProvider for RemoteSimilarityProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cached(text) {
            return Ok(hit);
        }

        let mut vectors = self.request_embeddings(&[text]).await?;
        let embedding = vectors
            .pop()
            .context("embedding endpoint returned no vector")?;
        self.store(text, &embedding);
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        // Only request the cache misses, preserving input order on return.
        let mut out: Vec<Option<Vec<f32>>> = texts.iter().map(|t| self.cached(t)).collect();
        let misses: Vec<(usize, &str)> = out
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| (i, texts[i]))
            .collect();

        if !misses.is_empty() {
            let inputs: Vec<&str> = misses.iter().map(|(_, t)| *t).collect();
            let vectors = self.request_embeddings(&inputs).await?;
            for ((index, text), embedding) in misses.into_iter().zip(vectors) {
                self.store(text, &embedding);
                out[index] = Some(embedding);
            }
        }

        Ok(out
            .into_iter()
            .map(|v| v.expect("all cache misses were filled"))
            .collect())
    }

    fn dimensions(&self) -> usize {
        REMOTE_EMBEDDING_DIM
    }
}
