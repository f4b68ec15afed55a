//! Similarity Provider boundary.
//!
//! Provides the [`SimilarityProvider`] trait (text → embedding, embedding
//! pair → bounded similarity score) and a remote HTTP implementation. The
//! provider is created via [`create_provider`] from configuration. Provider
//! failures are surfaced as errors — callers decide whether a fallback
//! applies.

pub mod remote;

use anyhow::Result;
use async_trait::async_trait;

/// Trait for embedding text and scoring embedding similarity.
///
/// `embed` is deterministic for identical input and may be cached by
/// implementations. `similarity` is symmetric and bounded to `[0, 1]`.
#[async_trait]
pub trait SimilarityProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for
    /// batched requests.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Bounded similarity score for two embeddings.
    fn similarity(&self, a: &[f32], b: &[f32]) -> f64 {
        cosine_similarity(a, b)
    }

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize;
}

/// Cosine similarity clamped into `[0, 1]`.
///
/// Negative cosine floors at 0 so the score stays in the contract range;
/// mismatched or zero-length vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

/// Create a similarity provider from config.
///
/// Currently only `"remote"` is supported (OpenAI-style embeddings endpoint).
pub fn create_provider(
    config: &crate::config::SimilarityConfig,
) -> Result<Box<dyn SimilarityProvider>> {
    match config.provider.as_str() {
        "remote" => {
            let provider = remote::RemoteSimilarityProvider::new(config)?;
            Ok(Box::new(provider))
        }
        other => anyhow::bail!("unknown similarity provider: {other}. Supported: remote"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![0.6f32, 0.8, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_opposite_clamps_to_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![-1.0f32, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = vec![0.3f32, 0.7, 0.1];
        let b = vec![0.2f32, 0.5, 0.9];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        let a = vec![1.0f32];
        let b = vec![1.0f32, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
