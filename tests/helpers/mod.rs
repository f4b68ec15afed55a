#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use faqgen::db;
use faqgen::extract::{ExtractedQuestion, QuestionExtractor};
use faqgen::faq::store::{attach_embedding, insert_question};
use faqgen::generation::TextGenerator;
use faqgen::similarity::SimilarityProvider;
use rusqlite::Connection;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();
    db::migrations::run_migrations(&conn).unwrap();
    conn
}

/// Deterministic 16-dim embedding with a spike at position `seed`.
/// Distinct seeds produce orthogonal vectors.
pub fn test_embedding(seed: u8) -> Vec<f32> {
    let mut v = vec![0.0f32; 16];
    v[seed as usize % 16] = 1.0;
    v
}

/// An embedding with high cosine similarity to `base` (small perturbation,
/// re-normalized).
pub fn similar_embedding(base: &[f32]) -> Vec<f32> {
    let mut v = base.to_vec();
    for i in 0..3 {
        let idx = (i * 5) % v.len();
        v[idx] += 0.05;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Insert a question and attach the given embedding. Returns the ID.
pub fn seed_question(
    conn: &Connection,
    text: &str,
    answer: Option<&str>,
    confidence: f64,
    embedding: &[f32],
) -> String {
    let id = insert_question(conn, text, answer, confidence, None, None).unwrap();
    attach_embedding(conn, &id, embedding).unwrap();
    id
}

/// Provider stub: embeds every text to the same fixed vector, so the
/// representative embedding is always available without a network.
pub struct StubProvider {
    pub fail: bool,
}

#[async_trait]
impl SimilarityProvider for StubProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        if self.fail {
            anyhow::bail!("provider unavailable");
        }
        Ok(test_embedding(0))
    }

    fn dimensions(&self) -> usize {
        16
    }
}

/// Generator stub with canned outputs, or hard failure when `fail` is set.
pub struct StubGenerator {
    pub fail: bool,
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn consolidate(&self, questions: &[&str], _answers: &[&str]) -> Result<String> {
        if self.fail {
            anyhow::bail!("generator unavailable");
        }
        Ok(format!("Consolidated answer covering {} questions", questions.len()))
    }

    async fn categorize(&self, _text: &str) -> Result<String> {
        if self.fail {
            anyhow::bail!("generator unavailable");
        }
        Ok("account".to_string())
    }

    async fn extract_tags(&self, _text: &str) -> Result<Vec<String>> {
        if self.fail {
            anyhow::bail!("generator unavailable");
        }
        Ok(vec!["login".to_string(), "password".to_string()])
    }

    async fn improve(&self, text: &str, _context: &str) -> Result<String> {
        if self.fail {
            anyhow::bail!("generator unavailable");
        }
        Ok(text.to_string())
    }
}

/// Extractor stub: one question per line starting with `Q:`.
pub struct StubExtractor;

#[async_trait]
impl QuestionExtractor for StubExtractor {
    async fn extract(&self, content: &str) -> Result<Vec<ExtractedQuestion>> {
        Ok(content
            .lines()
            .filter_map(|line| line.strip_prefix("Q:"))
            .map(|text| ExtractedQuestion {
                text: text.trim().to_string(),
                answer_text: None,
                confidence: 0.9,
            })
            .collect())
    }
}
