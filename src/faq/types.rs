//! Core record and state definitions.
//!
//! Defines [`Question`] and [`FaqGroup`] (persisted records), [`Association`]
//! (the question↔group junction), [`Cluster`] (transient clustering output),
//! and [`ItemStatus`] (the pipeline work-item state machine).

use serde::{Deserialize, Serialize};

/// Pipeline work-item states. Terminal states are sticky — a `failed` item is
/// only retried by explicit re-submission, never automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting to be picked up by a processing run.
    Pending,
    /// Claimed by the current run.
    Processing,
    /// Processed successfully.
    Completed,
    /// Errored or timed out; the message is recorded on the item.
    Failed,
}

impl ItemStatus {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown item status: {s}")),
        }
    }
}

/// An extracted question, matching the `questions` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    /// The question text.
    pub text: String,
    /// Answer found alongside the question in the source, if any.
    pub answer_text: Option<String>,
    /// Extraction confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Embedding vector, attached asynchronously after insert. Immutable once
    /// set, except for administrative edits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Identifier of the originating item.
    pub source: Option<String>,
    /// Arbitrary JSON metadata from the extraction step.
    pub metadata: Option<serde_json::Value>,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// ISO 8601 last-modification timestamp.
    pub updated_at: String,
}

/// A curated FAQ record, matching the `faq_groups` table schema.
///
/// Never deleted automatically; explicit admin delete only.
/// `frequency_score == question_count * avg_confidence` holds after every
/// successful create or merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqGroup {
    /// UUID v7 primary key.
    pub id: String,
    /// Display title derived from the representative question.
    pub title: String,
    /// Text of the question anchoring this group.
    pub representative_question: String,
    /// Consolidated answer over the group's member questions.
    pub consolidated_answer: String,
    pub question_count: usize,
    pub frequency_score: f64,
    pub avg_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub representative_embedding: Option<Vec<f32>>,
    pub is_published: bool,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A question↔group membership row.
///
/// Exactly one association per group has `is_representative = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Association {
    pub question_id: String,
    pub group_id: String,
    pub similarity: f64,
    pub is_representative: bool,
    pub created_at: String,
}

/// Transient output of the clustering engine — never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub question_ids: Vec<String>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.question_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.question_ids.is_empty()
    }
}
