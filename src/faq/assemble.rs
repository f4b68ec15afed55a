//! FAQ Assembly Engine — turns a qualifying cluster into a new FAQ group or
//! merges it into an existing one.
//!
//! Create and merge both run their persistence inside a transaction, and
//! association writes use conflict-aware upserts so re-running assembly on
//! the same cluster is safe. Collaborator calls (consolidated answer,
//! category, tags, representative embedding) are best-effort with
//! deterministic fallbacks; a hard failure aborts only this cluster's
//! assembly, never its siblings.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, warn};

use super::cluster::SimilarityMatrix;
use super::embedding_to_bytes;
use super::store::fetch_by_ids;
use super::types::{Cluster, Question};
use crate::config::AssemblyConfig;
use crate::generation::{TextGenerator, FALLBACK_ANSWER, FALLBACK_CATEGORY};
use crate::similarity::SimilarityProvider;

/// Maximum display-title length before truncation.
const TITLE_MAX_CHARS: usize = 100;

/// Result of assembling one cluster.
#[derive(Debug, Serialize)]
pub struct AssembleOutcome {
    pub group_id: String,
    /// A new FAQ group was created.
    pub created: bool,
    /// An existing group gained members or regenerated content.
    pub updated: bool,
}

/// Assemble one cluster into the FAQ corpus.
///
/// Returns `Ok(None)` when the cluster is below `min_question_count` or its
/// questions no longer resolve — silently filtered, not an error. When the
/// cluster overlaps an existing group the cluster merges into it (questions
/// are never reassigned); `force_regenerate` additionally rebuilds the
/// group's consolidated content even without new members. A cluster with no
/// overlap always takes the create path.
pub async fn assemble(
    conn: &mut Connection,
    provider: &dyn SimilarityProvider,
    generator: &dyn TextGenerator,
    cluster: &Cluster,
    matrix: &SimilarityMatrix,
    cfg: &AssemblyConfig,
    force_regenerate: bool,
) -> Result<Option<AssembleOutcome>> {
    if cluster.len() < cfg.min_question_count {
        debug!(size = cluster.len(), min = cfg.min_question_count, "cluster below minimum, skipped");
        return Ok(None);
    }

    let questions = fetch_by_ids(conn, &cluster.question_ids)?;
    if questions.len() < cfg.min_question_count {
        debug!(resolved = questions.len(), "cluster members no longer resolve, skipped");
        return Ok(None);
    }

    match find_overlapping_group(conn, &cluster.question_ids)? {
        Some(group_id) => {
            merge_into_group(conn, generator, &group_id, &questions, cfg, force_regenerate).await
        }
        None => create_group(conn, provider, generator, &questions, matrix, cfg)
            .await
            .map(Some),
    }
}

/// Any existing group sharing at least one question with the cluster.
fn find_overlapping_group(conn: &Connection, question_ids: &[String]) -> Result<Option<String>> {
    for question_id in question_ids {
        let hit: Option<String> = conn
            .query_row(
                "SELECT group_id FROM question_group_associations WHERE question_id = ?1 LIMIT 1",
                params![question_id],
                |row| row.get(0),
            )
            .optional()?;
        if hit.is_some() {
            return Ok(hit);
        }
    }
    Ok(None)
}

/// Pick the cluster member that best summarizes the group: highest average
/// known in-cluster similarity, ties broken by highest confidence, then by
/// ID for a stable result. A size-1 cluster's sole question wins outright.
pub fn select_representative<'a>(
    questions: &'a [Question],
    matrix: &SimilarityMatrix,
) -> &'a Question {
    questions
        .iter()
        .max_by(|a, b| {
            let score_a = mean_similarity(a, questions, matrix);
            let score_b = mean_similarity(b, questions, matrix);
            score_a
                .partial_cmp(&score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                // max_by keeps the later of equal elements; compare IDs
                // reversed so the lexicographically smallest wins
                .then(b.id.cmp(&a.id))
        })
        .expect("cluster is never empty here")
}

fn mean_similarity(question: &Question, members: &[Question], matrix: &SimilarityMatrix) -> f64 {
    let mut sum = 0.0;
    let mut known = 0usize;
    for other in members {
        if let Some(score) = matrix.get(&question.id, &other.id) {
            sum += score;
            known += 1;
        }
    }
    if known == 0 {
        0.0
    } else {
        sum / known as f64
    }
}

/// Derive a display title: trailing question marks stripped, then truncated
/// at [`TITLE_MAX_CHARS`] with an ellipsis.
pub fn derive_title(text: &str) -> String {
    let stripped = text.trim().trim_end_matches('?').trim_end();
    truncate(stripped, TITLE_MAX_CHARS)
}

/// Truncate to `max_chars` characters, appending `...` if truncated.
fn truncate(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

fn mean_confidence(questions: &[Question]) -> f64 {
    if questions.is_empty() {
        return 0.0;
    }
    questions.iter().map(|q| q.confidence).sum::<f64>() / questions.len() as f64
}

/// Best-effort consolidated answer: generator first, then the first member
/// answer, then the fixed contact-support text.
async fn consolidated_answer(
    generator: &dyn TextGenerator,
    questions: &[Question],
    existing: Option<&str>,
) -> String {
    let texts: Vec<&str> = questions.iter().map(|q| q.text.as_str()).collect();
    let answers: Vec<&str> = questions
        .iter()
        .filter_map(|q| q.answer_text.as_deref())
        .collect();

    match generator.consolidate(&texts, &answers).await {
        Ok(answer) if !answer.is_empty() => answer,
        Ok(_) | Err(_) => {
            warn!("answer consolidation failed, using fallback");
            existing
                .map(str::to_string)
                .or_else(|| answers.first().map(|a| a.to_string()))
                .unwrap_or_else(|| FALLBACK_ANSWER.to_string())
        }
    }
}

async fn create_group(
    conn: &mut Connection,
    provider: &dyn SimilarityProvider,
    generator: &dyn TextGenerator,
    questions: &[Question],
    matrix: &SimilarityMatrix,
    cfg: &AssemblyConfig,
) -> Result<AssembleOutcome> {
    let representative = select_representative(questions, matrix);
    let title = derive_title(&representative.text);

    let answer = consolidated_answer(generator, questions, None).await;
    let category = match generator.categorize(&representative.text).await {
        Ok(category) => category,
        Err(error) => {
            warn!(%error, "categorization failed, using fallback");
            FALLBACK_CATEGORY.to_string()
        }
    };
    let tags = match generator.extract_tags(&representative.text).await {
        Ok(tags) => tags,
        Err(error) => {
            warn!(%error, "tag extraction failed, using empty set");
            Vec::new()
        }
    };

    // Representative embedding from the provider; fall back to the stored
    // question embedding rather than failing the cluster.
    let rep_embedding = match provider.embed(&representative.text).await {
        Ok(embedding) => Some(embedding),
        Err(error) => {
            warn!(%error, "representative embedding failed, reusing stored embedding");
            representative.embedding.clone()
        }
    };

    let question_count = questions.len();
    let avg_confidence = mean_confidence(questions);
    let frequency_score = question_count as f64 * avg_confidence;
    let is_published = question_count >= cfg.auto_publish_threshold;

    let group_id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let tags_json = serde_json::to_string(&tags)?;

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO faq_groups (id, title, representative_question, consolidated_answer, \
         question_count, frequency_score, avg_confidence, representative_embedding, \
         is_published, category, tags, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            group_id,
            title,
            representative.text,
            answer,
            question_count as i64,
            frequency_score,
            avg_confidence,
            rep_embedding.as_deref().map(embedding_to_bytes),
            is_published,
            category,
            tags_json,
            now,
        ],
    )?;

    for question in questions {
        let is_representative = question.id == representative.id;
        // Non-representative pairwise scores to the group anchor are not
        // tracked at persistence time; a fixed high constant stands in.
        let similarity = if is_representative {
            1.0
        } else {
            cfg.member_similarity
        };
        upsert_association(&tx, &question.id, &group_id, similarity, is_representative, &now)?;
    }
    tx.commit()?;

    debug!(group_id = %group_id, questions = question_count, published = is_published, "FAQ group created");
    Ok(AssembleOutcome {
        group_id,
        created: true,
        updated: false,
    })
}

async fn merge_into_group(
    conn: &mut Connection,
    generator: &dyn TextGenerator,
    group_id: &str,
    cluster_questions: &[Question],
    cfg: &AssemblyConfig,
    force_regenerate: bool,
) -> Result<Option<AssembleOutcome>> {
    let current_ids: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT question_id FROM question_group_associations WHERE group_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![group_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    // A cluster can span two existing groups; questions already assigned
    // elsewhere are never reassigned, only genuinely unassigned ones join.
    let mut added: Vec<&Question> = Vec::new();
    for question in cluster_questions {
        if current_ids.contains(&question.id) {
            continue;
        }
        let assigned: Option<String> = conn
            .query_row(
                "SELECT group_id FROM question_group_associations WHERE question_id = ?1 LIMIT 1",
                params![question.id],
                |row| row.get(0),
            )
            .optional()?;
        if assigned.is_none() {
            added.push(question);
        }
    }

    if added.is_empty() && !force_regenerate {
        debug!(group_id, "cluster adds no members, merge is a no-op");
        return Ok(Some(AssembleOutcome {
            group_id: group_id.to_string(),
            created: false,
            updated: false,
        }));
    }

    // Aggregates are recomputed over the union of old and new members, not
    // just the incoming cluster.
    let mut union_ids = current_ids.clone();
    union_ids.extend(added.iter().map(|q| q.id.clone()));
    let union = fetch_by_ids(conn, &union_ids)?;

    let existing_answer: String = conn.query_row(
        "SELECT consolidated_answer FROM faq_groups WHERE id = ?1",
        params![group_id],
        |row| row.get(0),
    )?;
    let answer = consolidated_answer(generator, &union, Some(&existing_answer)).await;

    let question_count = union.len();
    let avg_confidence = mean_confidence(&union);
    let frequency_score = question_count as f64 * avg_confidence;
    let is_published = question_count >= cfg.auto_publish_threshold;
    let now = chrono::Utc::now().to_rfc3339();

    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE faq_groups SET consolidated_answer = ?1, question_count = ?2, \
         frequency_score = ?3, avg_confidence = ?4, is_published = ?5, updated_at = ?6 \
         WHERE id = ?7",
        params![answer, question_count as i64, frequency_score, avg_confidence, is_published, now, group_id],
    )?;
    for question in &added {
        upsert_association(&tx, &question.id, group_id, cfg.member_similarity, false, &now)?;
    }
    tx.commit()?;

    debug!(group_id, added = added.len(), total = question_count, "FAQ group merged");
    Ok(Some(AssembleOutcome {
        group_id: group_id.to_string(),
        created: false,
        updated: true,
    }))
}

/// Conflict-aware association write: insert-or-update on the
/// (question, group) key so re-running assembly is idempotent.
fn upsert_association(
    conn: &rusqlite::Transaction<'_>,
    question_id: &str,
    group_id: &str,
    similarity: f64,
    is_representative: bool,
    now: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO question_group_associations (question_id, group_id, similarity, is_representative, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(question_id, group_id) DO UPDATE SET \
         similarity = excluded.similarity, is_representative = excluded.is_representative",
        params![question_id, group_id, similarity, is_representative, now],
    )?;
    Ok(())
}

/// Explicit admin delete: remove a group and its associations atomically.
///
/// Returns `false` when the group does not exist. Association rows cascade
/// inside the same transaction; any failure rolls the whole delete back.
pub fn delete_group(conn: &mut Connection, group_id: &str) -> Result<bool> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM question_group_associations WHERE group_id = ?1",
        params![group_id],
    )?;
    let rows = tx
        .execute("DELETE FROM faq_groups WHERE id = ?1", params![group_id])
        .context("failed to delete FAQ group")?;
    tx.commit()?;
    Ok(rows > 0)
}
