//! Question and FAQ-group store — question write path, group read path.
//!
//! Questions arrive from the extraction stage without embeddings; the
//! embedding is attached later (by the pipeline or the backfill lane) and is
//! immutable once set, except through [`admin_update_text`]. Group rows are
//! written by the assembly engine; this module owns reading them back.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::types::{Association, FaqGroup, Question};
use super::{bytes_to_embedding, embedding_to_bytes};

/// Insert a new question without an embedding. Returns the generated ID.
pub fn insert_question(
    conn: &Connection,
    text: &str,
    answer_text: Option<&str>,
    confidence: f64,
    source: Option<&str>,
    metadata: Option<&serde_json::Value>,
) -> Result<String> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let metadata_json = metadata.map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO questions (id, text, answer_text, confidence, source, metadata, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![id, text, answer_text, confidence.clamp(0.0, 1.0), source, metadata_json, now],
    )?;

    Ok(id)
}

/// Attach an embedding to a question that does not have one yet.
///
/// Fails if the question is missing or already embedded — embeddings are
/// immutable once set.
pub fn attach_embedding(conn: &Connection, question_id: &str, embedding: &[f32]) -> Result<()> {
    let existing: Option<Option<Vec<u8>>> = conn
        .query_row(
            "SELECT embedding FROM questions WHERE id = ?1",
            params![question_id],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        None => bail!("question not found: {question_id}"),
        Some(Some(_)) => bail!("question already has an embedding: {question_id}"),
        Some(None) => {}
    }

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE questions SET embedding = ?1, updated_at = ?2 WHERE id = ?3",
        params![embedding_to_bytes(embedding), now, question_id],
    )?;
    Ok(())
}

/// Administrative text edit. Clears the stored embedding so the backfill
/// lane re-embeds the new wording.
pub fn admin_update_text(conn: &Connection, question_id: &str, text: &str) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = conn.execute(
        "UPDATE questions SET text = ?1, embedding = NULL, updated_at = ?2 WHERE id = ?3",
        params![text, now, question_id],
    )?;
    if rows == 0 {
        bail!("question not found: {question_id}");
    }
    Ok(())
}

/// Fetch a single question by ID.
pub fn get_question(conn: &Connection, question_id: &str) -> Result<Option<Question>> {
    let row = conn
        .query_row(
            "SELECT id, text, answer_text, confidence, embedding, source, metadata, created_at, updated_at \
             FROM questions WHERE id = ?1",
            params![question_id],
            question_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Fetch the clustering candidate set: embedded questions, most recent
/// first, bounded by `limit`. Questions without embeddings are excluded
/// here — the clustering engine never computes embeddings itself.
pub fn fetch_candidates(conn: &Connection, limit: usize) -> Result<Vec<Question>> {
    let mut stmt = conn.prepare(
        "SELECT id, text, answer_text, confidence, embedding, source, metadata, created_at, updated_at \
         FROM questions WHERE embedding IS NOT NULL \
         ORDER BY created_at DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], question_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fetch questions still waiting for an embedding (oldest first).
pub fn fetch_unembedded(conn: &Connection, limit: usize) -> Result<Vec<Question>> {
    let mut stmt = conn.prepare(
        "SELECT id, text, answer_text, confidence, embedding, source, metadata, created_at, updated_at \
         FROM questions WHERE embedding IS NULL \
         ORDER BY created_at ASC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], question_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Fetch the given questions by ID, preserving no particular order.
pub fn fetch_by_ids(conn: &Connection, ids: &[String]) -> Result<Vec<Question>> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(question) = get_question(conn, id)? {
            out.push(question);
        }
    }
    Ok(out)
}

const GROUP_COLUMNS: &str = "id, title, representative_question, consolidated_answer, \
     question_count, frequency_score, avg_confidence, representative_embedding, \
     is_published, category, tags, created_at, updated_at";

/// Fetch a single FAQ group by ID.
pub fn get_group(conn: &Connection, group_id: &str) -> Result<Option<FaqGroup>> {
    let row = conn
        .query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM faq_groups WHERE id = ?1"),
            params![group_id],
            group_from_row,
        )
        .optional()?;
    Ok(row)
}

/// List FAQ groups, most frequent first, optionally only published ones.
pub fn list_groups(conn: &Connection, published_only: bool, limit: usize) -> Result<Vec<FaqGroup>> {
    let sql = if published_only {
        format!(
            "SELECT {GROUP_COLUMNS} FROM faq_groups WHERE is_published = 1 \
             ORDER BY frequency_score DESC, id ASC LIMIT ?1"
        )
    } else {
        format!(
            "SELECT {GROUP_COLUMNS} FROM faq_groups \
             ORDER BY frequency_score DESC, id ASC LIMIT ?1"
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![limit as i64], group_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// List a group's membership rows, representative first.
pub fn list_associations(conn: &Connection, group_id: &str) -> Result<Vec<Association>> {
    let mut stmt = conn.prepare(
        "SELECT question_id, group_id, similarity, is_representative, created_at \
         FROM question_group_associations WHERE group_id = ?1 \
         ORDER BY is_representative DESC, question_id ASC",
    )?;
    let rows = stmt
        .query_map(params![group_id], |row| {
            Ok(Association {
                question_id: row.get(0)?,
                group_id: row.get(1)?,
                similarity: row.get(2)?,
                is_representative: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn group_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FaqGroup> {
    let question_count: i64 = row.get(4)?;
    let embedding: Option<Vec<u8>> = row.get(7)?;
    let tags_json: String = row.get(10)?;
    Ok(FaqGroup {
        id: row.get(0)?,
        title: row.get(1)?,
        representative_question: row.get(2)?,
        consolidated_answer: row.get(3)?,
        question_count: question_count as usize,
        frequency_score: row.get(5)?,
        avg_confidence: row.get(6)?,
        representative_embedding: embedding.map(|bytes| bytes_to_embedding(&bytes)),
        is_published: row.get(8)?,
        category: row.get(9)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn question_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Question> {
    let embedding: Option<Vec<u8>> = row.get(4)?;
    let metadata: Option<String> = row.get(6)?;
    Ok(Question {
        id: row.get(0)?,
        text: row.get(1)?,
        answer_text: row.get(2)?,
        confidence: row.get(3)?,
        embedding: embedding.map(|bytes| bytes_to_embedding(&bytes)),
        source: row.get(5)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    #[test]
    fn insert_and_fetch_question() {
        let conn = test_db();
        let id = insert_question(
            &conn,
            "How do I reset my password?",
            Some("Use the reset link."),
            0.9,
            Some("item-1"),
            None,
        )
        .unwrap();

        let question = get_question(&conn, &id).unwrap().unwrap();
        assert_eq!(question.text, "How do I reset my password?");
        assert_eq!(question.answer_text.as_deref(), Some("Use the reset link."));
        assert!((question.confidence - 0.9).abs() < 1e-9);
        assert!(question.embedding.is_none());
    }

    #[test]
    fn confidence_is_clamped() {
        let conn = test_db();
        let id = insert_question(&conn, "Over-confident?", None, 1.7, None, None).unwrap();
        let question = get_question(&conn, &id).unwrap().unwrap();
        assert_eq!(question.confidence, 1.0);
    }

    #[test]
    fn attach_embedding_once() {
        let conn = test_db();
        let id = insert_question(&conn, "Embed me", None, 1.0, None, None).unwrap();

        attach_embedding(&conn, &id, &[0.1, 0.2, 0.3]).unwrap();
        let question = get_question(&conn, &id).unwrap().unwrap();
        assert_eq!(question.embedding.as_deref(), Some(&[0.1f32, 0.2, 0.3][..]));

        // second attach must fail — embeddings are immutable
        let err = attach_embedding(&conn, &id, &[0.4, 0.5, 0.6]).unwrap_err();
        assert!(err.to_string().contains("already has an embedding"));
    }

    #[test]
    fn attach_embedding_missing_question_fails() {
        let conn = test_db();
        assert!(attach_embedding(&conn, "nope", &[0.1]).is_err());
    }

    #[test]
    fn admin_edit_clears_embedding() {
        let conn = test_db();
        let id = insert_question(&conn, "Old wording", None, 1.0, None, None).unwrap();
        attach_embedding(&conn, &id, &[1.0, 0.0]).unwrap();

        admin_update_text(&conn, &id, "New wording").unwrap();

        let question = get_question(&conn, &id).unwrap().unwrap();
        assert_eq!(question.text, "New wording");
        assert!(question.embedding.is_none());
    }

    #[test]
    fn candidates_exclude_unembedded() {
        let conn = test_db();
        let with = insert_question(&conn, "Embedded", None, 1.0, None, None).unwrap();
        let without = insert_question(&conn, "Not yet", None, 1.0, None, None).unwrap();
        attach_embedding(&conn, &with, &[1.0, 0.0]).unwrap();

        let candidates = fetch_candidates(&conn, 10).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, with);

        let unembedded = fetch_unembedded(&conn, 10).unwrap();
        assert_eq!(unembedded.len(), 1);
        assert_eq!(unembedded[0].id, without);
    }

    fn seed_group(conn: &Connection, id: &str, frequency: f64, published: bool) {
        conn.execute(
            "INSERT INTO faq_groups (id, title, representative_question, consolidated_answer, \
             question_count, frequency_score, avg_confidence, is_published, tags, \
             created_at, updated_at) \
             VALUES (?1, 'How do I log in', 'How do I log in?', 'Use the login page.', \
             2, ?2, 0.9, ?3, '[\"login\"]', 't', 't')",
            params![id, frequency, published],
        )
        .unwrap();
    }

    #[test]
    fn get_group_round_trips_row() {
        let conn = test_db();
        seed_group(&conn, "g1", 1.8, true);

        let group = get_group(&conn, "g1").unwrap().unwrap();
        assert_eq!(group.title, "How do I log in");
        assert_eq!(group.question_count, 2);
        assert_eq!(group.tags, vec!["login".to_string()]);
        assert!(group.is_published);
        assert!(group.representative_embedding.is_none());

        assert!(get_group(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn list_groups_orders_and_filters() {
        let conn = test_db();
        seed_group(&conn, "low", 0.5, false);
        seed_group(&conn, "high", 3.0, true);

        let all = list_groups(&conn, false, 10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "high"); // frequency descending

        let published = list_groups(&conn, true, 10).unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, "high");
    }

    #[test]
    fn associations_list_representative_first() {
        let conn = test_db();
        let q1 = insert_question(&conn, "One?", None, 1.0, None, None).unwrap();
        let q2 = insert_question(&conn, "Two?", None, 1.0, None, None).unwrap();
        seed_group(&conn, "g1", 1.0, false);
        for (q, rep) in [(&q1, false), (&q2, true)] {
            conn.execute(
                "INSERT INTO question_group_associations \
                 (question_id, group_id, similarity, is_representative, created_at) \
                 VALUES (?1, 'g1', 0.9, ?2, 't')",
                params![q, rep],
            )
            .unwrap();
        }

        let associations = list_associations(&conn, "g1").unwrap();
        assert_eq!(associations.len(), 2);
        assert!(associations[0].is_representative);
        assert_eq!(associations[0].question_id, q2);
    }

    #[test]
    fn candidates_respect_limit() {
        let conn = test_db();
        for i in 0..5 {
            let id = insert_question(&conn, &format!("Question {i}"), None, 1.0, None, None).unwrap();
            attach_embedding(&conn, &id, &[i as f32, 1.0]).unwrap();
        }

        let candidates = fetch_candidates(&conn, 3).unwrap();
        assert_eq!(candidates.len(), 3);
    }
}
