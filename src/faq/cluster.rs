//! Similarity/Clustering Engine — threshold-stopped average-linkage
//! agglomeration over a pairwise similarity matrix.
//!
//! Candidates must already carry embeddings; questions without one are
//! filtered upstream. The matrix is computed once, then clusters merge
//! greedily: at each step the pair of distinct clusters with the highest
//! average of *known* pairwise similarities merges, until that maximum drops
//! below the threshold. Unknown pairs are excluded from the average, not
//! treated as zero, so a cluster with no known edges never merges.
//!
//! The naive full rescan per merge is O(n²) per pass and O(n³) overall.
//! Candidate sets are bounded by `max_candidates`, which keeps this cheap
//! enough and keeps the code obvious.

use std::collections::HashMap;

use super::types::{Cluster, Question};
use crate::similarity::cosine_similarity;

/// Symmetric pairwise similarity scores keyed by unordered ID pair.
///
/// A missing entry means the similarity is unknown (e.g. a provider failure
/// for that pair), which is distinct from a score of zero. The similarity of
/// an ID with itself is undefined and never stored.
#[derive(Debug, Default)]
pub struct SimilarityMatrix {
    scores: HashMap<(String, String), f64>,
}

impl SimilarityMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Record a score for an unordered pair. Self-pairs are ignored.
    pub fn insert(&mut self, a: &str, b: &str, score: f64) {
        if a == b {
            return;
        }
        self.scores.insert(Self::key(a, b), score.clamp(0.0, 1.0));
    }

    /// Look up a pair's score; `None` for unknown pairs and self-pairs.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        if a == b {
            return None;
        }
        self.scores.get(&Self::key(a, b)).copied()
    }

    /// Average similarity across all known (member-of-a, member-of-b) pairs.
    /// `None` when no pair is known — such clusters never merge.
    pub fn average_linkage(&self, a: &[String], b: &[String]) -> Option<f64> {
        let mut sum = 0.0;
        let mut known = 0usize;
        for x in a {
            for y in b {
                if let Some(score) = self.get(x, y) {
                    sum += score;
                    known += 1;
                }
            }
        }
        (known > 0).then(|| sum / known as f64)
    }
}

/// Build the full pairwise matrix from embedded questions.
///
/// Questions without an embedding are skipped (their pairs stay unknown).
pub fn build_matrix(questions: &[Question]) -> SimilarityMatrix {
    let mut matrix = SimilarityMatrix::new();
    for (i, a) in questions.iter().enumerate() {
        let Some(emb_a) = &a.embedding else { continue };
        for b in &questions[i + 1..] {
            let Some(emb_b) = &b.embedding else { continue };
            matrix.insert(&a.id, &b.id, cosine_similarity(emb_a, emb_b));
        }
    }
    matrix
}

/// Partition candidates into clusters, merging while the best pair's average
/// linkage is at or above `threshold`. Singletons survive.
pub fn cluster_questions(questions: &[Question], threshold: f64) -> Vec<Cluster> {
    let matrix = build_matrix(questions);
    cluster_with_matrix(questions, &matrix, threshold)
}

/// Same as [`cluster_questions`] but over a pre-computed matrix, which lets
/// callers reuse the matrix for representative selection afterwards.
pub fn cluster_with_matrix(
    questions: &[Question],
    matrix: &SimilarityMatrix,
    threshold: f64,
) -> Vec<Cluster> {
    // One singleton per candidate
    let mut clusters: Vec<Vec<String>> = questions
        .iter()
        .filter(|q| q.embedding.is_some())
        .map(|q| vec![q.id.clone()])
        .collect();

    loop {
        let Some((i, j, best)) = best_pair(&clusters, matrix) else {
            break;
        };
        if best < threshold {
            break;
        }

        // Union the pair; j > i so removal doesn't shift i
        let merged = clusters.remove(j);
        clusters[i].extend(merged);
        clusters[i].sort();
    }

    // Sort members and clusters for reproducible output
    for members in &mut clusters {
        members.sort();
    }
    clusters.sort_by(|a, b| a[0].cmp(&b[0]));

    clusters
        .into_iter()
        .map(|question_ids| Cluster { question_ids })
        .collect()
}

/// The distinct cluster pair with the highest known average linkage.
///
/// Ties on the score resolve to the pair whose sorted (min member ID,
/// partner min member ID) key is lexicographically smallest; with
/// time-sortable UUID v7 IDs that is a stable, deterministic rule.
fn best_pair(clusters: &[Vec<String>], matrix: &SimilarityMatrix) -> Option<(usize, usize, f64)> {
    let mut best: Option<(usize, usize, f64)> = None;

    for i in 0..clusters.len() {
        for j in (i + 1)..clusters.len() {
            let Some(score) = matrix.average_linkage(&clusters[i], &clusters[j]) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((bi, bj, best_score)) => {
                    score > best_score
                        || (score == best_score
                            && pair_key(&clusters[i], &clusters[j])
                                < pair_key(&clusters[bi], &clusters[bj]))
                }
            };
            if better {
                best = Some((i, j, score));
            }
        }
    }

    best
}

/// Deterministic ordering key for a cluster pair: both clusters' minimum
/// member IDs, smaller first.
fn pair_key<'a>(a: &'a [String], b: &'a [String]) -> (&'a str, &'a str) {
    let ka = a.iter().min().map(String::as_str).unwrap_or("");
    let kb = b.iter().min().map(String::as_str).unwrap_or("");
    if ka <= kb {
        (ka, kb)
    } else {
        (kb, ka)
    }
}
