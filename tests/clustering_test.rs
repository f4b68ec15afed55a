mod helpers;

use faqgen::faq::cluster::{build_matrix, cluster_questions, cluster_with_matrix, SimilarityMatrix};
use faqgen::faq::store::fetch_candidates;
use helpers::*;

#[test]
fn similar_questions_end_up_in_one_cluster() {
    let conn = test_db();
    let base = test_embedding(1);
    let a = seed_question(&conn, "How do I reset my password?", None, 0.9, &base);
    let b = seed_question(&conn, "How can I reset my password?", None, 0.8, &similar_embedding(&base));
    let c = seed_question(&conn, "What are your business hours?", None, 1.0, &test_embedding(7));

    let candidates = fetch_candidates(&conn, 100).unwrap();
    let clusters = cluster_questions(&candidates, 0.8);

    let big = clusters.iter().find(|c| c.len() == 2).expect("merged cluster");
    assert!(big.question_ids.contains(&a));
    assert!(big.question_ids.contains(&b));

    let single = clusters.iter().find(|c| c.len() == 1).expect("singleton");
    assert_eq!(single.question_ids, vec![c]);
}

#[test]
fn unembedded_questions_never_reach_clustering() {
    let conn = test_db();
    seed_question(&conn, "Embedded", None, 1.0, &test_embedding(1));
    faqgen::faq::store::insert_question(&conn, "No embedding yet", None, 1.0, None, None).unwrap();

    let candidates = fetch_candidates(&conn, 100).unwrap();
    assert_eq!(candidates.len(), 1);

    let clusters = cluster_questions(&candidates, 0.8);
    assert_eq!(clusters.len(), 1);
}

#[test]
fn raising_threshold_never_merges_more() {
    let conn = test_db();
    let base = test_embedding(2);
    seed_question(&conn, "One?", None, 1.0, &base);
    seed_question(&conn, "Two?", None, 1.0, &similar_embedding(&base));
    seed_question(&conn, "Three?", None, 1.0, &test_embedding(9));
    seed_question(&conn, "Four?", None, 1.0, &test_embedding(12));

    let candidates = fetch_candidates(&conn, 100).unwrap();
    let matrix = build_matrix(&candidates);

    let loose = cluster_with_matrix(&candidates, &matrix, 0.5);
    let strict = cluster_with_matrix(&candidates, &matrix, 0.95);
    assert!(strict.len() >= loose.len());
}

#[test]
fn clustering_is_deterministic_across_runs() {
    let conn = test_db();
    let base = test_embedding(3);
    for i in 0..4 {
        let emb = if i % 2 == 0 { base.clone() } else { similar_embedding(&base) };
        seed_question(&conn, &format!("Question {i}?"), None, 1.0, &emb);
    }

    let candidates = fetch_candidates(&conn, 100).unwrap();
    let matrix = build_matrix(&candidates);
    let first = cluster_with_matrix(&candidates, &matrix, 0.8);
    let second = cluster_with_matrix(&candidates, &matrix, 0.8);

    let ids = |clusters: &[faqgen::faq::types::Cluster]| -> Vec<Vec<String>> {
        clusters.iter().map(|c| c.question_ids.clone()).collect()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[test]
fn matrix_excludes_unknown_pairs_from_averages() {
    let mut matrix = SimilarityMatrix::new();
    matrix.insert("a", "b", 0.9);
    // pair (a, c) unknown — average over ["a"] x ["b", "c"] uses only the
    // known score, it does not treat the gap as zero
    let avg = matrix
        .average_linkage(&["a".to_string()], &["b".to_string(), "c".to_string()])
        .unwrap();
    assert!((avg - 0.9).abs() < 1e-9);

    // fully unknown comparison yields no score at all
    assert!(matrix
        .average_linkage(&["a".to_string()], &["d".to_string()])
        .is_none());
}
