mod helpers;

use faqgen::config::{AssemblyConfig, ClusteringConfig, PipelineConfig};
use faqgen::faq::types::ItemStatus;
use faqgen::pipeline::{self, items, LogSink};
use helpers::*;

fn fast_cfg() -> PipelineConfig {
    PipelineConfig {
        batch_size: 2,
        batch_delay_ms: 0,
        ..PipelineConfig::default()
    }
}

struct NoMemory;

impl pipeline::memory::MemoryMonitor for NoMemory {
    fn resident_bytes(&self) -> u64 {
        0 // disables the gate
    }
}

#[tokio::test]
async fn items_flow_through_to_questions() {
    let mut conn = test_db();
    items::submit_item(&conn, Some("inbox"), "Q: How do I log in?\nQ: Why was I locked out?")
        .unwrap();
    items::submit_item(&conn, Some("inbox"), "No questions in this one").unwrap();

    let summary =
        pipeline::process_items(&mut conn, &StubExtractor, &NoMemory, &LogSink, &fast_cfg())
            .await
            .unwrap();

    assert_eq!(summary.stats.processed, 2);
    assert_eq!(summary.stats.questions_found, 2);
    assert_eq!(summary.stats.errors, 0);

    let question_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM questions", [], |r| r.get(0))
        .unwrap();
    assert_eq!(question_count, 2);

    let pending = items::fetch_pending(&conn, 10).unwrap();
    assert!(pending.is_empty(), "all items should have left the pending queue");
}

#[tokio::test]
async fn backfill_embeds_extracted_questions() {
    let mut conn = test_db();
    items::submit_item(&conn, None, "Q: Where is my invoice?").unwrap();

    pipeline::process_items(&mut conn, &StubExtractor, &NoMemory, &LogSink, &fast_cfg())
        .await
        .unwrap();

    let provider = StubProvider { fail: false };
    let summary = pipeline::backfill_embeddings(&conn, &provider, &fast_cfg(), 100)
        .await
        .unwrap();

    assert_eq!(summary.embedded, 1);
    assert_eq!(summary.errors, 0);

    let unembedded: i64 = conn
        .query_row("SELECT COUNT(*) FROM questions WHERE embedding IS NULL", [], |r| r.get(0))
        .unwrap();
    assert_eq!(unembedded, 0);
}

#[tokio::test]
async fn backfill_survives_provider_outage() {
    let mut conn = test_db();
    items::submit_item(&conn, None, "Q: What is your refund policy?").unwrap();
    pipeline::process_items(&mut conn, &StubExtractor, &NoMemory, &LogSink, &fast_cfg())
        .await
        .unwrap();

    let provider = StubProvider { fail: true };
    let summary = pipeline::backfill_embeddings(&conn, &provider, &fast_cfg(), 100)
        .await
        .unwrap();

    assert_eq!(summary.embedded, 0);
    assert_eq!(summary.errors, 1);
}

#[tokio::test]
async fn full_run_produces_faq_groups() {
    let mut conn = test_db();
    items::submit_item(
        &conn,
        Some("support"),
        "Q: How do I reset my password?\nQ: How can I reset my password?",
    )
    .unwrap();

    pipeline::process_items(&mut conn, &StubExtractor, &NoMemory, &LogSink, &fast_cfg())
        .await
        .unwrap();
    pipeline::backfill_embeddings(&conn, &StubProvider { fail: false }, &fast_cfg(), 100)
        .await
        .unwrap();

    let summary = pipeline::generate_faqs(
        &mut conn,
        &StubProvider { fail: false },
        &StubGenerator { fail: false },
        &ClusteringConfig::default(),
        &AssemblyConfig::default(),
        false,
    )
    .await
    .unwrap();

    // both extracted questions share the stub embedding, so they cluster
    assert_eq!(summary.generated, 1);

    let groups: i64 = conn
        .query_row("SELECT COUNT(*) FROM faq_groups", [], |r| r.get(0))
        .unwrap();
    assert_eq!(groups, 1);
}

#[tokio::test]
async fn failed_item_records_error_and_stays_failed() {
    let mut conn = test_db();
    let id = items::submit_item(&conn, None, "anything").unwrap();
    items::mark_failed(&conn, &id, "upstream exploded").unwrap();

    // a later run must not resurrect it
    pipeline::process_items(&mut conn, &StubExtractor, &NoMemory, &LogSink, &fast_cfg())
        .await
        .unwrap();

    let item = items::get_item(&conn, &id).unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.error.as_deref(), Some("upstream exploded"));
}
