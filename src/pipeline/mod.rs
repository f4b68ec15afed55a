//! Supervised batch processing — the loop that feeds items through
//! extraction into the question corpus, and the generation run that feeds
//! accumulated questions through clustering and assembly.
//!
//! Items are pulled in small fixed-size batches to bound peak memory. Each
//! batch passes a memory gate and a circuit-breaker gate before any work;
//! each item races its work against a timeout. Per-item errors never
//! propagate past their batch, and run-level halts (memory, breaker) stop
//! the current run only — committed results stay.
//!
//! All counters live in a per-run [`RunStats`] value owned by the run, so
//! concurrent runs never interfere through shared state.

pub mod items;
pub mod memory;

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{AssemblyConfig, ClusteringConfig, PipelineConfig};
use crate::extract::QuestionExtractor;
use crate::faq::cluster::{build_matrix, cluster_with_matrix};
use crate::faq::stats::update_faq_statistics;
use crate::faq::store::{attach_embedding, fetch_candidates, fetch_unembedded, insert_question};
use crate::faq::types::ItemStatus;
use crate::generation::TextGenerator;
use crate::similarity::SimilarityProvider;
use items::Item;
use memory::MemoryMonitor;

/// Upper bound on items pulled into a single run.
const MAX_RUN_ITEMS: usize = 10_000;

/// Why a run stopped early. Deliberate stops, not crashes: the run ends,
/// the service does not.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RunHalt {
    #[error("memory limit exceeded: {resident_mb} MiB resident, limit {limit_mb} MiB")]
    MemoryExceeded { resident_mb: u64, limit_mb: u64 },
    #[error("circuit breaker tripped: {consecutive} consecutive errors, {total} total")]
    CircuitBreaker { consecutive: u32, total: u32 },
}

/// Per-run counters. Owned by the run and returned in its summary.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    pub processed: u32,
    pub questions_found: u32,
    pub errors: u32,
    pub consecutive_errors: u32,
    pub current_batch: usize,
    pub total_batches: usize,
}

impl RunStats {
    fn record_success(&mut self, questions_found: usize) {
        self.processed += 1;
        self.questions_found += questions_found as u32;
        self.consecutive_errors = 0;
    }

    fn record_error(&mut self) {
        self.errors += 1;
        self.consecutive_errors += 1;
    }

    /// Breaker state against the configured ceilings.
    fn breaker(&self, cfg: &PipelineConfig) -> Option<RunHalt> {
        if self.consecutive_errors >= cfg.max_consecutive_errors
            || self.errors >= cfg.max_total_errors
        {
            Some(RunHalt::CircuitBreaker {
                consecutive: self.consecutive_errors,
                total: self.errors,
            })
        } else {
            None
        }
    }
}

/// Collaborator-facing progress events, keyed by run ID.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Item {
        run_id: String,
        item_id: String,
        status: ItemStatus,
        stats: RunStats,
    },
    Batch {
        run_id: String,
        current_batch: usize,
        total_batches: usize,
    },
    Completed {
        run_id: String,
        stats: RunStats,
    },
}

/// Sink for progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Default sink: structured log lines.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::Item { item_id, status, .. } => {
                debug!(item_id, status = %status, "item processed")
            }
            ProgressEvent::Batch { current_batch, total_batches, .. } => {
                info!(current_batch, total_batches, "batch complete")
            }
            ProgressEvent::Completed { run_id, stats } => {
                info!(run_id, processed = stats.processed, errors = stats.errors, "run complete")
            }
        }
    }
}

/// Structured result of one processing run. Returned even on partial
/// failure so callers can tell "nothing to do" from "everything failed".
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub stats: RunStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<RunHalt>,
    pub duration_ms: u64,
}

/// Process all pending items in supervised batches.
pub async fn process_items(
    conn: &mut Connection,
    extractor: &dyn QuestionExtractor,
    monitor: &dyn MemoryMonitor,
    sink: &dyn ProgressSink,
    cfg: &PipelineConfig,
) -> Result<RunSummary> {
    let run_id = uuid::Uuid::now_v7().to_string();
    let started = Instant::now();

    let pending = items::fetch_pending(conn, MAX_RUN_ITEMS)?;
    let mut stats = RunStats {
        total_batches: pending.len().div_ceil(cfg.batch_size.max(1)),
        ..RunStats::default()
    };
    let mut halted = None;

    info!(run_id, items = pending.len(), batches = stats.total_batches, "processing run started");

    'run: for (batch_index, batch) in pending.chunks(cfg.batch_size.max(1)).enumerate() {
        stats.current_batch = batch_index + 1;

        if let Some(halt) = check_memory(monitor, cfg) {
            warn!(run_id, %halt, "stopping run early");
            halted = Some(halt);
            break 'run;
        }
        if let Some(halt) = stats.breaker(cfg) {
            warn!(run_id, %halt, "stopping run early");
            halted = Some(halt);
            break 'run;
        }

        for item in batch {
            process_one(conn, extractor, item, cfg, &mut stats).await?;
            sink.emit(ProgressEvent::Item {
                run_id: run_id.clone(),
                item_id: item.id.clone(),
                status: items::get_item(conn, &item.id)?
                    .map(|i| i.status)
                    .unwrap_or(ItemStatus::Failed),
                stats: stats.clone(),
            });

            // Re-check mid-batch so a failing streak stops immediately,
            // leaving the rest of the queue untouched.
            if let Some(halt) = stats.breaker(cfg) {
                warn!(run_id, %halt, "stopping run early");
                halted = Some(halt);
                break 'run;
            }
        }

        sink.emit(ProgressEvent::Batch {
            run_id: run_id.clone(),
            current_batch: stats.current_batch,
            total_batches: stats.total_batches,
        });

        // Proactive reclamation amortizes growth across long runs
        if cfg.reclaim_interval_batches > 0
            && (batch_index + 1) % cfg.reclaim_interval_batches == 0
        {
            monitor.reclaim_hint();
        }

        if stats.current_batch < stats.total_batches && cfg.batch_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(cfg.batch_delay_ms)).await;
        }
    }

    sink.emit(ProgressEvent::Completed {
        run_id: run_id.clone(),
        stats: stats.clone(),
    });

    Ok(RunSummary {
        run_id,
        stats,
        halted,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Process one item with the timeout race. The stalled collaborator call is
/// not cancelled from the outside; a timed-out item is marked failed and
/// any late result is discarded.
async fn process_one(
    conn: &Connection,
    extractor: &dyn QuestionExtractor,
    item: &Item,
    cfg: &PipelineConfig,
    stats: &mut RunStats,
) -> Result<()> {
    items::mark_processing(conn, &item.id)?;

    let timeout = Duration::from_secs(cfg.item_timeout_secs);
    match tokio::time::timeout(timeout, extract_questions(conn, extractor, item)).await {
        Ok(Ok(found)) => {
            items::mark_completed(conn, &item.id, found)?;
            stats.record_success(found);
        }
        Ok(Err(error)) => {
            warn!(item_id = %item.id, %error, "item failed");
            items::mark_failed(conn, &item.id, &error.to_string())?;
            stats.record_error();
        }
        Err(_) => {
            let message = format!("timed out after {}s", cfg.item_timeout_secs);
            warn!(item_id = %item.id, message, "item failed");
            items::mark_failed(conn, &item.id, &message)?;
            stats.record_error();
        }
    }
    Ok(())
}

async fn extract_questions(
    conn: &Connection,
    extractor: &dyn QuestionExtractor,
    item: &Item,
) -> Result<usize> {
    let extracted = extractor.extract(&item.content).await?;
    let found = extracted.len();
    for question in extracted {
        insert_question(
            conn,
            &question.text,
            question.answer_text.as_deref(),
            question.confidence,
            Some(&item.id),
            None,
        )?;
    }
    Ok(found)
}

/// Memory gate: hint once when over the limit, halt if still over after.
fn check_memory(monitor: &dyn MemoryMonitor, cfg: &PipelineConfig) -> Option<RunHalt> {
    let limit_bytes = cfg.memory_limit_mb * 1024 * 1024;
    if limit_bytes == 0 {
        return None;
    }

    let resident = monitor.resident_bytes();
    if resident == 0 || resident <= limit_bytes {
        return None;
    }

    monitor.reclaim_hint();
    let after = monitor.resident_bytes();
    if after > limit_bytes {
        return Some(RunHalt::MemoryExceeded {
            resident_mb: after / (1024 * 1024),
            limit_mb: cfg.memory_limit_mb,
        });
    }
    None
}

/// Structured result of one FAQ generation run.
#[derive(Debug, Serialize)]
pub struct GenerationSummary {
    /// Candidate questions considered.
    pub processed: usize,
    /// Clusters produced by the engine.
    pub clusters: usize,
    /// New FAQ groups created.
    pub generated: usize,
    /// Existing groups that gained members or content.
    pub updated: usize,
    /// Clusters filtered (below minimum) or merged as no-ops.
    pub skipped: usize,
    /// Clusters whose assembly failed.
    pub errors: usize,
    pub duration_ms: u64,
}

/// Cluster accumulated questions and assemble FAQ groups.
///
/// Each cluster assembles in isolation: a collaborator failure marks that
/// cluster errored and the run continues with its siblings. Ends with the
/// batch statistics reconciliation pass. Always returns a summary.
pub async fn generate_faqs(
    conn: &mut Connection,
    provider: &dyn SimilarityProvider,
    generator: &dyn TextGenerator,
    clustering: &ClusteringConfig,
    assembly: &AssemblyConfig,
    force_regenerate: bool,
) -> Result<GenerationSummary> {
    let started = Instant::now();

    let candidates = fetch_candidates(conn, clustering.max_candidates)?;
    let matrix = build_matrix(&candidates);
    let clusters = cluster_with_matrix(&candidates, &matrix, clustering.similarity_threshold);

    let mut summary = GenerationSummary {
        processed: candidates.len(),
        clusters: clusters.len(),
        generated: 0,
        updated: 0,
        skipped: 0,
        errors: 0,
        duration_ms: 0,
    };

    info!(
        candidates = candidates.len(),
        clusters = clusters.len(),
        threshold = clustering.similarity_threshold,
        "FAQ generation started"
    );

    for cluster in &clusters {
        match crate::faq::assemble::assemble(
            conn,
            provider,
            generator,
            cluster,
            &matrix,
            assembly,
            force_regenerate,
        )
        .await
        {
            Ok(Some(outcome)) if outcome.created => summary.generated += 1,
            Ok(Some(outcome)) if outcome.updated => summary.updated += 1,
            Ok(_) => summary.skipped += 1,
            Err(error) => {
                warn!(size = cluster.len(), %error, "cluster assembly failed");
                summary.errors += 1;
            }
        }
    }

    update_faq_statistics(conn)?;

    summary.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        generated = summary.generated,
        updated = summary.updated,
        skipped = summary.skipped,
        errors = summary.errors,
        "FAQ generation finished"
    );
    Ok(summary)
}

/// Structured result of an embedding backfill pass.
#[derive(Debug, Serialize)]
pub struct BackfillSummary {
    pub embedded: usize,
    pub errors: usize,
}

/// Attach embeddings to questions that are still missing one.
///
/// Works in bounded batches; a provider failure for one batch falls back to
/// per-question requests so a single bad input doesn't block the rest.
pub async fn backfill_embeddings(
    conn: &Connection,
    provider: &dyn SimilarityProvider,
    cfg: &PipelineConfig,
    limit: usize,
) -> Result<BackfillSummary> {
    let mut summary = BackfillSummary {
        embedded: 0,
        errors: 0,
    };

    let mut remaining = limit;
    while remaining > 0 {
        let batch_size = cfg.batch_size.max(1).min(remaining);
        let batch = fetch_unembedded(conn, batch_size)?;
        if batch.is_empty() {
            break;
        }
        remaining = remaining.saturating_sub(batch.len());

        let texts: Vec<&str> = batch.iter().map(|q| q.text.as_str()).collect();
        match provider.embed_batch(&texts).await {
            Ok(vectors) => {
                for (question, embedding) in batch.iter().zip(vectors) {
                    attach_embedding(conn, &question.id, &embedding)?;
                    summary.embedded += 1;
                }
            }
            Err(error) => {
                warn!(%error, "batch embedding failed, retrying per question");
                for question in &batch {
                    match provider.embed(&question.text).await {
                        Ok(embedding) => {
                            attach_embedding(conn, &question.id, &embedding)?;
                            summary.embedded += 1;
                        }
                        Err(error) => {
                            warn!(question_id = %question.id, %error, "embedding failed");
                            summary.errors += 1;
                        }
                    }
                }
                // Questions that failed stay unembedded; without a break a
                // persistent provider outage would loop on the same batch.
                break;
            }
        }
    }

    Ok(summary)
}
