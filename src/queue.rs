//! Lane-based job queue over the `jobs` table.
//!
//! Each stage of the pipeline runs in its own lane so a backlog in one
//! stage never starves another. Claims are atomic within a transaction;
//! completed stages chain their successor with a short delay so the prior
//! stage's writes are visible before the next begins.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Processing lanes, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    ItemIngestion,
    QuestionExtraction,
    FaqGeneration,
    EmbeddingBackfill,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::ItemIngestion => "item-ingestion",
            Lane::QuestionExtraction => "question-extraction",
            Lane::FaqGeneration => "faq-generation",
            Lane::EmbeddingBackfill => "embedding-backfill",
        }
    }

    /// The stage chained after this one completes, if any. Backfill runs on
    /// its own schedule and chains nothing.
    pub fn next_stage(&self) -> Option<Lane> {
        match self {
            Lane::ItemIngestion => Some(Lane::QuestionExtraction),
            Lane::QuestionExtraction => Some(Lane::FaqGeneration),
            Lane::FaqGeneration => None,
            Lane::EmbeddingBackfill => None,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "item-ingestion" => Ok(Lane::ItemIngestion),
            "question-extraction" => Ok(Lane::QuestionExtraction),
            "faq-generation" => Ok(Lane::FaqGeneration),
            "embedding-backfill" => Ok(Lane::EmbeddingBackfill),
            other => Err(anyhow!("unknown lane: {other}")),
        }
    }
}

/// A claimed or queued job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub lane: Lane,
    pub payload: Option<serde_json::Value>,
    pub priority: i64,
}

/// Scheduling knobs for [`enqueue`].
#[derive(Debug, Default, Clone)]
pub struct EnqueueOptions {
    /// Earliest-run delay from now.
    pub delay: Duration,
    /// Higher runs first within a lane.
    pub priority: i64,
}

/// Queue a job in the given lane. Returns the job ID.
pub fn enqueue(
    conn: &Connection,
    lane: Lane,
    payload: Option<&serde_json::Value>,
    options: &EnqueueOptions,
) -> Result<i64> {
    let now = Utc::now();
    let run_after = now + ChronoDuration::milliseconds(options.delay.as_millis() as i64);
    let payload_json = payload.map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO jobs (lane, payload, priority, run_after, status, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)",
        params![
            lane.as_str(),
            payload_json,
            options.priority,
            run_after.to_rfc3339(),
            now.to_rfc3339()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Atomically claim the next due job in a lane, flipping it to `running`.
///
/// Order: priority descending, then insertion order. Jobs whose `run_after`
/// is still in the future are skipped.
pub fn claim_next(conn: &mut Connection, lane: Lane) -> Result<Option<Job>> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;

    let row: Option<(i64, Option<String>, i64)> = tx
        .query_row(
            "SELECT id, payload, priority FROM jobs \
             WHERE lane = ?1 AND status = 'pending' AND run_after <= ?2 \
             ORDER BY priority DESC, id ASC LIMIT 1",
            params![lane.as_str(), now],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((id, payload_json, priority)) = row else {
        return Ok(None);
    };

    tx.execute(
        "UPDATE jobs SET status = 'running', updated_at = ?1 WHERE id = ?2",
        params![now, id],
    )?;
    tx.commit()?;

    let payload = payload_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    Ok(Some(Job {
        id,
        lane,
        payload,
        priority,
    }))
}

fn mark_completed(conn: &Connection, job_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE jobs SET status = 'completed', updated_at = ?1 WHERE id = ?2",
        params![Utc::now().to_rfc3339(), job_id],
    )?;
    Ok(())
}

fn mark_failed(conn: &Connection, job_id: i64, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE jobs SET status = 'failed', error = ?1, updated_at = ?2 WHERE id = ?3",
        params![error, Utc::now().to_rfc3339(), job_id],
    )?;
    Ok(())
}

/// One lane's work. Handlers own the database work for their stage; the
/// worker owns claiming, status bookkeeping, and stage chaining.
///
/// Handler futures are not `Send`: they hold the worker's connection across
/// await points, and the worker drives one job at a time on a single task.
#[async_trait(?Send)]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, conn: &mut Connection, job: &Job) -> Result<()>;
}

/// Polling worker that drains all registered lanes.
pub struct Worker {
    handlers: HashMap<Lane, Box<dyn JobHandler>>,
    /// Delay before a chained successor becomes due.
    stage_delay: Duration,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(stage_delay: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            stage_delay,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn register(mut self, lane: Lane, handler: Box<dyn JobHandler>) -> Self {
        self.handlers.insert(lane, handler);
        self
    }

    /// Claim and run at most one job across the registered lanes.
    /// Returns whether a job was processed.
    pub async fn run_once(&self, conn: &mut Connection) -> Result<bool> {
        for (lane, handler) in &self.handlers {
            let Some(job) = claim_next(conn, *lane)? else {
                continue;
            };
            debug!(job_id = job.id, lane = %lane, "job claimed");

            match handler.handle(conn, &job).await {
                Ok(()) => {
                    mark_completed(conn, job.id)?;
                    if let Some(next) = lane.next_stage() {
                        let options = EnqueueOptions {
                            delay: self.stage_delay,
                            priority: job.priority,
                        };
                        enqueue(conn, next, job.payload.as_ref(), &options)?;
                        debug!(lane = %next, "successor stage queued");
                    }
                    info!(job_id = job.id, lane = %lane, "job completed");
                }
                Err(error) => {
                    warn!(job_id = job.id, lane = %lane, %error, "job failed");
                    mark_failed(conn, job.id, &error.to_string())?;
                }
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Poll until cancelled. Sleeps only when every lane is drained.
    pub async fn run(&self, conn: &mut Connection) -> Result<()> {
        info!(lanes = self.handlers.len(), "worker started");
        loop {
            if !self.run_once(conn).await? {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}
