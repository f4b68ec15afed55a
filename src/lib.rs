//! FAQ assembly from clustered questions — incremental, supervised, SQLite-backed.
//!
//! faqgen ingests short natural-language questions extracted from incoming
//! messages, groups semantically similar questions via average-linkage
//! agglomerative clustering over an embedding similarity matrix, and maintains
//! a curated set of FAQ records that are created, merged, and re-scored as new
//! questions arrive. A background pipeline drives the flow in bounded batches
//! under memory back-pressure and a circuit breaker, so one misbehaving item
//! never takes down a run.
//!
//! # Architecture
//!
//! - **Storage**: SQLite — questions, FAQ groups, question↔group associations,
//!   work items, and a persistent job queue
//! - **Similarity**: remote embedding provider (OpenAI-style endpoint) with an
//!   in-process cache; cosine similarity in `[0, 1]`
//! - **Clustering**: threshold-stopped average-linkage agglomeration with a
//!   deterministic tie-break
//! - **Assembly**: create-or-merge semantics against already-persisted FAQ
//!   groups, with aggregate invariants reconciled in batch
//! - **Pipeline**: small fixed-size batches, per-item timeouts, per-run error
//!   counters, memory gate, graceful early stop
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite database initialization, schema, migrations, and health checks
//! - [`similarity`] — Embedding provider boundary and cosine similarity
//! - [`generation`] — Text-generation collaborator boundary (answers, categories, tags)
//! - [`extract`] — Question-extraction collaborator boundary
//! - [`faq`] — Core engine: question store, clustering, assembly, statistics
//! - [`pipeline`] — Supervised batch processing with circuit breaker and memory gate
//! - [`queue`] — Persistent job queue with named lanes and chained stages

pub mod config;
pub mod db;
pub mod extract;
pub mod faq;
pub mod generation;
pub mod pipeline;
pub mod queue;
pub mod similarity;
