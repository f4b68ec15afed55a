use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use faqgen::config::FaqgenConfig;
use faqgen::extract::RemoteExtractor;
use faqgen::generation::create_generator;
use faqgen::pipeline::memory::ProcessMemory;
use faqgen::pipeline::{self, LogSink};
use faqgen::queue::{Job, JobHandler, Lane, Worker};
use faqgen::similarity::create_provider;
use faqgen::{db, faq};

#[derive(Parser)]
#[command(name = "faqgen", version, about = "Question clustering and FAQ assembly pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process pending items: extract questions, then embed them
    Run,
    /// Cluster embedded questions and assemble FAQ groups
    Generate {
        /// Regenerate content for groups even when no new members arrived
        #[arg(long)]
        force: bool,
    },
    /// Attach embeddings to questions that are missing one
    Backfill {
        /// Maximum questions to embed in this pass
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },
    /// List FAQ groups as JSON, most frequent first
    List {
        /// Only include published groups
        #[arg(long)]
        published: bool,
        /// Maximum groups to print
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print one FAQ group and its member questions as JSON
    Show {
        /// Group ID
        group_id: String,
    },
    /// Print corpus statistics as JSON
    Stats,
    /// Run the lane worker until interrupted
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = FaqgenConfig::load()?;

    // Log to stderr so stdout stays clean for JSON summaries.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let db_path = config.resolved_db_path();
    let mut conn = db::open_database(&db_path)?;
    db::migrations::sync_embedding_model(&conn, &config.similarity.model)?;

    match cli.command {
        Command::Run => {
            let extractor = RemoteExtractor::new(&config.generation)?;
            let summary = pipeline::process_items(
                &mut conn,
                &extractor,
                &ProcessMemory,
                &LogSink,
                &config.pipeline,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);

            let provider = create_provider(&config.similarity)?;
            let backfill =
                pipeline::backfill_embeddings(&conn, provider.as_ref(), &config.pipeline, 1000)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&backfill)?);
        }
        Command::Generate { force } => {
            let provider = create_provider(&config.similarity)?;
            let generator = create_generator(&config.generation)?;
            let summary = pipeline::generate_faqs(
                &mut conn,
                provider.as_ref(),
                generator.as_ref(),
                &config.clustering,
                &config.assembly,
                force,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Backfill { limit } => {
            let provider = create_provider(&config.similarity)?;
            let summary =
                pipeline::backfill_embeddings(&conn, provider.as_ref(), &config.pipeline, limit)
                    .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::List { published, limit } => {
            let groups = faq::store::list_groups(&conn, published, limit)?;
            println!("{}", serde_json::to_string_pretty(&groups)?);
        }
        Command::Show { group_id } => {
            let group = faq::store::get_group(&conn, &group_id)?
                .ok_or_else(|| anyhow::anyhow!("no FAQ group with id {group_id}"))?;
            let members = faq::store::list_associations(&conn, &group_id)?;
            let detail = serde_json::json!({ "group": group, "members": members });
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        Command::Stats => {
            let stats = faq::stats::faq_stats(&conn, Some(&db_path))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Worker => {
            let worker = build_worker(&config)?;
            worker.run(&mut conn).await?;
        }
    }

    Ok(())
}

fn build_worker(config: &FaqgenConfig) -> Result<Worker> {
    let stage_delay = Duration::from_secs(config.pipeline.stage_delay_secs);
    Ok(Worker::new(stage_delay)
        .register(Lane::ItemIngestion, Box::new(IngestionHandler))
        .register(
            Lane::QuestionExtraction,
            Box::new(ExtractionHandler {
                extractor: RemoteExtractor::new(&config.generation)?,
                config: config.clone(),
            }),
        )
        .register(
            Lane::FaqGeneration,
            Box::new(GenerationHandler { config: config.clone() }),
        )
        .register(
            Lane::EmbeddingBackfill,
            Box::new(BackfillHandler { config: config.clone() }),
        ))
}

/// Stores the submitted content as a pending item. Payload:
/// `{"source": ..., "content": ...}`.
struct IngestionHandler;

#[async_trait::async_trait(?Send)]
impl JobHandler for IngestionHandler {
    async fn handle(&self, conn: &mut rusqlite::Connection, job: &Job) -> Result<()> {
        let payload = job
            .payload
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ingestion job missing payload"))?;
        let content = payload
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("ingestion payload missing content"))?;
        let source = payload.get("source").and_then(|v| v.as_str());
        pipeline::items::submit_item(conn, source, content)?;
        Ok(())
    }
}

/// Drains pending items, then embeds the questions they produced so the
/// chained generation stage sees a complete candidate set.
struct ExtractionHandler {
    extractor: RemoteExtractor,
    config: FaqgenConfig,
}

#[async_trait::async_trait(?Send)]
impl JobHandler for ExtractionHandler {
    async fn handle(&self, conn: &mut rusqlite::Connection, _job: &Job) -> Result<()> {
        pipeline::process_items(
            conn,
            &self.extractor,
            &ProcessMemory,
            &LogSink,
            &self.config.pipeline,
        )
        .await?;
        let provider = create_provider(&self.config.similarity)?;
        pipeline::backfill_embeddings(conn, provider.as_ref(), &self.config.pipeline, 1000)
            .await?;
        Ok(())
    }
}

struct GenerationHandler {
    config: FaqgenConfig,
}

#[async_trait::async_trait(?Send)]
impl JobHandler for GenerationHandler {
    async fn handle(&self, conn: &mut rusqlite::Connection, job: &Job) -> Result<()> {
        let force = job
            .payload
            .as_ref()
            .and_then(|p| p.get("force"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let provider = create_provider(&self.config.similarity)?;
        let generator = create_generator(&self.config.generation)?;
        pipeline::generate_faqs(
            conn,
            provider.as_ref(),
            generator.as_ref(),
            &self.config.clustering,
            &self.config.assembly,
            force,
        )
        .await?;
        Ok(())
    }
}

struct BackfillHandler {
    config: FaqgenConfig,
}

#[async_trait::async_trait(?Send)]
impl JobHandler for BackfillHandler {
    async fn handle(&self, conn: &mut rusqlite::Connection, _job: &Job) -> Result<()> {
        let provider = create_provider(&self.config.similarity)?;
        pipeline::backfill_embeddings(conn, provider.as_ref(), &self.config.pipeline, 1000)
            .await?;
        Ok(())
    }
}
