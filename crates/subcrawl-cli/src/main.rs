use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use subcrawl_client::{HtmlExtractor, OpenAiVerifier, ReqwestFetcher};
use subcrawl_core::health::HealthMonitor;
use subcrawl_core::registry::SourceRegistry;
use subcrawl_core::stats::StatsAggregator;
use subcrawl_core::traits::{AnnouncementStore, RunStore};
use subcrawl_core::{
    HealthRecord, Orchestrator, PipelineConfig, RunFilter, RunStatus, Scope, TracingRunReporter,
    recover_orphaned_runs,
};
use subcrawl_db::{Database, DatabaseConfig};

mod import;

type Pipeline = Orchestrator<ReqwestFetcher, HtmlExtractor, OpenAiVerifier, Database>;

#[derive(Parser)]
#[command(
    name = "subcrawl",
    version,
    about = "Crawl, verify and track subsidy announcements"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered source URLs
    Sources {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// Crawl the active sources in scope and wait for the run to finish
    Crawl {
        /// Regions to crawl (repeatable); omitted means every region
        #[arg(short, long = "region")]
        regions: Vec<String>,

        #[command(flatten)]
        ai: AiArgs,
    },

    /// Inspect crawl runs
    Runs {
        #[command(subcommand)]
        command: RunCommands,
    },

    /// Show fetch health per source
    Health {
        /// Only list sources marked unhealthy
        #[arg(long, default_value_t = false)]
        unhealthy: bool,
    },

    /// Show per-region statistics, worst success rate first
    Stats {
        #[arg(short, long)]
        region: Option<String>,
    },

    /// Re-run AI verification over a stored announcement
    Reanalyze {
        /// Announcement ID
        id: Uuid,

        #[command(flatten)]
        ai: AiArgs,
    },

    /// Show the newest verification log entries, oldest first
    Log {
        /// Only entries for this announcement
        #[arg(short, long)]
        announcement: Option<Uuid>,

        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// Register a source URL under a region
    Add {
        #[arg(short, long)]
        region: String,

        #[arg(short, long)]
        url: String,
    },

    /// List sources ordered by region then URL
    List {
        /// Regions to list (repeatable); omitted means every region
        #[arg(short, long = "region")]
        regions: Vec<String>,

        /// Include deactivated sources
        #[arg(long, default_value_t = false)]
        all: bool,
    },

    /// Deactivate a source so future runs skip it
    Deactivate {
        /// Source ID
        id: Uuid,
    },

    /// Register sources from a CSV file with a `region_name,url` header
    Import {
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum RunCommands {
    /// List runs, newest first
    List {
        #[arg(short, long)]
        status: Option<RunStatus>,

        #[arg(short, long)]
        region: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show a run with its batches and errored URLs
    Show {
        /// Run ID
        id: Uuid,
    },

    /// Mark runs left pending or running by a crashed process as failed
    Recover,
}

/// Settings for the fetcher and the AI verifier.
#[derive(Args)]
struct AiArgs {
    /// API key of the OpenAI-compatible endpoint
    #[arg(long, env = "SUBCRAWL_AI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Model used for verification
    #[arg(short, long, env = "SUBCRAWL_AI_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// OpenAI-compatible API base URL
    #[arg(
        long,
        env = "SUBCRAWL_AI_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    base_url: String,

    /// Per-request fetch timeout in seconds
    #[arg(long, env = "SUBCRAWL_FETCH_TIMEOUT_SECS", default_value_t = 30)]
    fetch_timeout: u64,

    /// Per-request verifier timeout in seconds
    #[arg(long, env = "SUBCRAWL_AI_TIMEOUT_SECS", default_value_t = 60)]
    ai_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("subcrawl=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = connect_db().await?;

    match cli.command {
        Commands::Sources { command } => cmd_sources(command, &db).await?,
        Commands::Crawl { regions, ai } => {
            let pipeline = build_pipeline(&ai, &db)?;
            cmd_crawl(&pipeline, Scope::regions(regions)).await?;
        }
        Commands::Runs { command } => cmd_runs(command, &db).await?,
        Commands::Health { unhealthy } => cmd_health(unhealthy, &db).await?,
        Commands::Stats { region } => cmd_stats(region.as_deref(), &db).await?,
        Commands::Reanalyze { id, ai } => {
            let pipeline = build_pipeline(&ai, &db)?;
            cmd_reanalyze(&pipeline, id).await?;
        }
        Commands::Log {
            announcement,
            limit,
        } => cmd_log(announcement, limit, &db).await?,
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().context("DATABASE_URL not set")?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

fn build_pipeline(ai: &AiArgs, db: &Database) -> Result<Pipeline> {
    // The operator controls the machine, so private targets are allowed.
    let fetcher = ReqwestFetcher::with_timeout(Duration::from_secs(ai.fetch_timeout))
        .context("Failed to create HTTP client")?
        .allow_private_urls();
    let extractor = HtmlExtractor::new()?;
    let verifier = OpenAiVerifier::with_base_url(&ai.api_key, &ai.model, &ai.base_url)?
        .with_timeout(Duration::from_secs(ai.ai_timeout))?;

    Ok(Orchestrator::new(
        fetcher,
        extractor,
        verifier,
        db.clone(),
        PipelineConfig::from_env()?,
        Arc::new(TracingRunReporter),
    ))
}

async fn cmd_sources(command: SourceCommands, db: &Database) -> Result<()> {
    let registry = SourceRegistry::new(db.clone());

    match command {
        SourceCommands::Add { region, url } => {
            let source = registry.register(&region, &url).await?;
            println!("{}  {}  {}", source.id, source.region_name, source.url);
        }
        SourceCommands::List { regions, all } => {
            let scope = Scope::regions(regions);
            let sources = if all {
                registry.list_all(&scope).await?
            } else {
                registry.list_active(&scope).await?
            };
            if sources.is_empty() {
                println!("No sources registered for {scope}");
                return Ok(());
            }
            for source in &sources {
                let marker = if source.is_active { "" } else { "  (inactive)" };
                println!(
                    "{}  {:<12} {}{}",
                    source.id, source.region_name, source.url, marker
                );
            }
            println!("\nTotal: {} sources", sources.len());
        }
        SourceCommands::Deactivate { id } => {
            let source = registry.deactivate(id).await?;
            println!("Deactivated {} ({} {})", source.id, source.region_name, source.url);
        }
        SourceCommands::Import { file } => {
            let report = import::import_sources(&registry, &file).await?;
            for row in &report.duplicates {
                println!("  [duplicate] line {}: {}", row.line, row.reason);
            }
            for row in &report.invalid {
                println!("  [invalid]   line {}: {}", row.line, row.reason);
            }
            println!(
                "\nRegistered {}, skipped {} duplicates, rejected {} invalid rows",
                report.registered.len(),
                report.duplicates.len(),
                report.invalid.len()
            );
        }
    }

    Ok(())
}

async fn cmd_crawl(pipeline: &Pipeline, scope: Scope) -> Result<()> {
    let run_id = pipeline.start_run(scope).await?;
    println!("Started run {run_id}");

    let run = tokio::select! {
        run = pipeline.wait_for_run(run_id) => run?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(%run_id, "Interrupted, cancelling run");
            pipeline.cancel_run(run_id).await?;
            pipeline.wait_for_run(run_id).await?
        }
    };

    let detail = pipeline.get_run(run.id).await?;
    println!(
        "\nRun {} {}: {} discovered, {} processed, {} verified, {} rejected, {} errored",
        run.id,
        run.status,
        run.totals.discovered,
        run.totals.processed,
        run.totals.verified,
        run.totals.rejected,
        run.totals.errored
    );
    for error in &detail.url_errors {
        println!("  [{}] {}: {}", error.stage, error.url, error.message);
    }

    Ok(())
}

async fn cmd_runs(command: RunCommands, db: &Database) -> Result<()> {
    match command {
        RunCommands::List {
            status,
            region,
            limit,
        } => {
            let runs = db
                .list_runs(&RunFilter {
                    status,
                    region,
                    limit: Some(limit),
                })
                .await?;
            if runs.is_empty() {
                println!("No runs found");
                return Ok(());
            }
            for run in &runs {
                println!(
                    "{}  {:<9}  {}  {}  {}/{} processed, {} verified, {} errored",
                    run.id,
                    run.status,
                    run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    run.scope,
                    run.totals.processed,
                    run.totals.discovered,
                    run.totals.verified,
                    run.totals.errored
                );
            }
        }
        RunCommands::Show { id } => {
            let run = db
                .get_run(id)
                .await?
                .with_context(|| format!("Run not found: {id}"))?;
            println!("Run {}  [{}]  scope {}", run.id, run.status, run.scope);
            println!("  started:  {}", run.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
            if let Some(finished) = run.finished_at {
                println!("  finished: {}", finished.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            println!(
                "  totals:   {} discovered, {} processed, {} verified, {} rejected, {} errored",
                run.totals.discovered,
                run.totals.processed,
                run.totals.verified,
                run.totals.rejected,
                run.totals.errored
            );

            println!("\nBatches:");
            for batch in db.list_batches(id).await? {
                println!(
                    "  #{:<3} {:<9} {} urls, {} verified, {} rejected, {} errored",
                    batch.batch_number,
                    batch.status,
                    batch.items.len(),
                    batch.totals.verified,
                    batch.totals.rejected,
                    batch.totals.errored
                );
            }

            let errors = db.list_url_errors(id).await?;
            if !errors.is_empty() {
                let monitor = HealthMonitor::new(db.clone(), PipelineConfig::from_env()?.health);
                println!("\nErrored URLs:");
                for error in &errors {
                    let health = monitor
                        .get(error.source_id)
                        .await?
                        .map(|h| h.status.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    println!(
                        "  [{}] {} ({}): {}",
                        error.stage, error.url, health, error.message
                    );
                }
            }
        }
        RunCommands::Recover => {
            // Nothing executes in this process, so every unfinished run is orphaned.
            let recovered = recover_orphaned_runs(db, |_| false).await?;
            if recovered.is_empty() {
                println!("No interrupted runs");
            }
            for run_id in recovered {
                println!("Marked {run_id} as failed");
            }
        }
    }

    Ok(())
}

async fn cmd_health(unhealthy: bool, db: &Database) -> Result<()> {
    let monitor = HealthMonitor::new(db.clone(), PipelineConfig::from_env()?.health);
    let records = if unhealthy {
        monitor.list_unhealthy().await?
    } else {
        monitor.list_all().await?
    };

    if records.is_empty() {
        println!("No health records");
        return Ok(());
    }
    for record in &records {
        print_health(record);
    }
    Ok(())
}

fn print_health(record: &HealthRecord) {
    println!(
        "{}  {:<9}  {} consecutive, {}/{} failed{}",
        record.source_id,
        record.status,
        record.consecutive_failures,
        record.total_failures,
        record.total_attempts,
        record
            .last_error
            .as_deref()
            .map(|e| format!(", last error: {e}"))
            .unwrap_or_default()
    );
}

async fn cmd_stats(region: Option<&str>, db: &Database) -> Result<()> {
    let stats = StatsAggregator::new(db.clone()).by_region(region).await?;
    if stats.is_empty() {
        println!("No statistics yet");
        return Ok(());
    }

    println!(
        "{:<14} {:>5} {:>9} {:>8} {:>8} {:>7} {:>8} {:>9}  health",
        "region", "runs", "processed", "verified", "rejected", "errored", "success", "latency"
    );
    for s in &stats {
        let latency = s
            .avg_latency_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<14} {:>5} {:>9} {:>8} {:>8} {:>7} {:>7.1}% {:>9}  {}",
            s.region_name,
            s.counters.runs,
            s.counters.processed,
            s.counters.verified,
            s.counters.rejected,
            s.counters.errored,
            s.success_rate * 100.0,
            latency,
            s.health.as_str()
        );
    }
    Ok(())
}

async fn cmd_reanalyze(pipeline: &Pipeline, id: Uuid) -> Result<()> {
    let outcome = pipeline.reanalyze(id).await?;
    let a = &outcome.announcement;
    println!(
        "{} -> {} (status {}, confidence {:.2}, log entry {})",
        a.id, outcome.decision, a.verification_status, a.ai_confidence, outcome.log_entry_id
    );
    Ok(())
}

async fn cmd_log(announcement: Option<Uuid>, limit: usize, db: &Database) -> Result<()> {
    let entries = db.list_log(announcement, limit).await?;
    if entries.is_empty() {
        println!("No verification log entries");
        return Ok(());
    }

    for entry in &entries {
        let reasoning = entry
            .ai_result
            .get("reasoning")
            .and_then(|r| r.as_str())
            .unwrap_or("");
        println!(
            "{}  {:<9} {:.2}  {}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.decision,
            entry.confidence,
            entry.source_url,
            reasoning
        );
    }
    println!("\nTotal: {} entries", entries.len());
    Ok(())
}
