use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use djb_adapters::ScrapeMode;
use djb_core::{Category, JobSource, Region, SourceGroup};
use djb_storage::{JobStore, MemoryJobStore};
use djb_sync::{build_pipeline, connect_store, DedupKey, DuplicateCleanup, RunSelection, SourceRegistry, SyncConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "djb-cli")]
#[command(about = "Design job board ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion batch and print the report as JSON.
    Sync {
        #[arg(long)]
        source: Option<JobSource>,
        #[arg(long)]
        group: Option<SourceGroup>,
        #[arg(long, default_value = "remote")]
        region: Region,
        #[arg(long, default_value = "all")]
        category: Category,
        /// Skip detail pages on scrape sources.
        #[arg(long)]
        quick: bool,
        /// Sync into an in-memory store instead of DATABASE_URL.
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove stored duplicates, keeping the oldest row per key.
    Dedupe {
        #[arg(long, default_value = "apply-url")]
        key: DedupKey,
        #[arg(long)]
        dry_run: bool,
    },
    Migrate,
    Serve,
    /// List the source registry.
    Sources,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,djb=debug,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("encoding report")?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sources) {
        Commands::Sync {
            source,
            group,
            region,
            category,
            quick,
            dry_run,
        } => {
            let store: Arc<dyn JobStore> = if dry_run {
                info!("dry run: syncing into an in-memory store");
                Arc::new(MemoryJobStore::new())
            } else {
                connect_store(&config).await?
            };
            let pipeline = build_pipeline(config, store).await?;
            let report = pipeline
                .run(RunSelection {
                    source,
                    group,
                    region,
                    category,
                    mode: if quick { ScrapeMode::Quick } else { ScrapeMode::Full },
                })
                .await;
            print_json(&report)?;
            if !report.success {
                warn!(failed_sources = report.totals.failed_sources, "run finished with failed sources");
            }
        }
        Commands::Dedupe { key, dry_run } => {
            let store = connect_store(&config).await?;
            let report = DuplicateCleanup::new(store)
                .run(key, dry_run)
                .await
                .with_context(|| format!("cleaning duplicates by {key}"))?;
            print_json(&report)?;
        }
        Commands::Migrate => {
            let store = connect_store(&config).await?;
            store.migrate().await.context("running migrations")?;
            info!("migrations applied");
        }
        Commands::Serve => {
            djb_web::serve(config).await?;
        }
        Commands::Sources => {
            let registry = SourceRegistry::load(&config.registry_path()).await?;
            for entry in &registry.sources {
                println!(
                    "{:<11} {:<7} {:<9} {:<11} boards={}",
                    entry.source.as_str(),
                    entry.group.as_str(),
                    if entry.enabled { "enabled" } else { "disabled" },
                    entry.display_name,
                    entry.boards.len()
                );
            }
        }
    }

    Ok(())
}
