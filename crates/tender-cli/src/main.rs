use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tender_core::{Jurisdiction, Label, SourceStatus, TenderStatus};
use tender_storage::{PgStore, SourceQuery, TenderQuery, DEFAULT_PAGE_SIZE};
use tender_sync::{DecisionAction, DecisionRequest, ProgressEvent, SyncConfig, TenderIntel};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "tender_sync=info,tender_storage=info,tender_adapters=info";

#[derive(Debug, Parser)]
#[command(name = "tender-cli")]
#[command(about = "HK+SG tender intelligence command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every ingestible source and normalize new items.
    Ingest {
        /// Skip sources checked within this many hours.
        #[arg(long, default_value_t = 0)]
        skip_hours: i64,
        /// Stream progress events to stderr as JSON lines.
        #[arg(long)]
        progress: bool,
    },
    /// Score pending tenders against the capability profile.
    Evaluate,
    /// Scan hub pages for new feeds.
    Discover {
        #[arg(long, default_value_t = 0)]
        skip_hours: i64,
        #[arg(long)]
        progress: bool,
    },
    /// Build today's digest.
    Digest,
    /// Record a decision on a tender.
    Decide {
        tender_id: i64,
        /// track, ignore, partner_only, not_for_us or assign_to_team
        action: DecisionAction,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long)]
        stage: Option<String>,
    },
    /// List tenders.
    Tenders {
        #[arg(long)]
        jurisdiction: Option<String>,
        #[arg(long)]
        label: Option<Label>,
        #[arg(long)]
        status: Option<TenderStatus>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// List registered sources.
    Sources {
        #[arg(long)]
        jurisdiction: Option<String>,
        #[arg(long)]
        status: Option<SourceStatus>,
    },
    /// Show recent agent run logs.
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Apply database migrations.
    Migrate,
    /// Run the cron scheduler until interrupted.
    Schedule,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{text}");
    Ok(())
}

/// Prints progress events on stderr until the sender is dropped.
fn progress_printer() -> (mpsc::UnboundedSender<ProgressEvent>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                eprintln!("{line}");
            }
        }
    });
    (tx, handle)
}

async fn connect() -> Result<TenderIntel> {
    let intel = TenderIntel::from_env().await?;
    let seeded = intel.seed_sources().await?;
    if seeded > 0 {
        info!(seeded, "source registry seeded");
    }
    Ok(intel)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let Some(url) = config.database_url else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            let store = PgStore::connect(&url)
                .await
                .context("connecting to DATABASE_URL")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Ingest {
            skip_hours,
            progress,
        } => {
            let intel = connect().await?;
            let window = chrono::Duration::hours(skip_hours);
            let summary = if progress {
                let (tx, printer) = progress_printer();
                let summary = intel.run_ingestion(window, Some(&tx)).await;
                drop(tx);
                printer.await.context("progress printer")?;
                summary
            } else {
                intel.run_ingestion(window, None).await
            };
            print_json(&summary)?;
        }
        Commands::Evaluate => {
            let intel = connect().await?;
            print_json(&intel.run_evaluation(None).await)?;
        }
        Commands::Discover {
            skip_hours,
            progress,
        } => {
            let intel = connect().await?;
            let window = chrono::Duration::hours(skip_hours);
            let summary = if progress {
                let (tx, printer) = progress_printer();
                let summary = intel.run_source_discovery(window, Some(&tx)).await;
                drop(tx);
                printer.await.context("progress printer")?;
                summary
            } else {
                intel.run_source_discovery(window, None).await
            };
            print_json(&summary)?;
        }
        Commands::Digest => {
            let intel = connect().await?;
            print_json(&intel.get_digest().await?)?;
        }
        Commands::Decide {
            tender_id,
            action,
            notes,
            assignee,
            stage,
        } => {
            let intel = connect().await?;
            let receipt = intel
                .record_decision(DecisionRequest {
                    tender_id,
                    action,
                    notes,
                    assignee,
                    pipeline_stage: stage,
                })
                .await?;
            print_json(&receipt)?;
        }
        Commands::Tenders {
            jurisdiction,
            label,
            status,
            search,
            limit,
            offset,
        } => {
            let intel = connect().await?;
            let query = TenderQuery {
                jurisdiction: jurisdiction.map(Jurisdiction::from),
                label,
                status,
                search,
                limit,
                offset,
            };
            print_json(&intel.get_tenders(&query).await?)?;
        }
        Commands::Sources {
            jurisdiction,
            status,
        } => {
            let intel = connect().await?;
            let query = SourceQuery {
                jurisdiction: jurisdiction.map(Jurisdiction::from),
                status,
            };
            print_json(&intel.get_sources(&query).await?)?;
        }
        Commands::Logs { limit } => {
            let intel = connect().await?;
            print_json(&intel.get_logs(limit).await?)?;
        }
        Commands::Schedule => {
            let intel = Arc::new(connect().await?);
            tender_sync::schedule::run_until_shutdown(intel).await?;
        }
    }

    Ok(())
}
