use anyhow::Result;
use clap::{Parser, Subcommand};
use folio_sync::{IncrementalOutcome, SyncSummary};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "folio-cli")]
#[command(about = "Regenerates the portfolio project collection from GitHub")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Full sync of every discovered repository.
    Sync,
    /// Incremental sync of a single repository.
    Update {
        /// Repository as `owner/repo`.
        repo: String,
    },
    /// Webhook receiver, plus the scheduled full sync when enabled.
    Serve,
}

fn print_summary(summary: &SyncSummary) {
    println!(
        "sync complete: run_id={} candidates={} total={} filtered_out={} \
         duplicates_removed={} errors={}",
        summary.run_id,
        summary.candidates,
        summary.total,
        summary.filtered_out,
        summary.duplicates_removed,
        summary.errors
    );
    for (year, count) in &summary.per_year {
        println!("  {year}: {count}");
    }
    println!("written to {}", summary.data_file);
}

fn print_outcome(outcome: &IncrementalOutcome) {
    match outcome {
        IncrementalOutcome::Refreshed { name } => println!("refreshed {name}"),
        IncrementalOutcome::Added { name, title } => println!("added {name} as \"{title}\""),
        IncrementalOutcome::Rejected { name, reason } => println!("skipped {name}: {reason}"),
        IncrementalOutcome::Removed { name } => {
            println!("removed {name}: documentation-only repository")
        }
        IncrementalOutcome::SkippedDocumentationOnly { name } => {
            println!("skipped {name}: documentation-only repository")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = folio_sync::run_full_sync_from_env().await?;
            print_summary(&summary);
        }
        Commands::Update { repo } => {
            let outcome = folio_sync::run_incremental_sync_from_env(&repo).await?;
            print_outcome(&outcome);
        }
        Commands::Serve => folio_web::serve_from_env().await?,
    }

    Ok(())
}
