mod crawl;
mod db;
mod export;
mod extract;
mod sheet;
mod tracker;
mod units;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

#[derive(Parser)]
#[command(name = "ultrabook_scraper", about = "Laptop review scraper and spreadsheet builder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl new reviews and append them to the spreadsheet
    Run {
        /// Max new review pages to fetch (default: all unseen)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Directory for the spreadsheet, snapshots and per-record exports
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
        /// Unit vocabulary file
        #[arg(long, default_value = "unit-types.txt")]
        unit_types: PathBuf,
        /// Rebuild the fetched set from the record store instead of the snapshot
        #[arg(long)]
        resume_from_store: bool,
    },
    /// Show record-store and fetched-set statistics
    Stats {
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            limit,
            output,
            unit_types,
            resume_from_store,
        } => run(limit, output, unit_types, resume_from_store).await,
        Commands::Stats { output } => stats(output),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run(
    limit: Option<usize>,
    output: PathBuf,
    unit_types: PathBuf,
    resume_from_store: bool,
) -> Result<()> {
    std::fs::create_dir_all(&output)?;
    let conn = db::connect(db::DB_PATH)?;
    db::init_schema(&conn)?;

    let mut tracker = tracker::FetchTracker::new(output.join(tracker::SNAPSHOT_FILE));
    if resume_from_store {
        tracker.restore_from_store(&conn)?;
    } else {
        tracker.restore();
    }

    let table = units::UnitTable::load(&unit_types);
    if table.is_empty() {
        warn!("Unit table {} is empty; values will pass through unconverted", unit_types.display());
    } else {
        tracing::info!("Loaded {} unit types", table.len());
    }
    let mut normalizer = units::UnitNormalizer::new(table, output.join(units::SNAPSHOT_FILE));
    let mut writer = sheet::SheetWriter::open(&output)?;

    let crawl_result = crawl::run(
        &conn,
        &mut tracker,
        &mut normalizer,
        &mut writer,
        &output,
        limit,
    )
    .await;

    // The fetched set and unit cache persist even when the pipeline aborted.
    // The workbook is only closed (snapshot + save) after a clean run; a
    // header index out of sync with the grid must never be written back.
    if let Err(e) = tracker.persist() {
        warn!("Unable to persist fetched set: {}", e);
    }
    if let Err(e) = normalizer.persist() {
        warn!("Unable to persist unit mappings: {}", e);
    }
    let crawl_stats = crawl_result?;
    let (columns, last_row) = (writer.column_count(), writer.next_row() - 1);
    writer.close()?;

    println!(
        "Listed {} links ({} already fetched)",
        crawl_stats.listed, crawl_stats.skipped
    );
    println!(
        "Fetched {} pages ({} errors): {} new rows, {} images saved",
        crawl_stats.fetched, crawl_stats.errors, crawl_stats.extracted, crawl_stats.images
    );
    println!("Sheet now spans {} columns x {} rows", columns, last_row);
    Ok(())
}

fn stats(output: PathBuf) -> Result<()> {
    let conn = db::connect(db::DB_PATH)?;
    db::init_schema(&conn)?;
    let store = db::get_stats(&conn)?;
    let mut tracker = tracker::FetchTracker::new(output.join(tracker::SNAPSHOT_FILE));
    tracker.restore();

    println!("Records stored: {}", store.total);
    if let Some(ts) = store.last_fetched_at {
        println!("Last fetched:   {}", ts);
    }
    println!("Fetched set:    {}", tracker.len());
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
