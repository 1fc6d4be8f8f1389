mod api;
mod collector;
mod config;
mod currency;
mod db;
mod error;
mod extractor;

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::collector::{CollectReport, Collector};
use crate::config::Settings;
use crate::currency::format_locale_currency;
use crate::db::{PriceRecord, PriceRepository, Source, SqliteRepository};
use crate::extractor::ExtractSummary;

#[derive(Parser)]
#[command(name = "cesta_basica", about = "Basic food basket price collector")]
struct Cli {
    /// Settings file (default: ./cesta.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the raw documents of one source
    Collect { source: Source },
    /// Parse every raw document of one source into the price table
    Extract { source: Source },
    /// Collect + extract the freshly downloaded documents
    Run { source: Source },
    /// Start the HTTP API and page
    Serve,
    /// Stored records in insertion order
    List {
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Lowest stored prices
    Cheapest {
        #[arg(short = 'n', long, default_value = "3")]
        limit: usize,
    },
    /// One record by id
    Show { id: i64 },
    /// Row counts and date range
    Stats,
    /// Delete every stored record
    Clean {
        /// Required; without it nothing is deleted
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Collect { source } => {
            let report = Collector::new(&settings)?.collect(source).await?;
            print_report(&report);
            Ok(())
        }
        Commands::Extract { source } => {
            let docs = extractor::discover_documents(&settings.raw_dir, source);
            if docs.is_empty() {
                println!(
                    "No {} documents under {}. Run 'collect {}' first.",
                    source,
                    settings.raw_dir.display(),
                    source
                );
                return Ok(());
            }
            let repo = SqliteRepository::open(&settings.db_path)?;
            println!("Extracting {} documents...", docs.len());
            let summary = extract(&repo, &settings, source, &docs)?;
            print_summary(&summary);
            Ok(())
        }
        Commands::Run { source } => {
            let repo = SqliteRepository::open(&settings.db_path)?;

            let t_collect = Instant::now();
            let report = Collector::new(&settings)?.collect(source).await?;
            print_report(&report);
            println!("Collected in {:.1}s", t_collect.elapsed().as_secs_f64());

            if report.documents.is_empty() {
                println!("Nothing to extract.");
                return Ok(());
            }
            let t_extract = Instant::now();
            let summary = extract(&repo, &settings, source, &report.documents)?;
            println!("Extracted in {:.1}s", t_extract.elapsed().as_secs_f64());
            print_summary(&summary);
            Ok(())
        }
        Commands::Serve => {
            api::serve(settings).await?;
            Ok(())
        }
        Commands::List { limit, offset } => {
            let repo = SqliteRepository::open(&settings.db_path)?;
            let rows = repo.list(limit, offset)?;
            if rows.is_empty() {
                println!("No prices stored.");
                return Ok(());
            }
            print_table(&rows);
            println!("\n{} records from offset {}", rows.len(), offset);
            Ok(())
        }
        Commands::Cheapest { limit } => {
            let repo = SqliteRepository::open(&settings.db_path)?;
            let rows = repo.cheapest(limit)?;
            if rows.is_empty() {
                println!("No prices stored.");
                return Ok(());
            }
            print_table(&rows);
            Ok(())
        }
        Commands::Show { id } => {
            let repo = SqliteRepository::open(&settings.db_path)?;
            match repo.get_by_id(id)? {
                Some(r) => {
                    println!("Id:      {}", r.id);
                    println!("Source:  {}", r.source);
                    println!("State:   {}", r.state.as_deref().unwrap_or("-"));
                    println!("Date:    {}", format_date(&r));
                    println!("Product: {}", r.product);
                    println!("Price:   {}", format_locale_currency(r.price));
                }
                None => println!("No record with id {}.", id),
            }
            Ok(())
        }
        Commands::Stats => {
            let repo = SqliteRepository::open(&settings.db_path)?;
            let s = repo.stats()?;
            println!("Total:    {}", s.total);
            for (source, count) in &s.by_source {
                println!("  {:<7} {}", source.as_str(), count);
            }
            match (s.earliest, s.latest) {
                (Some(a), Some(b)) => println!("Dates:    {} .. {}", a, b),
                _ => println!("Dates:    -"),
            }
            Ok(())
        }
        Commands::Clean { yes } => {
            if !yes {
                println!(
                    "This deletes every record in {}. Re-run with --yes to confirm.",
                    settings.db_path.display()
                );
                return Ok(());
            }
            let repo = SqliteRepository::open(&settings.db_path)?;
            let removed = repo.clear()?;
            println!("Deleted {} records.", removed);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn extract(
    repo: &dyn PriceRepository,
    settings: &Settings,
    source: Source,
    docs: &[PathBuf],
) -> anyhow::Result<ExtractSummary> {
    let pb = ProgressBar::new(docs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );
    let summary = extractor::process_documents(repo, settings, source, docs, &pb)?;
    pb.finish_and_clear();
    Ok(summary)
}

fn print_report(report: &CollectReport) {
    println!(
        "{}: {} documents saved, {} failures.",
        report.source,
        report.documents.len(),
        report.failures
    );
    for doc in &report.documents {
        println!("  {}", short_path(doc));
    }
}

fn print_summary(s: &ExtractSummary) {
    println!(
        "Processed {} documents: {} prices inserted, {} discarded, {} skipped.",
        s.processed, s.inserted, s.discarded, s.skipped
    );
}

fn print_table(rows: &[PriceRecord]) {
    println!(
        "{:>5} | {:<7} | {:<20} | {:<7} | {:<32} | {:>14}",
        "Id", "Source", "State", "Date", "Product", "Price"
    );
    println!("{}", "-".repeat(100));
    for r in rows {
        println!(
            "{:>5} | {:<7} | {:<20} | {:<7} | {:<32} | {:>14}",
            r.id,
            r.source.as_str(),
            truncate(r.state.as_deref().unwrap_or("-"), 20),
            format_date(r),
            truncate(&r.product, 32),
            format_locale_currency(r.price)
        );
    }
}

fn format_date(r: &PriceRecord) -> String {
    r.date
        .map(|d| d.format("%m/%Y").to_string())
        .unwrap_or_else(|| "-".into())
}

fn short_path(p: &Path) -> String {
    let parts: Vec<_> = p.components().rev().take(3).collect();
    parts
        .iter()
        .rev()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
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
