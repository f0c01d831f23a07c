mod config;
mod models;
mod pipeline;
mod scheduler;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::scheduler::{ScheduleManager, schedule_countries};
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "stage-harvester", about = "Internship offer harvester", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scrape job for a single country now
    Scrape {
        #[arg(short, long, default_value = "Maroc")]
        country: String,

        /// Result pages to walk (10 offers per page)
        #[arg(short, long, default_value_t = 1)]
        pages: u32,
    },

    /// Run the periodic per-country jobs until Ctrl-C
    Schedule,

    /// Show database statistics
    Stats {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Number of recent runs to list
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Apply schema migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "stage_harvester=info,warn",
        1 => "stage_harvester=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Scrape { country, pages } => {
            let _t = utils::Timer::start(format!("Manual scrape ({country})"));
            let (pipeline, _repo) = Pipeline::from_config(&config)?;
            let summary = pipeline.run_scrape_job(pages, &country).await;
            println!(
                "{}: {} found, {} inserted, {} duplicates",
                country, summary.offers_found, summary.offers_inserted, summary.duplicates
            );
        }

        Command::Schedule => run_scheduler(&config).await?,

        Command::Stats { json, limit } => print_stats(&config, json, limit)?,

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

async fn run_scheduler(config: &AppConfig) -> Result<()> {
    let (pipeline, _repo) = Pipeline::from_config(config)?;
    let mut manager = ScheduleManager::new();
    schedule_countries(&mut manager, Arc::new(pipeline), &config.scheduler)?;
    info!(
        "Scheduler started with {} jobs: {}",
        manager.job_ids().len(),
        manager.job_ids().join(", ")
    );

    let mut report = tokio::time::interval(Duration::from_secs(
        config.scheduler.report_every_secs.max(1),
    ));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    tracing::warn!("Signal handler failed: {}", e);
                }
                info!("Shutting down scheduler…");
                break;
            }
            _ = report.tick() => {
                for (id, next) in manager.next_run_times() {
                    let stats = manager.job_stats(&id).unwrap_or_default();
                    info!(
                        job_id = %id,
                        running = manager.is_running(&id),
                        completed = stats.completed,
                        coalesced = stats.coalesced,
                        failed = stats.failed,
                        "Next run: {}",
                        next.map(|t| t.to_rfc3339()).unwrap_or_else(|| "—".into())
                    );
                }
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn print_stats(config: &AppConfig, json: bool, limit: usize) -> Result<()> {
    let repo = Repository::open(&config.storage.db_path)?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }

    let offers = repo.offer_count()?;
    let by_country = repo.offers_by_country()?;
    let runs = repo.recent_runs(limit)?;

    if json {
        let report = serde_json::json!({
            "offers": offers,
            "runs": repo.run_count()?,
            "by_country": by_country
                .iter()
                .map(|(c, n)| serde_json::json!({ "country": c, "offers": n }))
                .collect::<Vec<_>>(),
            "recent_runs": runs,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("─────────────────────────────────────────────────────────────");
    println!("  Stage Harvester — Database Stats");
    println!("─────────────────────────────────────────────────────────────");
    println!("  Offers   : {}", utils::fmt_number(offers));
    for (country, n) in &by_country {
        println!(
            "    {:<12} {}",
            utils::clip(country.as_deref().unwrap_or("Inconnu"), 12),
            utils::fmt_number(*n)
        );
    }
    println!("─────────────────────────────────────────────────────────────");
    println!("  Recent runs");
    if runs.is_empty() {
        println!("    none yet — run `stage-harvester scrape` first");
    }
    for run in &runs {
        println!(
            "    {}  {:<10} found {:>4}  inserted {:>4}  {:>4}s",
            run.execution_time.format("%Y-%m-%d %H:%M:%S"),
            utils::clip(&run.country, 10),
            run.offers_found,
            run.offers_inserted,
            run.duration_seconds
        );
    }
    println!("─────────────────────────────────────────────────────────────");
    Ok(())
}
