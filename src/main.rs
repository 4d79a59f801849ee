use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod db;
mod health;
mod ingest;
mod models;
mod report;

#[derive(Parser)]
#[command(name = "building-health")]
#[command(about = "Inspection-based health scoring for a roofing services portfolio", long_about = None)]
struct Cli {
    /// Postgres connection string, required by commands that touch the database
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo portfolio
    Seed,
    /// Import inspection reports from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Score buildings, most urgent first
    Score {
        #[arg(long)]
        building: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Score as of this date (YYYY-MM-DD) instead of today
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        building: Option<String>,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        #[arg(long, default_value = "building-health.md")]
        out: PathBuf,
    },
    /// Score a CSV file without a database
    Assess {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Print JSON instead of a text listing
        #[arg(long)]
        json: bool,
    },
    /// Export per-building scores as CSV
    Export {
        #[arg(long)]
        out: PathBuf,
        /// Read reports from this CSV instead of the database
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn connect(database_url: Option<&str>) -> anyhow::Result<PgPool> {
    let database_url = database_url
        .context("DATABASE_URL must be set (or --database-url given) for this command")?;
    tracing::info!("connecting to postgres");
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

fn print_scores(scores: &[models::BuildingScore], limit: usize) {
    println!("Buildings by health score (most urgent first):");
    for score in scores.iter().take(limit) {
        let days = score
            .health
            .days_since_inspection
            .map(|days| format!("{days} days since inspection"))
            .unwrap_or_else(|| "never inspected".to_string());
        println!(
            "- {} score {} grade {} ({}, {}, {} reports)",
            score.building_id,
            score.health.health_score,
            score.health.health_grade,
            score.health.status,
            days,
            score.report_count
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let database_url = cli.database_url.as_deref();

    match cli.command {
        Commands::InitDb => {
            let pool = connect(database_url).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(database_url).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let pool = connect(database_url).await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} reports from {}.", csv.display());
        }
        Commands::Score {
            building,
            limit,
            as_of,
        } => {
            let pool = connect(database_url).await?;
            let today = as_of.unwrap_or_else(health::today);
            let building_ids = db::fetch_building_ids(&pool, building.as_deref()).await?;
            let reports = db::fetch_reports(&pool, building.as_deref()).await?;
            let scores = health::score_buildings(&building_ids, &reports, today);
            tracing::info!(buildings = scores.len(), %today, "scored portfolio");

            if scores.is_empty() {
                println!("No buildings found.");
                return Ok(());
            }
            print_scores(&scores, limit);
        }
        Commands::Report {
            building,
            as_of,
            out,
        } => {
            let pool = connect(database_url).await?;
            let today = as_of.unwrap_or_else(health::today);
            let building_ids = db::fetch_building_ids(&pool, building.as_deref()).await?;
            let reports = db::fetch_reports(&pool, building.as_deref()).await?;
            let scores = health::score_buildings(&building_ids, &reports, today);
            let report = report::build_report(building.as_deref(), today, &scores, &reports);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Assess { csv, as_of, json } => {
            let today = as_of.unwrap_or_else(health::today);
            let reports = ingest::into_reports(ingest::read_reports_from_path(&csv)?);
            let scores = health::score_portfolio(&reports, today);

            if json {
                println!("{}", serde_json::to_string_pretty(&scores)?);
            } else if scores.is_empty() {
                println!("No inspection reports found.");
            } else {
                print_scores(&scores, scores.len());
            }
        }
        Commands::Export { out, csv, as_of } => {
            let today = as_of.unwrap_or_else(health::today);
            let scores = match csv {
                Some(path) => {
                    let reports = ingest::into_reports(ingest::read_reports_from_path(&path)?);
                    health::score_portfolio(&reports, today)
                }
                None => {
                    let pool = connect(database_url).await?;
                    let building_ids = db::fetch_building_ids(&pool, None).await?;
                    let reports = db::fetch_reports(&pool, None).await?;
                    health::score_buildings(&building_ids, &reports, today)
                }
            };
            let file = std::fs::File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            report::write_scores_csv(file, &scores)?;
            println!("Exported {} buildings to {}.", scores.len(), out.display());
        }
    }

    Ok(())
}
