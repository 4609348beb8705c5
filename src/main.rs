use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod charts;
mod db;
mod filter;
mod models;
mod pager;
mod server;
mod shape;

use crate::filter::QueryFilter;
use crate::models::{Department, GraduateRecord};
use crate::pager::{PageSource, Pager};

#[derive(Parser)]
#[command(name = "graduates-db")]
#[command(
    about = "Per-department graduate records: query API, pager and charts",
    long_about = None
)]
struct Cli {
    /// Upper bound on pooled Postgres connections
    #[arg(long, global = true, default_value_t = 5)]
    max_connections: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the JSON API
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "PORT", default_value_t = 3000)]
        port: u16,
    },
    /// Create the graduates table for a department
    Provision {
        #[arg(long)]
        dept: Department,
    },
    /// Load sample graduates into a department
    Seed {
        #[arg(long)]
        dept: Department,
    },
    /// Import graduates for a department from a CSV file
    Import {
        #[arg(long)]
        dept: Department,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Page through a department's graduates interactively
    Browse {
        #[arg(long)]
        dept: Department,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        min_cgpa: Option<String>,
        #[arg(long)]
        max_cgpa: Option<String>,
        #[arg(long)]
        registration: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Build chart options for the dashboard and write them as JSON
    Charts {
        #[arg(long, default_value = "eee")]
        dept: Department,
        #[arg(long, default_value = "charts.json")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the graduates Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::Serve { host, port } => {
            server::run(pool, &host, port).await?;
            return Ok(());
        }
        Commands::Provision { dept } => {
            db::provision(&pool, dept).await?;
            println!("Table {} ready.", dept.table_name());
        }
        Commands::Seed { dept } => {
            let inserted = db::seed(&pool, dept).await?;
            println!("Seeded {inserted} graduates into {}.", dept.table_name());
        }
        Commands::Import { dept, csv } => {
            let inserted = db::import_csv(&pool, dept, &csv).await?;
            println!(
                "Inserted {inserted} graduates into {} from {}.",
                dept.table_name(),
                csv.display()
            );
        }
        Commands::Browse {
            dept,
            search,
            min_cgpa,
            max_cgpa,
            registration,
            limit,
        } => {
            let filter = QueryFilter::from_params(&filter::GraduateParams {
                search,
                min_cgpa,
                max_cgpa,
                registration,
                page: None,
                limit: Some(limit.to_string()),
            });
            browse(Pager::new(pool.clone(), dept, filter)).await?;
        }
        Commands::Charts { dept, out } => {
            let panels = charts::load_charts(&pool, dept).await;
            let failed = panels.iter().filter(|p| p.option.is_err()).count();
            let document = charts::to_document(&panels);
            std::fs::write(&out, serde_json::to_string_pretty(&document)?)?;
            println!(
                "Chart options written to {} ({} of {} charts loaded).",
                out.display(),
                panels.len() - failed,
                panels.len()
            );
        }
    }

    pool.close().await;
    Ok(())
}

async fn browse<S: PageSource>(mut pager: Pager<S>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if let Err(err) = pager.refresh().await {
        println!("Error loading data: {err:#}");
    } else {
        print_page(&pager);
    }

    loop {
        let prompt = match (pager.can_prev(), pager.can_next()) {
            (true, true) => "[p]rev [n]ext [g N] [q]uit",
            (true, false) => "[p]rev [g N] [q]uit",
            (false, true) => "[n]ext [g N] [q]uit",
            (false, false) => "[r]etry [q]uit",
        };
        println!("{prompt}");

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let mut words = line.split_whitespace();
        let moved = match (words.next(), words.next()) {
            (Some("q"), _) => break,
            (Some("n"), _) => pager.next().await,
            (Some("p"), _) => pager.prev().await,
            (Some("r"), _) => pager.refresh().await.map(|_| true),
            (Some("g"), Some(page)) => match page.parse::<u32>() {
                Ok(page) => pager.go_to(page).await,
                Err(_) => Ok(false),
            },
            _ => Ok(false),
        };

        match moved {
            Ok(true) => print_page(&pager),
            Ok(false) => println!("Nothing to do."),
            Err(err) => println!("Error loading data: {err:#}"),
        }
    }

    Ok(())
}

fn print_page<S: PageSource>(pager: &Pager<S>) {
    if pager.rows().is_empty() {
        println!("No graduates found");
        return;
    }

    for record in pager.rows() {
        println!("{}", format_record(record));
    }
    println!(
        "Page {} of {} ({} graduates)",
        pager.current_page(),
        pager.total_pages(),
        pager.total_records()
    );
}

fn format_record(record: &GraduateRecord) -> String {
    let text = |value: &Option<String>| value.as_deref().unwrap_or("-").to_string();
    let date = record
        .date_of_graduation
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "- {} | {} | {} | {} | {} | {} | {}",
        text(&record.name),
        text(&record.program),
        text(&record.cgpa),
        date,
        text(&record.semester),
        text(&record.convocation).trim(),
        text(&record.registration)
    )
}
