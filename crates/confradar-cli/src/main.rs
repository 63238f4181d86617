use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use confradar_pipeline::{load_config, Pipeline};
use confradar_storage::Store;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "confradar")]
#[command(about = "Deadline-triggered conference paper intelligence pipeline")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the full pipeline once.
    Run,
    /// Create the database schema and register the configured conferences.
    InitDb,
    /// Keep running on the configured cron schedule until interrupted.
    Schedule,
    /// List tracked conferences and their activation state.
    Conferences,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let pipeline = Pipeline::new(config).await?;
            let report = pipeline.run().await?;
            println!(
                "run complete: triggered={} papers_inserted={}",
                report.triggered.len(),
                report.papers_inserted
            );
        }
        Commands::InitDb => {
            let store = Store::open(&config.storage.db_path).await?;
            store.init_schema().await?;
            for conf in &config.conferences {
                store.register_conference(&conf.name, conf.year).await?;
            }
            info!(
                db = %config.storage.db_path,
                conferences = config.conferences.len(),
                "schema ready"
            );
        }
        Commands::Schedule => {
            let pipeline = Arc::new(Pipeline::new(config).await?);
            let Some(mut scheduler) = pipeline.maybe_build_scheduler().await? else {
                bail!("scheduler is disabled in the configuration");
            };
            scheduler.start().await.context("starting scheduler")?;
            info!("scheduler running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            scheduler.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Conferences => {
            let store = Store::open(&config.storage.db_path).await?;
            store.init_schema().await?;
            for row in store.list_conferences().await? {
                let state = match row.triggered_at {
                    Some(ts) => format!("triggered {}", ts.format("%Y-%m-%d %H:%M")),
                    None => "pending".to_string(),
                };
                println!(
                    "{} {} deadline={} {}",
                    row.name,
                    row.year,
                    row.deadline.as_deref().unwrap_or("-"),
                    state
                );
            }
        }
    }

    Ok(())
}
