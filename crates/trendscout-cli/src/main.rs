use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use trendscout_storage::PgTableStore;
use trendscout_sync::{
    build_orchestrator, build_scheduler, build_store, check_store, latest_summary,
    load_scout_config_from_env, StoreBackend,
};

#[derive(Debug, Parser)]
#[command(name = "trendscout")]
#[command(about = "Instagram trending hashtag scout")]
struct Cli {
    /// Run the pipeline once and exit instead of starting the schedule.
    #[arg(long)]
    run_once: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the most recently scraped rows, rows per day and run versions.
    Latest {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Select, insert and delete a probe row to verify store access.
    CheckStore,
    /// Apply the SQL schema (Postgres backend only).
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let config = load_scout_config_from_env()?;

    match cli.command {
        Some(Commands::Latest { limit }) => {
            let store = build_store(&config).await?;
            let summary = latest_summary(store.as_ref(), limit)
                .await
                .context("reading latest rows")?;
            println!("{}", summary.render(Utc::now()));
        }
        Some(Commands::CheckStore) => {
            let store = build_store(&config).await?;
            println!("store: {}", store.describe());
            let results = check_store(store.as_ref()).await;
            for result in &results {
                let mark = if result.ok { "ok" } else { "FAILED" };
                println!("{:?}: {mark} ({})", result.step, result.detail);
            }
            if results.iter().any(|r| !r.ok) {
                bail!("store check failed");
            }
        }
        Some(Commands::Migrate) => {
            if config.store_backend() != StoreBackend::Postgres {
                bail!("migrate needs a postgres:// SUPABASE_URL; apply migrations/ through the Supabase dashboard instead");
            }
            let store = PgTableStore::connect(config.store_url.trim(), &config.store_table).await?;
            store.migrate().await?;
            println!("migrations applied to {}", config.store_table);
        }
        None if cli.run_once => {
            let report = build_orchestrator(config).await?.run().await?;
            println!("{}", report.summary_line());
            if let Some(dir) = &report.report_dir {
                println!("reports: {}", dir.display());
            }
        }
        None => {
            let hours = config.schedule_hours;
            let orchestrator = Arc::new(build_orchestrator(config).await?);
            let mut sched = build_scheduler(orchestrator, hours).await?;
            println!("scheduled every {hours} hours; use --run-once to run a single pass");

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutdown signal received");
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}
