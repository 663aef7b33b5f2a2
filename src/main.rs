//! Apexline command line.
//!
//! ```bash
//! apexline run --config ./apexline.toml
//! apexline schema
//! apexline query "SELECT * FROM driver_opportunities ORDER BY avg_loss_s DESC"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use apexline::pipeline::{Pipeline, SnapshotStore, Stage, StageOutcome};
use apexline::storage::config::{load_config, save_config};
use apexline::storage::{write_insights, Database};

#[derive(Parser)]
#[command(name = "apexline")]
#[command(about = "Lap-time derivation pipeline", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Defaults to the per-user data directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every derivation stage and publish the results
    Run {
        /// Insights JSON output, overriding the configured one
        #[arg(long)]
        insights: Option<PathBuf>,
    },

    /// Print tables and columns available to readers
    Schema,

    /// Run a read-only SELECT and print rows as JSON
    Query {
        /// SQL statement (SELECT or WITH only)
        sql: String,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    let db_path = cli.db.clone().unwrap_or_else(|| config.database_path());

    match cli.command {
        Commands::Run { insights } => {
            tracing::info!("Starting apexline v{}", env!("CARGO_PKG_VERSION"));

            let mut db = Database::open(&db_path)
                .with_context(|| format!("Failed to open database {}", db_path.display()))?;
            let inputs = db
                .load_inputs(&config.timing)
                .context("Failed to load input tables")?;

            let insights_path = insights.unwrap_or_else(|| config.insights_path());
            let pipeline = Pipeline::new(config);
            let store = SnapshotStore::new();

            let (report, _) = store
                .run_and_publish(&pipeline, &inputs, |tables, report| db.publish(tables, report))
                .context("Failed to publish derived tables")?;

            let published = store.current();
            if let (Some(StageOutcome::Completed { .. }), Some(document)) =
                (report.outcome(Stage::Insights), published.insights.as_deref())
            {
                write_insights(document, &insights_path).context("Failed to write insights")?;
            }

            for stage in &report.stages {
                match &stage.outcome {
                    StageOutcome::Completed { rows } => {
                        println!("{:<18} completed  {} rows", stage.stage, rows)
                    }
                    StageOutcome::Failed(e) => println!("{:<18} failed     {}", stage.stage, e),
                    StageOutcome::Skipped { dependency } => {
                        println!("{:<18} skipped    (needs {})", stage.stage, dependency)
                    }
                }
            }
        }
        Commands::Schema => {
            let db = Database::open(&db_path)
                .with_context(|| format!("Failed to open database {}", db_path.display()))?;
            println!("{}", db.schema_summary()?.to_text());
        }
        Commands::Query { sql } => {
            let db = Database::open(&db_path)
                .with_context(|| format!("Failed to open database {}", db_path.display()))?;
            let rows = db.query_read_only(&sql)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::InitConfig { path } => {
            save_config(&config, &path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}
