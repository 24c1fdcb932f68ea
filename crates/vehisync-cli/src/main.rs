use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vehisync_core::{RunStatus, SyncRun};
use vehisync_storage::PgStores;
use vehisync_sync::{build_service, EngineConfig, Trigger};

#[derive(Debug, Parser)]
#[command(name = "vehisync")]
#[command(about = "Vehicle synchronization engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Full sync: every listing page, then removal of vehicles gone upstream.
    Sync,
    /// Pull vehicles modified since a timestamp (default: last completed run).
    Incremental {
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    /// Sync a single vehicle by slug.
    Vehicle { slug: String },
    /// Print engine status as JSON.
    Status,
    /// Push locally edited vehicles upstream.
    Push {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    Migrate,
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_run(run: &SyncRun) -> Result<()> {
    println!(
        "sync {}: run_id={} type={} processed={} created={} updated={} deleted={} errors={}",
        run.status.as_str(),
        run.id,
        run.run_type.as_str(),
        run.processed_count,
        run.created_count,
        run.updated_count,
        run.deleted_count,
        run.error_count
    );
    if run.status == RunStatus::Failed {
        bail!(
            "run {} failed: {}",
            run.id,
            run.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = EngineConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let service = build_service(&config).await?;
            let run = service.execute_full_sync(Trigger::Cli).await?;
            print_run(&run)?;
        }
        Commands::Incremental { since } => {
            let service = build_service(&config).await?;
            let run = service
                .execute_incremental_sync(since, None, Trigger::Cli)
                .await?;
            print_run(&run)?;
        }
        Commands::Vehicle { slug } => {
            let service = build_service(&config).await?;
            let run = service
                .execute_incremental_sync(None, Some(slug), Trigger::Cli)
                .await?;
            print_run(&run)?;
        }
        Commands::Status => {
            let service = build_service(&config).await?;
            let status = service.get_sync_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Push { limit } => {
            let service = build_service(&config).await?;
            let report = service.push_pending_vehicles(limit).await?;
            println!(
                "push complete: attempted={} pushed={} failed={}",
                report.attempted, report.pushed, report.failed
            );
        }
        Commands::Migrate => {
            let Some(url) = config.database_url.as_deref() else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            let stores = PgStores::connect(url)
                .await
                .context("connecting to postgres")?;
            stores.migrate().await.context("running migrations")?;
            info!("migrations applied");
        }
        Commands::Serve => {
            vehisync_web::serve_from_env().await?;
        }
    }

    Ok(())
}
