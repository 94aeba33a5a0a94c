use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tickler_core::{config::DatabaseConfig, TicklerConfig, TicklerError};
use tickler_scheduler::{Job, JobFilter, NewJob, Scheduler};
use tickler_sqlite::SqliteJobStore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

mod cli;
mod handlers;

use cli::{parse_data, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickler=info,tickler_scheduler=info,tickler_sqlite=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > TICKLER_CONFIG env > ~/.tickler/tickler.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("TICKLER_CONFIG").ok());
    let config = TicklerConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        TicklerConfig::default()
    });

    let store = open_store(&config.database)?;
    let scheduler = Scheduler::new(store);

    match cli.command {
        Commands::Run => run(scheduler, &config).await?,
        Commands::Add { name, at, data } => {
            let job = scheduler
                .submit(NewJob::new(name, at, parse_data(data.as_deref())?))
                .await?;
            println!("{}", describe(&job));
        }
        Commands::Cancel { name, data } => {
            let mut filter = JobFilter::by_name(name);
            if data.is_some() {
                filter = filter.with_data(parse_data(data.as_deref())?);
            }
            let removed = scheduler.cancel(&filter).await?;
            println!("{removed} job(s) cancelled");
        }
        Commands::List { name } => {
            let filter = match name {
                Some(name) => JobFilter::by_name(name),
                None => JobFilter::all(),
            };
            for job in scheduler.find(&filter).await? {
                println!("{}", describe(&job));
            }
        }
    }
    Ok(())
}

/// Serve jobs until Ctrl-C.
///
/// Jobs written by other processes are armed on the next periodic refresh.
async fn run(scheduler: Scheduler, config: &TicklerConfig) -> anyhow::Result<()> {
    handlers::register(&scheduler);

    if let Some(interval) = config.scheduler.heartbeat() {
        let interval = chrono::Duration::from_std(interval)?;
        let created = scheduler
            .every(handlers::HEARTBEAT, move || chrono::Utc::now() + interval)
            .await?;
        info!(created, every_secs = interval.num_seconds(), "heartbeat registered");
    }

    scheduler.start().await?;
    let refresher = spawn_refresh(scheduler.clone(), config.scheduler.refresh_interval());
    info!(path = %config.database.path, "tickler running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    refresher.abort();
    scheduler.stop().await;
    Ok(())
}

/// Re-arm from the store every `period`, starting one period from now.
fn spawn_refresh(scheduler: Scheduler, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            debug!("refreshing wake-up from store");
            scheduler.refresh().await;
        }
    })
}

fn open_store(db: &DatabaseConfig) -> Result<Arc<SqliteJobStore>, TicklerError> {
    if let Some(parent) = std::path::Path::new(&db.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!(path = %db.path, "opening SQLite database");

    let conn = rusqlite::Connection::open(&db.path)
        .map_err(|e| TicklerError::Database(e.to_string()))?;
    conn.execute_batch(&format!(
        "PRAGMA journal_mode=WAL; PRAGMA busy_timeout={};",
        db.busy_timeout_ms
    ))
    .map_err(|e| TicklerError::Database(e.to_string()))?;

    let store = SqliteJobStore::new(conn).map_err(|e| TicklerError::Database(e.to_string()))?;
    Ok(Arc::new(store))
}

fn describe(job: &Job) -> String {
    let kind = if job.recurrent { " (recurring)" } else { "" };
    format!(
        "{}  {}  {}  {}{}",
        job.date.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        job.name,
        job.data,
        job.id,
        kind
    )
}
