mod cli;
mod commands;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use keeper_core::{
    config::{KeeperConfig, StorageBackend, StorageConfig},
    BackupEngine,
};
use keeper_engine::CommandEngine;
use keeper_scheduler::{
    Clock, JobRegistry, JobStore, JsonFileStore, LocalClock, Orchestrator, RunOutcome,
    SchedulerLoop, SqliteStore,
};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::commands::JobsContext;

const DEFAULT_LOG_FILTER: &str = "keeper_service=info,keeper_scheduler=info,keeper_engine=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = KeeperConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        KeeperConfig::default()
    });

    let registry = Arc::new(JobRegistry::open(open_store(&config.storage)?));
    let engine: Arc<dyn BackupEngine> = Arc::new(CommandEngine::new(
        config.engine.program.clone(),
        config.engine.args.clone(),
    ));
    let clock: Arc<dyn Clock> = Arc::new(LocalClock);
    let orchestrator = Orchestrator::new(engine, clock.clone());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            serve(
                registry,
                orchestrator,
                clock,
                Duration::from_secs(config.scheduler.poll_interval_secs),
            )
            .await
        }
        Command::Jobs(command) => {
            let ctx = JobsContext {
                registry,
                orchestrator,
                clock,
            };
            commands::run(&ctx, command).await
        }
    }
}

async fn serve(
    registry: Arc<JobRegistry>,
    orchestrator: Orchestrator,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    info!(
        jobs = registry.list().len(),
        scheduled = registry.scheduled().len(),
        "Keeper scheduler starting"
    );

    let (outcome_tx, mut outcome_rx) = mpsc::channel::<RunOutcome>(64);
    let scheduler = SchedulerLoop::new(registry, Arc::new(orchestrator), clock, poll_interval)
        .with_outcomes(outcome_tx);

    tokio::spawn(async move {
        while let Some(outcome) = outcome_rx.recv().await {
            let elapsed = outcome.finished_at - outcome.started_at;
            if outcome.success {
                info!(job_name = %outcome.job_name, secs = elapsed.num_seconds(), "scheduled backup finished");
            } else {
                warn!(job_name = %outcome.job_name, secs = elapsed.num_seconds(), "scheduled backup failed");
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    shutdown_signal().await;
    info!("Shutdown requested, waiting for the scheduler to stop");
    // signal scheduler to stop
    let _ = shutdown_tx.send(true);
    handle.await?;
    info!("Keeper scheduler stopped");
    Ok(())
}

fn open_store(storage: &StorageConfig) -> anyhow::Result<Box<dyn JobStore>> {
    ensure_parent_dir(&storage.path);
    let store: Box<dyn JobStore> = match storage.backend {
        StorageBackend::Json => Box::new(JsonFileStore::new(&storage.path)),
        StorageBackend::Sqlite => Box::new(SqliteStore::open(&storage.path)?),
    };
    Ok(store)
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
