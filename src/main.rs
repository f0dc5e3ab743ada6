//! # Switchyard: task workers
//!
//! Runs the worker pools for the handler and batch queues plus the campaign
//! fire poller against one SQLite database.
//!
//! Usage:
//!   switchyard                          # Use ~/.switchyard/config.toml
//!   switchyard --config ./worker.toml   # Custom config
//!   switchyard --memory-queue -v        # In-process queues, debug logs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use switchyard_broadcasts::{
    BroadcastBatch, BrokerCourier, FanoutOptions, SendBroadcastBatchHandler, SendBroadcastHandler,
    SendBroadcastTask,
};
use switchyard_campaigns::{
    FireCampaignEventHandler, FireCampaignEventTask, FireMarker, FirePoller, QueuedFlowStarter,
    spawn_fire_poller,
};
use switchyard_core::SwitchyardConfig;
use switchyard_core::config::QueueBackend;
use switchyard_db::Database;
use switchyard_queue::{
    Broker, Dispatcher, MemoryBroker, QueueName, SqliteBroker, TaskPayload, WorkerConfig, spawn_workers,
};

#[derive(Parser)]
#[command(name = "switchyard", version, about = "🚦 Switchyard: broadcast and campaign workers")]
struct Cli {
    /// Config file (default: ~/.switchyard/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path, overrides the config
    #[arg(long)]
    db_path: Option<String>,

    /// Keep queues in memory instead of SQLite
    #[arg(long)]
    memory_queue: bool,

    /// Handler queue workers, overrides the config
    #[arg(long)]
    handler_workers: Option<usize>,

    /// Batch queue workers, overrides the config
    #[arg(long)]
    batch_workers: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<SwitchyardConfig> {
    let mut config = match &cli.config {
        Some(path) => SwitchyardConfig::load_from(Path::new(&shellexpand::tilde(path).to_string()))?,
        None => SwitchyardConfig::load()?,
    };
    if let Some(path) = &cli.db_path {
        config.database.path = path.clone();
    }
    if cli.memory_queue {
        config.queue.backend = QueueBackend::Memory;
    }
    if let Some(n) = cli.handler_workers {
        config.queue.handler_workers = n;
    }
    if let Some(n) = cli.batch_workers {
        config.queue.batch_workers = n;
    }
    Ok(config)
}

fn init_logging(config: &SwitchyardConfig, verbose: bool) {
    let default = if verbose {
        "switchyard=debug".to_string()
    } else {
        format!("switchyard={}", config.logging.level)
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config, cli.verbose);

    let db_path: PathBuf = config.database.expanded_path();
    let db = Arc::new(Database::open_with_timeout(
        &db_path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )?);

    let lease = Duration::from_secs(config.queue.lease_secs);
    let broker: Arc<dyn Broker> = match config.queue.backend {
        QueueBackend::Memory => Arc::new(MemoryBroker::new(config.queue.max_attempts)),
        QueueBackend::Sqlite => Arc::new(SqliteBroker::new(db.clone(), lease, config.queue.max_attempts)),
    };
    tracing::info!("📬 Queue backend: {}", broker.name());

    let marker = Arc::new(FireMarker::new(lease));
    let starter = Arc::new(QueuedFlowStarter::new(db.clone(), broker.clone()));
    let courier = Arc::new(BrokerCourier::new(broker.clone()));

    let mut dispatcher = Dispatcher::new(Duration::from_secs(config.queue.task_deadline_secs));
    dispatcher.register(
        SendBroadcastTask::TASK_TYPE,
        Arc::new(SendBroadcastHandler::new(
            db.clone(),
            broker.clone(),
            FanoutOptions::from(&config.broadcasts),
        )),
    );
    dispatcher.register(
        BroadcastBatch::TASK_TYPE,
        Arc::new(SendBroadcastBatchHandler::new(db.clone(), courier)),
    );
    dispatcher.register(
        FireCampaignEventTask::TASK_TYPE,
        Arc::new(FireCampaignEventHandler::new(db.clone(), starter, marker.clone())),
    );

    tracing::info!("🔧 Task types: {}", dispatcher.task_types().join(", "));

    let worker_config = WorkerConfig {
        broker: broker.clone(),
        dispatcher: Arc::new(dispatcher),
        idle_sleep: Duration::from_millis(config.queue.poll_interval_ms),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = spawn_workers(
        QueueName::Handler,
        config.queue.handler_workers,
        worker_config.clone(),
        shutdown_rx.clone(),
    );
    handles.extend(spawn_workers(
        QueueName::Batch,
        config.queue.batch_workers,
        worker_config,
        shutdown_rx.clone(),
    ));

    let poller = Arc::new(FirePoller::new(
        db.clone(),
        broker.clone(),
        marker,
        config.campaigns.fire_batch_size,
    ));
    handles.push(tokio::spawn(spawn_fire_poller(
        poller,
        Duration::from_secs(config.campaigns.poll_interval_secs),
        shutdown_rx,
    )));

    tracing::info!(
        "🚦 Switchyard running: {} handler + {} batch workers, db {}",
        config.queue.handler_workers,
        config.queue.batch_workers,
        db_path.display()
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutting down...");
    shutdown_tx.send(true)?;
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!("⚠️ Worker task ended abnormally: {e}");
        }
    }

    for queue in QueueName::ALL {
        let stats = broker.stats(queue).await?;
        tracing::info!(
            "📊 Queue '{}': {} queued, {} in flight, {} dead, {} processed",
            queue,
            stats.queued,
            stats.in_flight,
            stats.dead,
            stats.total_processed
        );
    }
    Ok(())
}
