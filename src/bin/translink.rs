//! Translink
//!
//! Runs a gateway node, a worker node, or both in one process.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use translink::config::{
    apply_env_overrides, load_config, load_config_from_path, validate_config, Config, LogConfig,
    LogFormat, QueueBackendType, RegistryBackendType,
};
use translink::core::{QueueProvider, RegistryStore, SessionSink};
use translink::database::{init_pool, migrations, PgQueue, PgStore, PostgresPool};
use translink::gateway::{serve, AppState, RouterSettings, SessionRouter};
use translink::memory::{MemoryQueue, MemoryStore};
use translink::queue::Queues;
use translink::registry::{RoomDirectory, SessionRegistry};
use translink::translators::TranslatorRegistry;
use translink::workers::{
    DeliveryLedger, HoldingArea, RequestHandler, RequestHandlerPool, ResultHandler,
    ResultHandlerPool,
};
use translink::VERSION;

/// How often expired registry rows are purged
const STORE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(
    name = "translink",
    author = "Translink Contributors",
    version = VERSION,
    about = "Translink - asynchronous translation broker",
    long_about = None
)]
struct Cli {
    /// Config file (json, json5 or toml); defaults to the config directory
    #[arg(long, short, global = true, env = "TRANSLINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept live connections and deliver results
    Gateway,

    /// Consume jobs and call translator backends
    Worker,

    /// Gateway and worker in one process
    Standalone,

    /// Create the PostgreSQL tables
    Migrate,

    /// Validate the configuration and exit
    CheckConfig {
        /// Validate for a single-process deployment
        #[arg(long)]
        standalone: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = load_config_from_path(path)?;
            apply_env_overrides(&mut config);
            config
        }
        None => load_config()?,
    };

    init_tracing(&config.log);

    match cli.command {
        Commands::CheckConfig { standalone } => check_config(&config, !standalone),
        Commands::Migrate => {
            let pool = connect(&config).await?;
            migrations::run(&pool).await?;
            info!("Migrations complete");
            Ok(())
        }
        Commands::Gateway => {
            ensure_valid(&config, true)?;
            let shutdown = shutdown_signal();
            let collaborators = Collaborators::build(&config, shutdown.clone()).await?;
            run_gateway(&config, &collaborators, shutdown).await
        }
        Commands::Worker => {
            ensure_valid(&config, true)?;
            let shutdown = shutdown_signal();
            let collaborators = Collaborators::build(&config, shutdown.clone()).await?;
            run_worker(&config, &collaborators, shutdown).await
        }
        Commands::Standalone => {
            ensure_valid(&config, false)?;
            let shutdown = shutdown_signal();
            let collaborators = Collaborators::build(&config, shutdown.clone()).await?;
            let worker = {
                let config = config.clone();
                let collaborators = collaborators.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { run_worker(&config, &collaborators, shutdown).await })
            };
            run_gateway(&config, &collaborators, shutdown).await?;
            worker.await.context("worker task panicked")??;
            Ok(())
        }
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    match log.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn check_config(config: &Config, distributed: bool) -> anyhow::Result<()> {
    let result = validate_config(config, distributed);
    for issue in &result.errors {
        println!("error: {}", issue);
    }
    for issue in &result.warnings {
        println!("warning: {}", issue);
    }
    if !result.valid {
        bail!("configuration has {} error(s)", result.errors.len());
    }
    println!("configuration OK");
    Ok(())
}

fn ensure_valid(config: &Config, distributed: bool) -> anyhow::Result<()> {
    let result = validate_config(config, distributed);
    for issue in &result.warnings {
        warn!("config: {}", issue);
    }
    if !result.valid {
        for issue in &result.errors {
            error!("config: {}", issue);
        }
        bail!("invalid configuration, run `translink check-config` for details");
    }
    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<PostgresPool> {
    let pg_config = config.storage.postgres.as_ref().ok_or_else(|| {
        anyhow!("PostgreSQL not configured. Set storage.postgres in the config file or DATABASE_URL.")
    })?;
    let pool = init_pool(pg_config).await?;
    info!("Database connected");
    Ok(pool)
}

/// Queue provider and registry store selected by the config
#[derive(Clone)]
struct Collaborators {
    queue: Arc<dyn QueueProvider>,
    store: Arc<dyn RegistryStore>,
}

impl Collaborators {
    async fn build(config: &Config, shutdown: watch::Receiver<bool>) -> anyhow::Result<Self> {
        let needs_postgres = config.queue.backend == QueueBackendType::Postgres
            || config.registry.backend == RegistryBackendType::Postgres;
        let pool = if needs_postgres {
            let pool = connect(config).await?;
            migrations::run(&pool).await?;
            Some(pool)
        } else {
            None
        };

        let queue: Arc<dyn QueueProvider> = match (config.queue.backend, &pool) {
            (QueueBackendType::Postgres, Some(pool)) => Arc::new(PgQueue::new(
                pool.clone(),
                config.queue.poll_interval,
                config.queue.visibility_timeout,
            )),
            _ => Arc::new(MemoryQueue::new()),
        };

        let store: Arc<dyn RegistryStore> = match (config.registry.backend, &pool) {
            (RegistryBackendType::Postgres, Some(pool)) => {
                let store = Arc::new(PgStore::new(pool.clone()));
                spawn_purge(shutdown, {
                    let store = store.clone();
                    move || {
                        let store = store.clone();
                        async move { store.purge_expired().await.map(|n| n as usize) }
                    }
                });
                store
            }
            _ => {
                let store = Arc::new(MemoryStore::new());
                spawn_purge(shutdown, {
                    let store = store.clone();
                    move || {
                        let store = store.clone();
                        async move { Ok(store.purge_expired().await) }
                    }
                });
                store
            }
        };

        info!(
            queue = ?config.queue.backend,
            registry = ?config.registry.backend,
            "collaborators ready"
        );
        Ok(Collaborators { queue, store })
    }
}

fn spawn_purge<F, Fut>(mut shutdown: watch::Receiver<bool>, purge: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = translink::Result<usize>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STORE_PURGE_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => match purge().await {
                    Ok(0) => {}
                    Ok(n) => info!(purged = n, "purged expired registry entries"),
                    Err(e) => warn!(error = %e, "registry purge failed"),
                },
            }
        }
    })
}

async fn run_gateway(
    config: &Config,
    collaborators: &Collaborators,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let node = config.node.node_id();
    info!(node_id = %node, "Starting Translink gateway v{}", VERSION);

    let prefix = config.registry.key_prefix.clone();
    let registry = SessionRegistry::new(collaborators.store.clone(), &prefix, config.session.ttl);
    let rooms = RoomDirectory::new(registry.clone(), &prefix);
    let queues = Queues::new(collaborators.queue.clone(), &config.queue);
    let holding = Arc::new(HoldingArea::new(
        config.delivery.hold_capacity,
        config.delivery.hold_ttl,
    ));

    let router = Arc::new(SessionRouter::new(
        node.clone(),
        registry.clone(),
        rooms,
        queues.clone(),
        holding.clone(),
        RouterSettings::from_config(config),
    ));

    let ledger = DeliveryLedger::new(
        collaborators.store.clone(),
        &prefix,
        config.delivery.dedupe_ttl,
        config.delivery.dedupe_cache_capacity,
    );
    let sink: Arc<dyn SessionSink> = router.clone();
    let handler = Arc::new(ResultHandler::new(
        node.clone(),
        registry,
        sink,
        queues.clone(),
        holding,
        ledger,
        config.workers.infra_retry_delay,
    ));
    let results = ResultHandlerPool::start(
        handler,
        queues.results.clone(),
        queues.forward_queue(&node),
        config.workers.result_workers,
        config.delivery.sweep_interval,
        shutdown.clone(),
    )
    .await?;

    let sweeper = router
        .clone()
        .spawn_sweeper(config.session.sweep_interval, shutdown.clone());
    let relay = router.clone().spawn_room_relay(shutdown.clone()).await?;

    let state = Arc::new(AppState::new(router, &config.gateway));
    serve(state, &config.gateway, shutdown).await?;

    results.join().await;
    if let Err(e) = sweeper.await {
        error!(error = %e, "session sweeper panicked");
    }
    if let Err(e) = relay.await {
        error!(error = %e, "room relay panicked");
    }
    info!(node_id = %node, "gateway stopped");
    Ok(())
}

async fn run_worker(
    config: &Config,
    collaborators: &Collaborators,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let translators = TranslatorRegistry::from_config(&config.translators)?;
    if translators.count() == 0 {
        warn!("no translator backends configured, every job will fail");
    }
    info!(backends = ?translators.names(), "Starting Translink worker v{}", VERSION);

    let queues = Queues::new(collaborators.queue.clone(), &config.queue);
    let handler = Arc::new(RequestHandler::new(
        translators,
        queues.results.clone(),
        &config.workers,
    ));
    let pool = RequestHandlerPool::start(
        handler,
        queues.requests.clone(),
        config.workers.request_workers,
        shutdown,
    )
    .await?;
    info!(workers = pool.size(), "request handlers running");

    pool.join().await;
    info!("worker stopped");
    Ok(())
}

/// Flips to `true` on ctrl-c or SIGTERM
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
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
