//! # Hookbridge Service
//!
//! Binary entry point for the hookbridge inbound hook service.
//!
//! This executable:
//! - Loads configuration from a YAML file and environment overrides
//! - Initializes structured logging
//! - Registers built-in normalizers and loads subscriber contracts
//! - Mounts one HTTP route per configured inbound source
//! - Runs the outbox delivery worker and the stream fan-out consumer
//! - Shuts down gracefully on SIGINT/SIGTERM

use clap::Parser;
use hookbridge_core::normalizer::NormalizerRegistry;
use hookbridge_core::registry::{ContractRegistry, FsContractStore};
use hookbridge_core::{DaemonId, Dispatcher, HandlerExecutor, HandlerRegistry, Timestamp};
use hookbridge_outbox::{
    Deliverer, DelivererConfig, DeliveryBackoff, FsOutboxStore, MemoryOutboxStore, OutboxStore,
};
use hookbridge_service::{
    build_router, start_server, AppState, ServiceConfig, StreamConsumer, StreamPublisher,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Inbound hook service: webhook ingress, contract routing, durable delivery.
#[derive(Debug, Parser)]
#[command(name = "hookbridge-service", version)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, env = "HOOKBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen port from configuration
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => {
            let mut config = ServiceConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_logging(&config);
    info!("Starting hookbridge service");

    let daemon_id = match &config.daemon_id {
        Some(id) => DaemonId::new(id.clone())?,
        None => DaemonId::generate(),
    };
    info!(daemon_id = %daemon_id, "Process identity");

    // Normalizers are resolved once at mount time.
    let mut normalizers = NormalizerRegistry::new();
    normalizers.register_builtins();

    // Contract registry: persisted contracts first, then configuration.
    let contracts = match &config.contracts_dir {
        Some(dir) => {
            let store = Arc::new(FsContractStore::new(dir.clone()).await?);
            let registry = Arc::new(ContractRegistry::with_store(store));
            registry.load_persisted().await?;
            registry
        }
        None => Arc::new(ContractRegistry::new()),
    };
    contracts.load_config(&config.hooks).await?;

    // Handlers are registered by the embedding application; the standalone
    // binary routes everything through URL targets.
    let handlers = Arc::new(HandlerRegistry::new());
    let executor = Arc::new(
        HandlerExecutor::new(handlers)
            .with_grace(Duration::from_secs(config.server.shutdown_grace_secs)),
    );

    let outbox: Arc<dyn OutboxStore> = match &config.outbox.data_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Using filesystem outbox store");
            Arc::new(FsOutboxStore::open(dir.clone()).await?)
        }
        None => {
            warn!("No outbox data_dir configured, deliveries will not survive restarts");
            Arc::new(MemoryOutboxStore::new())
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(
        contracts.clone(),
        executor.clone(),
        outbox.clone(),
    ));

    // Stream fan-out is optional; the service runs standalone without it.
    let publisher = match &config.stream {
        Some(settings) => Some(Arc::new(StreamPublisher::new(settings.clone())?)),
        None => None,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_task = match &config.stream {
        Some(settings) => {
            let consumer = StreamConsumer::new(
                settings.clone(),
                daemon_id.clone(),
                dispatcher.clone(),
            )?;
            let shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move { consumer.run(shutdown).await }))
        }
        None => None,
    };

    let deliverer = Arc::new(Deliverer::new(
        outbox.clone(),
        DelivererConfig {
            backoff: DeliveryBackoff::default().with_max_attempts(config.outbox.max_attempts),
            poll_interval: config.outbox.poll_interval(),
            lease: config.outbox.lease(),
            ..DelivererConfig::default()
        },
    ));
    let deliverer_task = {
        let deliverer = deliverer.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { deliverer.run(shutdown).await })
    };

    // Periodic maintenance: contract TTL sweep and dedup window sweep.
    let sweeper_task = {
        let contracts = contracts.clone();
        let executor = executor.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Timestamp::now();
                        contracts.sweep_expired(now).await;
                        executor.sweep_dedup(now);
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    };

    let state = AppState {
        dispatcher,
        outbox,
        publisher,
        daemon_id,
    };
    let (router, report) = build_router(
        state,
        &config.hooks,
        &normalizers,
        config.server.max_body_bytes,
    );
    for (source, reason) in &report.failed {
        error!(source = %source, reason = %reason, "Inbound source not mounted");
    }
    info!(
        mounted = report.mounted.len(),
        failed = report.failed.len(),
        "Inbound endpoint registry ready"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let server_task = tokio::spawn(start_server(addr, router, shutdown_rx));

    wait_for_termination().await;
    info!("Termination signal received, shutting down");

    let _ = shutdown_tx.send(true);
    executor.shutdown();

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let _ = tokio::time::timeout(grace, server_task).await;
    let _ = tokio::time::timeout(grace, deliverer_task).await;
    if let Some(task) = consumer_task {
        let _ = tokio::time::timeout(grace, task).await;
    }
    sweeper_task.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Initialize the tracing subscriber from the logging configuration.
fn init_logging(config: &ServiceConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));

    if config.logging.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("SIGTERM handler installation failed");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
