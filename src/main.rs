//! etcdscout server binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{error, info};

use etcdscout::config::{init_logging, Config};
use etcdscout::http::HttpServer;
use etcdscout::ingestor::Ingestor;
use etcdscout::service::ScoutService;
use etcdscout::{etcd, kvstore};

#[derive(Parser)]
#[command(name = "etcdscout")]
#[command(about = "Search-accelerated mirror over an etcd keyspace")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    init_logging(config.log.level);

    info!("initializing etcdscout");
    run(config).await
}

async fn run(config: Config) -> Result<()> {
    info!(endpoints = %config.etcd.endpoints, version = ?config.etcd.version, "connecting to etcd");
    let etcd_client = etcd::connect(&config.etcd)
        .await
        .context("failed to create etcd client")?;
    let store = kvstore::open(&config.datastore).context("failed to open datastore")?;

    let (shutdown_tx, _) = broadcast::channel(16);
    let ingestor = Arc::new(Ingestor::new(etcd_client.clone(), store.clone()));

    // The watch starts before the seed so no change is missed; events queue
    // in the bounded channel until the applier drains them, and a stale seed
    // row is corrected by the next change to that key.
    let updater = ingestor.clone();
    let updater_shutdown = shutdown_tx.subscribe();
    let mut change_task = tokio::spawn(async move {
        updater
            .change_updater(updater_shutdown)
            .await
            .map_err(anyhow::Error::new)
    });

    let mut auditor_errors = etcd_client.start_auditor(shutdown_tx.subscribe());

    info!("seeding kv store from existing etcd data");
    ingestor
        .init_kv_store()
        .await
        .context("failed to initialize kv store")?;

    let service = Arc::new(ScoutService::new(
        etcd_client.clone(),
        store.clone(),
        ingestor.clone(),
    ));
    let server = HttpServer::new(config.server.port.clone(), service);
    let server_shutdown = shutdown_tx.subscribe();
    let mut server_task = tokio::spawn(async move { server.run(server_shutdown).await });

    let result = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
        outcome = &mut change_task => Err(task_failure("change updater", outcome)),
        maybe_err = auditor_errors.recv() => match maybe_err {
            Some(err) => Err(anyhow::Error::new(err).context("etcd connection auditor failed")),
            None => Err(anyhow!("etcd connection auditor stopped unexpectedly")),
        },
        outcome = &mut server_task => Err(task_failure("http server", outcome)),
    };

    let _ = shutdown_tx.send(());
    if result.is_ok() {
        // let the server finish in-flight requests
        let _ = server_task.await;
    }

    let _ = store.close().await;
    let _ = etcd_client.close().await;

    match &result {
        Ok(()) => info!("clean shutdown"),
        Err(err) => error!(error = %err, "fatal background failure"),
    }
    result
}

/// Normalizes a finished background task into its fatal error.
fn task_failure(
    name: &str,
    outcome: std::result::Result<Result<()>, JoinError>,
) -> anyhow::Error {
    match outcome {
        Ok(Ok(())) => anyhow!("{name} stopped unexpectedly"),
        Ok(Err(err)) => err.context(format!("{name} failed")),
        Err(join_err) => anyhow::Error::new(join_err).context(format!("{name} panicked")),
    }
}
