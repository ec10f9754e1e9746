//! Entrypoint for the persistence service

use std::sync::Arc;

use iox_time::{SystemProvider, TimeProvider};
use observability_deps::tracing::*;
use sessiondb_clap_blocks::{
    batch::BatchingConfig, memory::MemoryConfig, postgres::PostgresConfig, source::SourceConfig,
};
use sessiondb_ingest::{
    ConsumptionLoop, LoopConfig, ProcessMemoryGate, SessionSaver, consumer::file::LogFileConsumer,
};
use sessiondb_shutdown::{ShutdownManager, wait_for_signal};
use sessiondb_write::{Connector, bulk::default_specs, store::postgres::PgStore};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use trogging::cli::LoggingConfig;

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error("failed to connect to postgres: {0}")]
    Store(#[source] sessiondb_write::store::Error),

    #[error("failed to open the event source: {0}")]
    Source(#[source] sessiondb_ingest::consumer::Error),

    #[error("ingest stopped: {0}")]
    Ingest(#[from] sessiondb_ingest::Error),

    #[error("ingest task failed: {0}")]
    IngestTask(#[source] tokio::task::JoinError),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    /// logging options
    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,

    #[clap(flatten)]
    postgres: PostgresConfig,

    #[clap(flatten)]
    batching: BatchingConfig,

    #[clap(flatten)]
    memory: MemoryConfig,

    #[clap(flatten)]
    source: SourceConfig,
}

impl Config {
    fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            commit_batch_timeout: self.batching.commit_batch_timeout,
            memory_backoff: self.memory.backoff,
        }
    }
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let metrics = Arc::new(metric::Registry::default());
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemProvider::new());

    // the service cannot do anything useful without its store
    let store = PgStore::connect(&config.postgres.connection_options())
        .await
        .map_err(Error::Store)?;

    let consumer = LogFileConsumer::open(config.source.file.clone(), config.source.poll_interval)
        .await
        .map_err(Error::Source)?;
    info!(
        source = %consumer.path().display(),
        committed = consumer.committed(),
        "opened event source"
    );

    let connector = Connector::new(
        Arc::new(store),
        config.batching.batch_config(),
        default_specs(),
        time_provider,
        &metrics,
    );
    let gate = ProcessMemoryGate::new(config.memory.limit.bytes(), config.memory.check_interval);
    info!(
        memory_limit = gate.limit_bytes(),
        queue_limit = config.batching.queue_limit.get(),
        size_limit = config.batching.size_limit.get(),
        "memory gate and batching configured"
    );

    let process_exit = CancellationToken::new();
    let shutdown_manager = ShutdownManager::new(process_exit.clone());

    let consumption = ConsumptionLoop::new(
        consumer,
        SessionSaver::new(connector),
        gate,
        config.loop_config(),
        &metrics,
    );
    let mut ingest = tokio::spawn(consumption.run(shutdown_manager.register()));

    info!("sessiondb ready");

    let stopped = tokio::select! {
        _ = wait_for_signal() => None,
        res = &mut ingest => Some(res),
    };
    let res = match stopped {
        Some(res) => {
            info!("consumption loop stopped");
            res
        }
        None => {
            info!("shutdown requested");
            shutdown_manager.shutdown();
            ingest.await
        }
    };

    // the loop completed its token before returning, so this does not wait on it
    shutdown_manager.shutdown();
    shutdown_manager.join().await;

    let res = res.map_err(Error::IngestTask)?;
    info!("sessiondb stopped");
    res.map_err(Error::from)
}
