#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use quorum_adapter::{
    heartbeat_failure, init_tracing, release_on_exit, shutdown_signal, spawn_metrics_server,
    AdapterConfig, SidecarChainClient,
};
use quorum_engines::Ss58Codec;
use quorum_os::{
    shared_store, subscribe_finalized_heads, ChainClient, ConsolidationConfig, ConsolidationLock,
    ConsolidationLoop, DaoMetrics, DispatchHandler,
};
use quorum_storage::SqliteStore;

#[derive(Parser, Debug)]
#[command(name = "quorum_consolidator", version, about = "RMRKDAO remark consolidator")]
struct Args {
    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    info!("quorum_consolidator v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = AdapterConfig::from_env()?;
    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = shared_store(SqliteStore::open_sqlite(&config.db_path)?);
    let metrics = DaoMetrics::new()?;
    let metrics_task = spawn_metrics_server(config.metrics_bind, metrics.clone()).await?;

    let chain: Arc<dyn ChainClient> = Arc::new(SidecarChainClient::new(
        &config.sidecar_url,
        config.signer_url.clone(),
        config.http_timeout,
        config.address_format,
    ));
    let consolidation = ConsolidationLoop::new(
        store.clone(),
        chain.clone(),
        DispatchHandler::new(Arc::new(Ss58Codec::new(config.address_format)), metrics),
        ConsolidationConfig {
            start_block: config.start_block,
            ..ConsolidationConfig::mvp_v1()
        },
    );
    let mut lock = ConsolidationLock::for_consolidation(store, config.lock);

    let outcome = run(&consolidation, &mut lock, chain, &config).await;
    release_on_exit(&mut lock);
    metrics_task.abort();
    if outcome.is_ok() {
        info!("Consolidator stopped");
    }
    outcome
}

async fn run(
    consolidation: &ConsolidationLoop<SqliteStore>,
    lock: &mut ConsolidationLock<SqliteStore>,
    chain: Arc<dyn ChainClient>,
    config: &AdapterConfig,
) -> anyhow::Result<()> {
    let undone = tokio::select! {
        started = consolidation.start(lock) => started?,
        _ = shutdown_signal() => {
            info!("Shutdown signal received before the lock was acquired");
            return Ok(());
        }
    };
    info!(undone, "Consolidation lock acquired");

    let mut heartbeat = lock.spawn_heartbeat()?;
    let heads = subscribe_finalized_heads(chain, config.head_poll);
    let result = tokio::select! {
        finished = consolidation.run(heads) => match finished {
            Ok(()) => Err(anyhow::anyhow!("finalized head subscription ended")),
            Err(err) => Err(err.into()),
        },
        exit = &mut heartbeat => Err(heartbeat_failure(exit)),
        _ = shutdown_signal() => {
            info!("Shutdown signal received...");
            Ok(())
        }
    };
    heartbeat.abort();
    result
}
