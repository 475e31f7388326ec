#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use quorum_adapter::{
    heartbeat_failure, init_tracing, release_on_exit, shutdown_signal, AdapterConfig,
    SidecarChainClient,
};
use quorum_contracts::AddressCodec;
use quorum_engines::{SecretVault, Ss58Codec};
use quorum_os::{shared_store, ConsolidationLock, ElectionMonitor, SecretaryOfState};
use quorum_storage::SqliteStore;

#[derive(Parser, Debug)]
#[command(
    name = "quorum_election_monitor",
    version,
    about = "Tallies ended proposals and submits their results as the custodian"
)]
struct Args {
    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    info!("quorum_election_monitor v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = AdapterConfig::from_env()?;
    let raw_custodian = config.require_custodian()?;
    let custodian = Ss58Codec::new(config.address_format)
        .normalize(raw_custodian)
        .with_context(|| format!("QUORUM_CUSTODIAN is not a valid address: {raw_custodian}"))?;
    let signer_url = config.require_signer_url()?.to_string();

    let store = shared_store(
        SqliteStore::open_sqlite(&config.db_path)
            .with_context(|| format!("opening {}", config.db_path.display()))?,
    );
    let vault = match &config.vault_path {
        Some(path) => SecretVault::at(path.clone()),
        None => SecretVault::default_local(),
    };
    let chain = Arc::new(SidecarChainClient::new(
        &config.sidecar_url,
        Some(signer_url),
        config.http_timeout,
        config.address_format,
    ));
    let secretary = SecretaryOfState::new(
        chain,
        Arc::new(vault),
        config.custodian_seed_id.clone(),
        custodian,
    );
    let monitor = ElectionMonitor::new(store.clone(), secretary, config.monitor);
    let mut lock = ConsolidationLock::for_election_monitor(store, config.lock);

    let outcome = run(&monitor, &mut lock).await;
    release_on_exit(&mut lock);
    if outcome.is_ok() {
        info!("Election monitor stopped");
    }
    outcome
}

async fn run(
    monitor: &ElectionMonitor<SqliteStore>,
    lock: &mut ConsolidationLock<SqliteStore>,
) -> anyhow::Result<()> {
    tokio::select! {
        started = monitor.start(lock) => started?,
        _ = shutdown_signal() => {
            info!("Shutdown signal received before the lock was acquired");
            return Ok(());
        }
    }

    let mut heartbeat = lock.spawn_heartbeat()?;
    let result = tokio::select! {
        finished = monitor.run() => finished.map_err(anyhow::Error::from),
        exit = &mut heartbeat => Err(heartbeat_failure(exit)),
        _ = shutdown_signal() => {
            info!("Shutdown signal received...");
            Ok(())
        }
    };
    heartbeat.abort();
    result
}
