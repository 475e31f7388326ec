#![forbid(unsafe_code)]

use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use quorum_adapter::{init_tracing, AdapterConfig, SidecarChainClient};
use quorum_contracts::envelope::PROTOCOL_VERSION;
use quorum_contracts::BlockNumber;
use quorum_engines::{SecretValue, SecretVault, Ss58Codec};
use quorum_os::block_time::sync_block_times;
use quorum_os::import::{import_dump, NftDump};
use quorum_os::{shared_store, DaoMetrics, DispatchHandler};
use quorum_storage::SqliteStore;
use quorum_tools::replay::{parse_remark_dump, replay_remarks};
use quorum_tools::vault_cli::{execute_vault_command, parse_secret_input};

#[derive(Parser, Debug)]
#[command(name = "quorum", version, about = "RMRKDAO operator tools")]
struct Cli {
    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Store path; defaults to QUORUM_DB_PATH
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage secrets in the local encrypted vault
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },
    /// Seed NFT and collection state from a consolidated dump
    Import {
        #[arg(long = "in")]
        input: PathBuf,
    },
    /// Back-fill block timestamps from the chain
    SyncBlockTime {
        #[arg(long)]
        start: u64,
        /// Defaults to the finalized head
        #[arg(long)]
        end: Option<u64>,
    },
    /// Dispatch a JSON array of remarks against the store, block by block
    ConsolidateDump {
        #[arg(long)]
        remarks: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum VaultAction {
    Set {
        id: String,
        /// Store raw stdin bytes (or hex at a prompt); resolves as base64
        #[arg(long)]
        binary: bool,
    },
    Has {
        id: String,
    },
    Del {
        id: String,
    },
    Ls,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = AdapterConfig::from_env()?;
    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path.clone());

    match cli.command {
        Command::Vault { action } => run_vault(&config, action),
        Command::Import { input } => {
            let raw = fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let dump = NftDump::from_json(&raw)?;
            let mut store = open_store(&db_path)?;
            let summary = import_dump(&mut store, &dump, PROTOCOL_VERSION)?;
            println!(
                "imported {} nfts and {} collections; consolidation resumes at block {}",
                summary.nfts, summary.collections, summary.next_block.0
            );
            Ok(())
        }
        Command::SyncBlockTime { start, end } => {
            let store = shared_store(open_store(&db_path)?);
            let chain = SidecarChainClient::new(
                &config.sidecar_url,
                None,
                config.http_timeout,
                config.address_format,
            );
            let sync =
                sync_block_times(&store, &chain, BlockNumber(start), end.map(BlockNumber)).await?;
            println!(
                "synced {} block times ({}..={})",
                sync.synced, sync.start.0, sync.end.0
            );
            Ok(())
        }
        Command::ConsolidateDump { remarks } => {
            let raw = fs::read_to_string(&remarks)
                .with_context(|| format!("reading {}", remarks.display()))?;
            let remarks = parse_remark_dump(&raw)?;
            info!(remarks = remarks.len(), "consolidating remark dump");
            let mut store = open_store(&db_path)?;
            let codec = Ss58Codec::new(config.address_format);
            let dispatcher = DispatchHandler::new(Arc::new(codec), DaoMetrics::new()?);
            let summary = replay_remarks(&mut store, &dispatcher, remarks, PROTOCOL_VERSION)?;
            println!(
                "{} blocks: {} applied, {} rejected, {} skipped, {} already consolidated",
                summary.blocks,
                summary.applied,
                summary.rejected,
                summary.skipped,
                summary.already_consolidated
            );
            Ok(())
        }
    }
}

fn open_store(path: &std::path::Path) -> anyhow::Result<SqliteStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    SqliteStore::open_sqlite(path).with_context(|| format!("opening {}", path.display()))
}

fn run_vault(config: &AdapterConfig, action: VaultAction) -> anyhow::Result<()> {
    let vault = match &config.vault_path {
        Some(path) => SecretVault::at(path.clone()),
        None => SecretVault::default_local(),
    };
    let (subcommand, id, value) = match action {
        VaultAction::Set { id, binary } => {
            let value = read_secret_value(&id, binary).map_err(anyhow::Error::msg)?;
            ("set", Some(id), Some(value))
        }
        VaultAction::Has { id } => ("has", Some(id), None),
        VaultAction::Del { id } => ("del", Some(id), None),
        VaultAction::Ls => ("ls", None, None),
    };
    let output = execute_vault_command(&vault, subcommand, id.as_deref(), value.as_ref())
        .map_err(anyhow::Error::msg)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn read_secret_value(secret_id: &str, binary: bool) -> Result<SecretValue, String> {
    if io::stdin().is_terminal() {
        let prompt = if binary {
            format!("Enter hex value for {secret_id}:")
        } else {
            format!("Enter value for {secret_id}:")
        };
        let value = rpassword::prompt_password(prompt).map_err(|e| e.to_string())?;
        parse_secret_input(value.into_bytes(), binary, true)
    } else {
        let mut input = Vec::new();
        io::stdin()
            .read_to_end(&mut input)
            .map_err(|e| e.to_string())?;
        parse_secret_input(input, binary, false)
    }
}
