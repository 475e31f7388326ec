#![forbid(unsafe_code)]

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use quorum_contracts::BlockNumber;
use quorum_os::{LockConfig, MonitorConfig};

pub const DEFAULT_METRICS_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_SIDECAR_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_CUSTODIAN_SEED_ID: &str = "custodian_seed";
/// Kusama.
pub const DEFAULT_ADDRESS_FORMAT: u16 = 2;
const MAX_ADDRESS_FORMAT: u16 = 16_383;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterConfigError {
    #[error("{var} is not a valid socket address: {value}")]
    InvalidBind { var: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub db_path: PathBuf,
    pub sidecar_url: String,
    /// SS58 format every chain address is re-encoded into.
    pub address_format: u16,
    pub signer_url: Option<String>,
    pub metrics_bind: SocketAddr,
    pub lock: LockConfig,
    pub head_poll: Duration,
    pub monitor: MonitorConfig,
    pub custodian: Option<String>,
    pub custodian_seed_id: String,
    pub vault_path: Option<PathBuf>,
    pub start_block: Option<BlockNumber>,
    pub http_timeout: Duration,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, AdapterConfigError> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    pub fn from_env_var_map<F>(mut env_getter: F) -> Result<Self, AdapterConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let metrics_bind = parse_socket_addr(
            "QUORUM_METRICS_BIND",
            env_getter("QUORUM_METRICS_BIND"),
            DEFAULT_METRICS_BIND,
        )?;
        let defaults = LockConfig::mvp_v1();
        let lock = LockConfig {
            timeout: parse_millis(
                env_getter("QUORUM_LOCK_TIMEOUT_MS"),
                1_000..=3_600_000,
                defaults.timeout,
            ),
            lease: parse_millis(
                env_getter("QUORUM_LOCK_LEASE_MS"),
                3_000..=3_600_000,
                defaults.lease,
            ),
            poll_interval: defaults.poll_interval,
        };
        let monitor = MonitorConfig {
            tick: parse_millis(
                env_getter("QUORUM_MONITOR_INTERVAL_MS"),
                1_000..=3_600_000,
                MonitorConfig::mvp_v1().tick,
            ),
        };
        Ok(Self {
            db_path: non_empty(env_getter("QUORUM_DB_PATH"))
                .map(PathBuf::from)
                .unwrap_or_else(default_db_path),
            sidecar_url: non_empty(env_getter("QUORUM_SIDECAR_URL"))
                .unwrap_or_else(|| DEFAULT_SIDECAR_URL.to_string()),
            address_format: non_empty(env_getter("QUORUM_ADDRESS_FORMAT"))
                .and_then(|v| v.parse::<u16>().ok())
                .filter(|v| *v <= MAX_ADDRESS_FORMAT)
                .unwrap_or(DEFAULT_ADDRESS_FORMAT),
            signer_url: non_empty(env_getter("QUORUM_SIGNER_URL")),
            metrics_bind,
            lock,
            head_poll: parse_millis(
                env_getter("QUORUM_HEAD_POLL_MS"),
                500..=60_000,
                Duration::from_millis(6_000),
            ),
            monitor,
            custodian: non_empty(env_getter("QUORUM_CUSTODIAN")),
            custodian_seed_id: non_empty(env_getter("QUORUM_CUSTODIAN_SEED_ID"))
                .unwrap_or_else(|| DEFAULT_CUSTODIAN_SEED_ID.to_string()),
            vault_path: non_empty(env_getter("QUORUM_VAULT_PATH")).map(PathBuf::from),
            start_block: non_empty(env_getter("QUORUM_START_BLOCK"))
                .and_then(|v| v.parse::<u64>().ok())
                .map(BlockNumber),
            http_timeout: parse_millis(
                env_getter("QUORUM_HTTP_TIMEOUT_MS"),
                1_000..=300_000,
                Duration::from_millis(30_000),
            ),
        })
    }

    /// The election monitor cannot run without a custodian to act for.
    pub fn require_custodian(&self) -> Result<&str, AdapterConfigError> {
        self.custodian
            .as_deref()
            .ok_or(AdapterConfigError::Missing("QUORUM_CUSTODIAN"))
    }

    pub fn require_signer_url(&self) -> Result<&str, AdapterConfigError> {
        self.signer_url
            .as_deref()
            .ok_or(AdapterConfigError::Missing("QUORUM_SIGNER_URL"))
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Out-of-range or unparseable values fall back to the default.
fn parse_millis(
    raw: Option<String>,
    range: std::ops::RangeInclusive<u64>,
    default: Duration,
) -> Duration {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| range.contains(v))
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn parse_socket_addr(
    var: &'static str,
    raw: Option<String>,
    default: &str,
) -> Result<SocketAddr, AdapterConfigError> {
    let value = non_empty(raw).unwrap_or_else(|| default.to_string());
    value
        .parse()
        .map_err(|_| AdapterConfigError::InvalidBind { var, value })
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".quorum").join("quorum.sqlite")
}
