#![forbid(unsafe_code)]

pub mod config;
pub mod metrics_server;
pub mod runtime;
pub mod sidecar;

pub use config::{AdapterConfig, AdapterConfigError};
pub use metrics_server::{metrics_router, spawn_metrics_server};
pub use runtime::{heartbeat_failure, init_tracing, release_on_exit, shutdown_signal};
pub use sidecar::{chain_block_from_sidecar, SidecarChainClient};
