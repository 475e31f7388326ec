#![forbid(unsafe_code)]

pub mod block_time;
pub mod chain;
pub mod consolidate;
pub mod dispatch;
pub mod import;
pub mod lock;
pub mod metrics;
pub mod monitor;
pub mod secretary;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use quorum_contracts::UnixMillis;

pub use chain::{subscribe_finalized_heads, ChainBlock, ChainClient, ChainError, TxOutcome};
pub use consolidate::{ConsolidationConfig, ConsolidationError, ConsolidationLoop, HeadOutcome};
pub use dispatch::{DispatchHandler, DispatchOutcome};
pub use lock::{ConsolidationLock, LockConfig, LockError};
pub use metrics::{DaoMetrics, InteractionOutcome, MetricsError};
pub use monitor::{ElectionMonitor, MonitorConfig, MonitorError};
pub use secretary::{SecretaryError, SecretaryOfState};

/// The single store a process writes through. Every role shares one handle.
pub type SharedStore<S> = Arc<Mutex<S>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("store mutex poisoned")]
pub struct StorePoisoned;

pub fn shared_store<S>(store: S) -> SharedStore<S> {
    Arc::new(Mutex::new(store))
}

pub fn lock_store<S>(store: &SharedStore<S>) -> Result<MutexGuard<'_, S>, StorePoisoned> {
    store.lock().map_err(|_| StorePoisoned)
}

pub fn unix_now() -> UnixMillis {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    UnixMillis(u64::try_from(millis).unwrap_or(u64::MAX))
}
