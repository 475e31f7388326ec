#![forbid(unsafe_code)]

use std::time::Duration;

use rand::RngCore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use quorum_contracts::dao::LockRecord;
use quorum_contracts::envelope::PROTOCOL_VERSION;
use quorum_contracts::UnixMillis;
use quorum_storage::{LockRepo, StorageError};

use crate::{lock_store, unix_now, SharedStore, StorePoisoned};

pub const ELECTION_MONITOR_LOCK: &str = "election-monitor-2.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    pub timeout: Duration,
    pub lease: Duration,
    pub poll_interval: Duration,
}

impl LockConfig {
    pub fn mvp_v1() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            lease: Duration::from_millis(60_000),
            poll_interval: Duration::from_millis(1_000),
        }
    }

    pub fn heartbeat(&self) -> Duration {
        self.lease / 3
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Poisoned(#[from] StorePoisoned),
    #[error("lock {name} was lost to another holder")]
    Lost { name: String },
    #[error("lock {name} is not held")]
    NotHeld { name: String },
}

/// Named cross-process lock with a renewable lease.
///
/// The row's `holder` is `<host>-<pid>`; the `token` is fresh per acquisition so a
/// restarted process on the same host never releases a lock it did not take.
pub struct ConsolidationLock<S> {
    store: SharedStore<S>,
    name: String,
    holder: String,
    token: Option<String>,
    config: LockConfig,
}

impl<S: LockRepo + Send + 'static> ConsolidationLock<S> {
    pub fn new(store: SharedStore<S>, name: impl Into<String>, config: LockConfig) -> Self {
        Self {
            store,
            name: name.into(),
            holder: default_holder(),
            token: None,
            config,
        }
    }

    /// The consolidator's lock, named after the protocol version.
    pub fn for_consolidation(store: SharedStore<S>, config: LockConfig) -> Self {
        Self::new(store, PROTOCOL_VERSION, config)
    }

    pub fn for_election_monitor(store: SharedStore<S>, config: LockConfig) -> Self {
        Self::new(store, ELECTION_MONITOR_LOCK, config)
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn config(&self) -> LockConfig {
        self.config
    }

    /// One acquisition attempt. Takes over the row only if its lease has expired.
    pub fn try_acquire(&mut self) -> Result<bool, LockError> {
        let token = random_token();
        let now = unix_now();
        let record = LockRecord {
            name: self.name.clone(),
            holder: self.holder.clone(),
            token: token.clone(),
            expires_at: lease_end(now, self.config.lease),
        };
        let acquired = lock_store(&self.store)?.try_acquire_lock(&record, now)?;
        if acquired {
            self.token = Some(token);
        }
        Ok(acquired)
    }

    /// Tries immediately, then once per poll interval until the timeout elapses.
    pub async fn wait(&mut self) -> Result<bool, LockError> {
        let deadline = Instant::now() + self.config.timeout;
        loop {
            if self.try_acquire()? {
                info!(lock = %self.name, holder = %self.holder, "acquired lock");
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(lock = %self.name, "timed out waiting for lock");
                return Ok(false);
            }
            debug!(lock = %self.name, "lock is held elsewhere, retrying");
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    pub fn renew(&self) -> Result<(), LockError> {
        let Some(token) = self.token.as_deref() else {
            return Err(LockError::NotHeld {
                name: self.name.clone(),
            });
        };
        renew_lease(&self.store, &self.name, &self.holder, token, self.config.lease)
    }

    /// Deletes the row only when both holder and token still match.
    pub fn release(&mut self) -> Result<bool, LockError> {
        let Some(token) = self.token.take() else {
            return Ok(false);
        };
        let released = lock_store(&self.store)?.release_lock(&self.name, &self.holder, &token)?;
        if released {
            info!(lock = %self.name, "released lock");
        } else {
            warn!(lock = %self.name, "unable to release lock");
        }
        Ok(released)
    }

    /// Renews the lease every `lease / 3`. The task only finishes when a renewal
    /// fails, yielding the reason.
    pub fn spawn_heartbeat(&self) -> Result<JoinHandle<LockError>, LockError> {
        let Some(token) = self.token.clone() else {
            return Err(LockError::NotHeld {
                name: self.name.clone(),
            });
        };
        let store = self.store.clone();
        let name = self.name.clone();
        let holder = self.holder.clone();
        let lease = self.config.lease;
        let period = self.config.heartbeat();
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = renew_lease(&store, &name, &holder, &token, lease) {
                    warn!(lock = %name, error = %err, "lock heartbeat failed");
                    return err;
                }
                debug!(lock = %name, "renewed lock lease");
            }
        }))
    }
}

fn renew_lease<S: LockRepo>(
    store: &SharedStore<S>,
    name: &str,
    holder: &str,
    token: &str,
    lease: Duration,
) -> Result<(), LockError> {
    let renewed = lock_store(store)?.renew_lock(name, holder, token, lease_end(unix_now(), lease))?;
    if renewed {
        Ok(())
    } else {
        Err(LockError::Lost {
            name: name.to_string(),
        })
    }
}

fn lease_end(now: UnixMillis, lease: Duration) -> UnixMillis {
    let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX);
    UnixMillis(now.0.saturating_add(lease_ms))
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn default_holder() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string());
    format!("{host}-{}", std::process::id())
}
