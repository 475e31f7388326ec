#![forbid(unsafe_code)]

//! Custodian-side election office: queues this custodian's proposals, tallies
//! those whose voting has closed, and submits each RESULT once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use quorum_contracts::dao::{Proposal, QueueStatus, ResultQueueEntry, ResultSubmission};
use quorum_contracts::BlockNumber;
use quorum_engines::tally::{tally_proposal, TallyError};
use quorum_storage::{DaoReader, DaoRepo, ElectionRepo, StorageError};

use crate::lock::{ConsolidationLock, LockError};
use crate::secretary::{SecretaryError, SecretaryOfState};
use crate::{lock_store, unix_now, SharedStore, StorePoisoned};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub tick: Duration,
}

impl MonitorConfig {
    pub fn mvp_v1() -> Self {
        Self {
            tick: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Unable to acquire election monitor lock")]
    LockTimeout,
    #[error("Unable to read consolidation_info table")]
    MissingCursor,
    #[error(transparent)]
    Tally(#[from] TallyError),
    #[error(transparent)]
    Secretary(#[from] SecretaryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Poisoned(#[from] StorePoisoned),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub queued: usize,
    pub abandoned: usize,
    pub submitted: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    SkippedInFlight,
    Completed(TickReport),
}

pub struct ElectionMonitor<S> {
    store: SharedStore<S>,
    secretary: SecretaryOfState,
    config: MonitorConfig,
    in_flight: AtomicBool,
}

impl<S: DaoRepo + 'static> ElectionMonitor<S> {
    pub fn new(store: SharedStore<S>, secretary: SecretaryOfState, config: MonitorConfig) -> Self {
        Self {
            store,
            secretary,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn custodian(&self) -> &str {
        self.secretary.custodian()
    }

    /// Takes the monitor lock (fatal on timeout) and checks the seed resolves.
    pub async fn start(&self, lock: &mut ConsolidationLock<S>) -> Result<(), MonitorError> {
        info!(lock = %lock.name(), "waiting for election monitor lock...");
        if !lock.wait().await? {
            return Err(MonitorError::LockTimeout);
        }
        self.secretary.ensure_ready()?;
        info!(custodian = %self.custodian(), "Custodian ready");
        Ok(())
    }

    /// Queues new proposals as `waiting` and fails rows stuck in `about_to_submit`.
    /// Returns `(queued, abandoned)`.
    pub fn sync_queue(&self) -> Result<(usize, usize), MonitorError> {
        let now = unix_now();
        let custodian = self.custodian();
        let mut store = lock_store(&self.store)?;
        let mut queued = 0;
        for proposal in store.proposals_by_custodian(custodian)? {
            if store.queue_entry(&proposal.id)?.is_some() {
                continue;
            }
            store.put_queue_entry(&ResultQueueEntry {
                proposal_id: proposal.id.clone(),
                custodian: custodian.to_string(),
                status: QueueStatus::Waiting,
                updated_at: now,
            })?;
            debug!(proposal = %proposal.id, "queued proposal");
            queued += 1;
        }
        let mut abandoned = 0;
        for mut entry in store.queue_entries(custodian)? {
            if entry.status != QueueStatus::AboutToSubmit {
                continue;
            }
            warn!(proposal = %entry.proposal_id, "submission was interrupted, marking failed");
            entry.status = QueueStatus::FailedToSubmit;
            entry.updated_at = now;
            store.put_queue_entry(&entry)?;
            abandoned += 1;
        }
        Ok((queued, abandoned))
    }

    /// Proposals of this custodian still `waiting` whose end date is before the time
    /// of the last consolidated block.
    pub fn ready_proposals(&self) -> Result<Vec<Proposal>, MonitorError> {
        let store = lock_store(&self.store)?;
        let cursor = store
            .consolidation_cursor()?
            .ok_or(MonitorError::MissingCursor)?;
        let latest = cursor.latest_block.prev();
        let Some(latest_time) = store.block_time(latest)? else {
            warn!(block = latest.0, "Unable to find block time for latest consolidated block");
            return Ok(Vec::new());
        };
        let mut ready = Vec::new();
        for proposal in store.proposals_by_custodian(self.custodian())? {
            let waiting = matches!(
                store.queue_entry(&proposal.id)?,
                Some(ResultQueueEntry {
                    status: QueueStatus::Waiting,
                    ..
                })
            );
            if waiting && proposal.end_date < latest_time {
                ready.push(proposal);
            }
        }
        Ok(ready)
    }

    fn set_status(&self, proposal_id: &str, status: QueueStatus) -> Result<(), MonitorError> {
        lock_store(&self.store)?.put_queue_entry(&ResultQueueEntry {
            proposal_id: proposal_id.to_string(),
            custodian: self.custodian().to_string(),
            status,
            updated_at: unix_now(),
        })?;
        Ok(())
    }

    fn snapshot_block(&self, proposal: &Proposal) -> Result<Option<BlockNumber>, MonitorError> {
        Ok(lock_store(&self.store)?.latest_block_at_time(proposal.snapshot)?)
    }

    /// One pass: sync the queue, then tally and submit every ready proposal in turn.
    pub async fn tick(&self) -> Result<TickOutcome, MonitorError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Ok(TickOutcome::SkippedInFlight);
        }
        let report = self.process_ready().await?;
        self.in_flight.store(false, Ordering::SeqCst);
        Ok(TickOutcome::Completed(report))
    }

    async fn process_ready(&self) -> Result<TickReport, MonitorError> {
        let (queued, abandoned) = self.sync_queue()?;
        let mut report = TickReport {
            queued,
            abandoned,
            ..TickReport::default()
        };

        for proposal in self.ready_proposals()? {
            let Some(snapshot_block) = self.snapshot_block(&proposal)? else {
                warn!(
                    proposal = %proposal.id,
                    snapshot = proposal.snapshot.0,
                    "Unable to find latest block at proposal snapshot time"
                );
                report.skipped.push(proposal.id);
                continue;
            };

            let result = {
                let store = lock_store(&self.store)?;
                tally_proposal(&*store, &proposal, snapshot_block, false)?
            };

            info!(proposal = %proposal.id, "About to SUBMIT");
            self.set_status(&proposal.id, QueueStatus::AboutToSubmit)?;
            let outcome = self.secretary.submit_result(&result).await?;
            if !outcome.success {
                self.set_status(&proposal.id, QueueStatus::FailedToSubmit)?;
                report.failed.push(proposal.id);
                continue;
            }

            {
                let mut store = lock_store(&self.store)?;
                store.insert_submission(&ResultSubmission {
                    proposal_id: proposal.id.clone(),
                    custodian: self.custodian().to_string(),
                    tx_hash: outcome.hash,
                    submitted_at: unix_now(),
                })?;
            }
            self.set_status(&proposal.id, QueueStatus::ResultSubmitted)?;
            report.submitted.push(proposal.id);
        }
        Ok(report)
    }

    /// Ticks until an error. Ticks that overlap a running pass are skipped.
    pub async fn run(&self) -> Result<(), MonitorError> {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let TickOutcome::Completed(report) = self.tick().await? {
                if !report.submitted.is_empty() || !report.failed.is_empty() {
                    info!(
                        submitted = report.submitted.len(),
                        failed = report.failed.len(),
                        skipped = report.skipped.len(),
                        "election monitor pass finished"
                    );
                }
            }
        }
    }
}
