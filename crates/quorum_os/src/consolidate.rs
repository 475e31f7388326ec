#![forbid(unsafe_code)]

//! Follows finalized heads and folds every RMRKDAO remark into the store.
//!
//! Each block commits atomically: its remarks are applied with history capture
//! on, then the cursor moves to `{block + 1, 0, processing}` in the same
//! transaction that purges the history log. A crash mid-block leaves captured
//! history behind, which `recover` undoes before any new block is read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use quorum_contracts::dao::{ConsolidationCursor, CursorStatus};
use quorum_contracts::envelope::PROTOCOL_VERSION;
use quorum_contracts::remark::Remark;
use quorum_contracts::BlockNumber;
use quorum_storage::{ConsolidationRepo, DaoReader, DaoRepo, StorageError};

use crate::chain::{ChainClient, ChainError};
use crate::dispatch::{DispatchHandler, DispatchOutcome};
use crate::lock::{ConsolidationLock, LockError};
use crate::{lock_store, SharedStore, StorePoisoned};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationConfig {
    pub version: String,
    /// Cursor seeded on first start when no import has set one.
    pub start_block: Option<BlockNumber>,
}

impl ConsolidationConfig {
    pub fn mvp_v1() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            start_block: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsolidationError {
    #[error("Unable to acquire consolidation lock")]
    LockTimeout,
    #[error("Missing consolidation info")]
    MissingCursor,
    #[error("chain returned block {got} when block {requested} was requested")]
    BlockMismatch {
        requested: BlockNumber,
        got: BlockNumber,
    },
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Poisoned(#[from] StorePoisoned),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    LockedIdle,
    Recovering,
    ProcessingBlock(BlockNumber),
    AdvancingCursor(BlockNumber),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadOutcome {
    /// Another head is still being consolidated.
    SkippedInFlight,
    UpToDate,
    Consolidated {
        from: BlockNumber,
        to: BlockNumber,
        applied: usize,
        rejected: usize,
    },
}

pub struct ConsolidationLoop<S> {
    store: SharedStore<S>,
    chain: Arc<dyn ChainClient>,
    dispatcher: DispatchHandler,
    config: ConsolidationConfig,
    in_flight: AtomicBool,
    state: Mutex<LoopState>,
}

impl<S: DaoRepo + 'static> ConsolidationLoop<S> {
    pub fn new(
        store: SharedStore<S>,
        chain: Arc<dyn ChainClient>,
        dispatcher: DispatchHandler,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            store,
            chain,
            dispatcher,
            config,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(LoopState::LockedIdle),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(LoopState::LockedIdle)
    }

    fn set_state(&self, next: LoopState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Takes the lock (fatal on timeout), then recovers any interrupted block.
    pub async fn start(&self, lock: &mut ConsolidationLock<S>) -> Result<usize, ConsolidationError> {
        info!(lock = %lock.name(), "waiting for consolidation lock...");
        if !lock.wait().await? {
            return Err(ConsolidationError::LockTimeout);
        }
        self.recover()
    }

    /// Undoes the captured mutations of a block that never committed. Returns how
    /// many were undone. Seeds the cursor from config when none exists.
    pub fn recover(&self) -> Result<usize, ConsolidationError> {
        self.set_state(LoopState::Recovering);
        let mut store = lock_store(&self.store)?;
        let undone = match store.consolidation_cursor()? {
            None => {
                let Some(start) = self.config.start_block else {
                    return Err(ConsolidationError::MissingCursor);
                };
                info!(block = start.0, "seeding consolidation cursor");
                store.commit_cursor(&ConsolidationCursor::processing_from(
                    &self.config.version,
                    start,
                ))?;
                0
            }
            Some(cursor) if cursor.status == CursorStatus::Processing => {
                let undone = store.replay_and_purge_history()?;
                if undone > 0 {
                    warn!(
                        block = cursor.latest_block.0,
                        undone, "rolled back partially consolidated block"
                    );
                }
                undone
            }
            Some(_) => 0,
        };
        drop(store);
        self.set_state(LoopState::LockedIdle);
        Ok(undone)
    }

    /// Consolidates every block from the cursor through `head`. A call that arrives
    /// while another is running returns `SkippedInFlight` without touching state.
    pub async fn on_new_head(&self, head: BlockNumber) -> Result<HeadOutcome, ConsolidationError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(head = head.0, "consolidation in flight, skipping head");
            return Ok(HeadOutcome::SkippedInFlight);
        }
        // The flag stays set on error; the caller is expected to stop.
        let outcome = self.consolidate_through(head).await?;
        self.in_flight.store(false, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn consolidate_through(&self, head: BlockNumber) -> Result<HeadOutcome, ConsolidationError> {
        let mut cursor = lock_store(&self.store)?
            .consolidation_cursor()?
            .ok_or(ConsolidationError::MissingCursor)?;
        let metrics = self.dispatcher.metrics();
        metrics.set_target(head);
        metrics.set_latest_consolidated(cursor.latest_block.prev());

        let from = cursor.latest_block;
        if from > head {
            return Ok(HeadOutcome::UpToDate);
        }

        let (mut applied, mut rejected) = (0, 0);
        let mut block = from;
        while block <= head {
            self.set_state(LoopState::ProcessingBlock(block));
            let fetched = self.chain.fetch_block(block).await?;
            if fetched.number != block {
                return Err(ConsolidationError::BlockMismatch {
                    requested: block,
                    got: fetched.number,
                });
            }
            let timestamp = fetched
                .timestamp
                .ok_or(ChainError::MissingTimestamp(block))?;
            let mut remarks = fetched.remarks;
            remarks.sort_by_key(Remark::position);

            {
                let mut store = lock_store(&self.store)?;
                store.put_block_time(block, timestamp)?;
                for remark in remarks.iter().filter(|r| !cursor.covers(r.block, r.offset)) {
                    match self.dispatcher.dispatch(remark, &mut *store)? {
                        DispatchOutcome::Applied { .. } => applied += 1,
                        DispatchOutcome::Rejected { .. } => rejected += 1,
                        DispatchOutcome::Skipped(_) => {}
                    }
                }
                self.set_state(LoopState::AdvancingCursor(block));
                let next = ConsolidationCursor::processing_from(&self.config.version, block.next());
                store.commit_cursor(&next)?;
                cursor = next;
            }

            metrics.set_latest_consolidated(block);
            debug!(block = block.0, remarks = remarks.len(), "consolidated block");
            block = block.next();
        }
        self.set_state(LoopState::LockedIdle);
        info!(
            from = from.0,
            to = head.0,
            applied,
            rejected,
            "consolidated through finalized head"
        );
        Ok(HeadOutcome::Consolidated {
            from,
            to: head,
            applied,
            rejected,
        })
    }

    /// Drives the loop from a head subscription. Heads that queue up while a range
    /// is running collapse into the newest one. Returns when the subscription ends.
    pub async fn run(
        &self,
        mut heads: mpsc::Receiver<Result<BlockNumber, ChainError>>,
    ) -> Result<(), ConsolidationError> {
        while let Some(next) = heads.recv().await {
            let mut head = next?;
            while let Ok(pending) = heads.try_recv() {
                head = head.max(pending?);
            }
            self.on_new_head(head).await?;
        }
        info!("head subscription closed");
        Ok(())
    }
}
