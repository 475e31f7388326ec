#![forbid(unsafe_code)]

//! Offline consolidation of a remark dump, one committed block at a time.

use std::collections::BTreeMap;

use tracing::{debug, info};

use quorum_contracts::dao::ConsolidationCursor;
use quorum_contracts::remark::Remark;
use quorum_contracts::BlockNumber;
use quorum_os::{DispatchHandler, DispatchOutcome};
use quorum_storage::{ConsolidationRepo, DaoReader, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("remark dump is not a JSON array of remarks: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub blocks: usize,
    pub applied: usize,
    pub rejected: usize,
    pub skipped: usize,
    /// Remarks at or behind the cursor, never dispatched.
    pub already_consolidated: usize,
}

/// `[{block, offset, caller, remark, extra_calls}]`
pub fn parse_remark_dump(raw: &str) -> Result<Vec<Remark>, ReplayError> {
    Ok(serde_json::from_str(raw)?)
}

/// Dispatches `remarks` in `(block, offset)` order. Each block ends by moving the
/// cursor to the next block, which also purges that block's history. Block times
/// must already be present for PROPOSE and VOTE to resolve.
pub fn replay_remarks<S: ConsolidationRepo>(
    store: &mut S,
    dispatcher: &DispatchHandler,
    remarks: Vec<Remark>,
    version: &str,
) -> Result<ReplaySummary, ReplayError> {
    let mut by_block: BTreeMap<BlockNumber, Vec<Remark>> = BTreeMap::new();
    for remark in remarks {
        by_block.entry(remark.block).or_default().push(remark);
    }

    let mut summary = ReplaySummary::default();
    for (block, mut remarks) in by_block {
        remarks.sort_by_key(Remark::position);
        let cursor = store.consolidation_cursor()?;
        if cursor.as_ref().is_some_and(|c| c.latest_block > block) {
            summary.already_consolidated += remarks.len();
            continue;
        }
        for remark in &remarks {
            if cursor
                .as_ref()
                .is_some_and(|c| c.covers(remark.block, remark.offset))
            {
                summary.already_consolidated += 1;
                continue;
            }
            match dispatcher.dispatch(remark, store)? {
                DispatchOutcome::Applied { .. } => summary.applied += 1,
                DispatchOutcome::Rejected { .. } => summary.rejected += 1,
                DispatchOutcome::Skipped(_) => summary.skipped += 1,
            }
        }
        store.commit_cursor(&ConsolidationCursor::processing_from(version, block.next()))?;
        summary.blocks += 1;
        debug!(block = block.0, remarks = remarks.len(), "replayed block");
    }
    info!(
        blocks = summary.blocks,
        applied = summary.applied,
        rejected = summary.rejected,
        "replayed remark dump"
    );
    Ok(summary)
}
