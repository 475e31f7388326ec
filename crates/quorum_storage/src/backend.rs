#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

use quorum_contracts::dao::{ConsolidationCursor, HistoryOp, LockRecord};
use quorum_contracts::{BlockNumber, UnixMillis};

use crate::store::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Table {
    Custodian,
    Proposal,
    Vote,
    Result,
    Collection,
    Nft,
    ResultQueue,
    Submission,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::Custodian,
        Table::Proposal,
        Table::Vote,
        Table::Result,
        Table::Collection,
        Table::Nft,
        Table::ResultQueue,
        Table::Submission,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Table::Custodian => "custodians",
            Table::Proposal => "proposals",
            Table::Vote => "votes",
            Table::Result => "results",
            Table::Collection => "collections",
            Table::Nft => "nfts",
            Table::ResultQueue => "result_queue",
            Table::Submission => "result_submissions",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }

    /// Tables the consolidation loop writes; their mutations are captured while processing.
    pub fn captured(self) -> bool {
        matches!(
            self,
            Table::Custodian | Table::Proposal | Table::Vote | Table::Result
        )
    }
}

/// A stored row. `part` groups rows for secondary lookups (votes by proposal,
/// NFTs by collection, proposals by custodian) and is empty otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub key: String,
    pub part: String,
    pub body: Value,
}

/// One row-level mutation with its pre- and post-image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub table: Table,
    pub op: HistoryOp,
    pub key: String,
    pub part: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl RowChange {
    /// The change that restores `before`.
    pub fn inverse(&self) -> Self {
        let op = match self.op {
            HistoryOp::Insert => HistoryOp::Delete,
            HistoryOp::Update => HistoryOp::Update,
            HistoryOp::Delete => HistoryOp::Insert,
        };
        Self {
            table: self.table,
            op,
            key: self.key.clone(),
            part: self.part.clone(),
            before: self.after.clone(),
            after: self.before.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub seq: u64,
    pub change: RowChange,
}

/// Storage engine beneath `DaoStore`. Every method is atomic on its own.
pub trait StoreBackend: Send {
    fn get_row(&self, table: Table, key: &str) -> Result<Option<StoredRow>, StorageError>;

    /// Rows ordered by key, optionally restricted to one partition.
    fn scan(&self, table: Table, part: Option<&str>) -> Result<Vec<StoredRow>, StorageError>;

    /// Writes `change.after` (or deletes when `None`) and, when `capture` is set,
    /// appends the change to the history log in the same transaction.
    fn apply(&mut self, change: &RowChange, capture: bool) -> Result<(), StorageError>;

    /// History ordered by ascending sequence number.
    fn history(&self) -> Result<Vec<HistoryEntry>, StorageError>;

    /// Empties the history log and, if given, writes the cursor in the same transaction.
    fn purge_history(&mut self, cursor: Option<&ConsolidationCursor>)
        -> Result<(), StorageError>;

    fn cursor(&self, version: &str) -> Result<Option<ConsolidationCursor>, StorageError>;

    fn put_block_time(&mut self, block: BlockNumber, time: UnixMillis)
        -> Result<(), StorageError>;

    fn block_time(&self, block: BlockNumber) -> Result<Option<UnixMillis>, StorageError>;

    fn latest_block_at_time(&self, time: UnixMillis)
        -> Result<Option<BlockNumber>, StorageError>;

    /// Inserts the lock row, or takes over a row whose lease ended before `now`.
    fn try_acquire_lock(&mut self, lock: &LockRecord, now: UnixMillis)
        -> Result<bool, StorageError>;

    fn renew_lock(
        &mut self,
        name: &str,
        holder: &str,
        token: &str,
        expires_at: UnixMillis,
    ) -> Result<bool, StorageError>;

    fn release_lock(&mut self, name: &str, holder: &str, token: &str)
        -> Result<bool, StorageError>;

    fn lock_record(&self, name: &str) -> Result<Option<LockRecord>, StorageError>;
}
