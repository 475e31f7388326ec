#![forbid(unsafe_code)]

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use quorum_contracts::dao::{ConsolidationCursor, CursorStatus, HistoryOp};
use quorum_contracts::envelope::PROTOCOL_VERSION;
use quorum_contracts::ContractViolation;

use crate::backend::{HistoryEntry, RowChange, StoreBackend, Table};
use crate::memory::MemoryBackend;
use crate::sqlite::SqliteBackend;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("foreign key violation in {table}: {key}")]
    ForeignKeyViolation { table: &'static str, key: String },
    #[error("duplicate key in {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
    #[error("contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("row encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    Insert,
    Upsert,
}

/// Typed DAO state over a backend. Mutations of captured tables are recorded in
/// the history log while the cursor for this protocol version is `processing`.
#[derive(Debug)]
pub struct DaoStore<B> {
    backend: B,
    version: String,
}

impl DaoStore<MemoryBackend> {
    pub fn new_in_memory() -> Self {
        Self::with_backend(MemoryBackend::new(), PROTOCOL_VERSION)
    }
}

impl DaoStore<SqliteBackend> {
    pub fn open_sqlite(path: &Path) -> Result<Self, StorageError> {
        Ok(Self::with_backend(
            SqliteBackend::open(path)?,
            PROTOCOL_VERSION,
        ))
    }

    pub fn open_sqlite_in_memory() -> Result<Self, StorageError> {
        Ok(Self::with_backend(
            SqliteBackend::open_in_memory()?,
            PROTOCOL_VERSION,
        ))
    }
}

impl<B: StoreBackend> DaoStore<B> {
    pub fn with_backend(backend: B, version: &str) -> Self {
        Self {
            backend,
            version: version.to_string(),
        }
    }

    pub fn protocol_version(&self) -> &str {
        &self.version
    }

    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn capturing(&self, table: Table) -> Result<bool, StorageError> {
        if !table.captured() {
            return Ok(false);
        }
        Ok(matches!(
            self.backend.cursor(&self.version)?,
            Some(ConsolidationCursor {
                status: CursorStatus::Processing,
                ..
            })
        ))
    }

    pub(crate) fn read<T: DeserializeOwned>(
        &self,
        table: Table,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        self.backend
            .get_row(table, key)?
            .map(|row| serde_json::from_value(row.body))
            .transpose()
            .map_err(|e| StorageError::CorruptRow {
                table: table.as_str(),
                reason: e.to_string(),
            })
    }

    pub(crate) fn read_all<T: DeserializeOwned>(
        &self,
        table: Table,
        part: Option<&str>,
    ) -> Result<Vec<T>, StorageError> {
        self.backend
            .scan(table, part)?
            .into_iter()
            .map(|row| {
                serde_json::from_value(row.body).map_err(|e| StorageError::CorruptRow {
                    table: table.as_str(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    pub(crate) fn write<T: Serialize>(
        &mut self,
        table: Table,
        key: &str,
        part: &str,
        value: &T,
        mode: WriteMode,
    ) -> Result<HistoryOp, StorageError> {
        let before = self.backend.get_row(table, key)?.map(|row| row.body);
        if mode == WriteMode::Insert && before.is_some() {
            return Err(StorageError::DuplicateKey {
                table: table.as_str(),
                key: key.to_string(),
            });
        }
        let op = if before.is_some() {
            HistoryOp::Update
        } else {
            HistoryOp::Insert
        };
        let change = RowChange {
            table,
            op,
            key: key.to_string(),
            part: part.to_string(),
            before,
            after: Some(serde_json::to_value(value)?),
        };
        let capture = self.capturing(table)?;
        self.backend.apply(&change, capture)?;
        Ok(op)
    }

    /// Deletes a row through the same capture path as every other mutation.
    pub fn delete_row(&mut self, table: Table, key: &str) -> Result<bool, StorageError> {
        let Some(row) = self.backend.get_row(table, key)? else {
            return Ok(false);
        };
        let change = RowChange {
            table,
            op: HistoryOp::Delete,
            key: key.to_string(),
            part: row.part,
            before: Some(row.body),
            after: None,
        };
        let capture = self.capturing(table)?;
        self.backend.apply(&change, capture)?;
        Ok(true)
    }

    pub fn history(&self) -> Result<Vec<HistoryEntry>, StorageError> {
        self.backend.history()
    }

    /// Undoes every captured change newest-first, then empties the log.
    /// Each undo restores a pre-image, so an interrupted replay can be rerun.
    pub fn replay_history(&mut self) -> Result<usize, StorageError> {
        let entries = self.backend.history()?;
        for entry in entries.iter().rev() {
            debug!(
                seq = entry.seq,
                table = entry.change.table.as_str(),
                op = entry.change.op.as_str(),
                key = %entry.change.key,
                "undoing captured change"
            );
            self.backend.apply(&entry.change.inverse(), false)?;
        }
        self.backend.purge_history(None)?;
        if !entries.is_empty() {
            info!(undone = entries.len(), "history replay restored last completed block");
        }
        Ok(entries.len())
    }

    /// Purges the history log and moves the cursor in one transaction.
    pub fn commit_block(&mut self, next: &ConsolidationCursor) -> Result<(), StorageError> {
        self.backend.purge_history(Some(next))
    }
}
