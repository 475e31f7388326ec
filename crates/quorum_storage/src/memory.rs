#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use quorum_contracts::dao::{ConsolidationCursor, LockRecord};
use quorum_contracts::{BlockNumber, UnixMillis};

use crate::backend::{HistoryEntry, RowChange, StoreBackend, StoredRow, Table};
use crate::store::StorageError;

/// Process-local backend for tests and offline tooling.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: BTreeMap<Table, BTreeMap<String, StoredRow>>,
    history: Vec<HistoryEntry>,
    next_seq: u64,
    cursors: BTreeMap<String, ConsolidationCursor>,
    block_times: BTreeMap<BlockNumber, UnixMillis>,
    locks: BTreeMap<String, LockRecord>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreBackend for MemoryBackend {
    fn get_row(&self, table: Table, key: &str) -> Result<Option<StoredRow>, StorageError> {
        Ok(self.rows.get(&table).and_then(|t| t.get(key)).cloned())
    }

    fn scan(&self, table: Table, part: Option<&str>) -> Result<Vec<StoredRow>, StorageError> {
        let Some(rows) = self.rows.get(&table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .values()
            .filter(|row| part.map_or(true, |p| row.part == p))
            .cloned()
            .collect())
    }

    fn apply(&mut self, change: &RowChange, capture: bool) -> Result<(), StorageError> {
        let rows = self.rows.entry(change.table).or_default();
        match &change.after {
            Some(body) => {
                rows.insert(
                    change.key.clone(),
                    StoredRow {
                        key: change.key.clone(),
                        part: change.part.clone(),
                        body: body.clone(),
                    },
                );
            }
            None => {
                rows.remove(&change.key);
            }
        }
        if capture {
            self.next_seq += 1;
            self.history.push(HistoryEntry {
                seq: self.next_seq,
                change: change.clone(),
            });
        }
        Ok(())
    }

    fn history(&self) -> Result<Vec<HistoryEntry>, StorageError> {
        Ok(self.history.clone())
    }

    fn purge_history(
        &mut self,
        cursor: Option<&ConsolidationCursor>,
    ) -> Result<(), StorageError> {
        self.history.clear();
        if let Some(cursor) = cursor {
            self.cursors.insert(cursor.version.clone(), cursor.clone());
        }
        Ok(())
    }

    fn cursor(&self, version: &str) -> Result<Option<ConsolidationCursor>, StorageError> {
        Ok(self.cursors.get(version).cloned())
    }

    fn put_block_time(
        &mut self,
        block: BlockNumber,
        time: UnixMillis,
    ) -> Result<(), StorageError> {
        self.block_times.insert(block, time);
        Ok(())
    }

    fn block_time(&self, block: BlockNumber) -> Result<Option<UnixMillis>, StorageError> {
        Ok(self.block_times.get(&block).copied())
    }

    fn latest_block_at_time(
        &self,
        time: UnixMillis,
    ) -> Result<Option<BlockNumber>, StorageError> {
        Ok(self
            .block_times
            .iter()
            .rev()
            .find(|(_, t)| **t <= time)
            .map(|(b, _)| *b))
    }

    fn try_acquire_lock(
        &mut self,
        lock: &LockRecord,
        now: UnixMillis,
    ) -> Result<bool, StorageError> {
        if let Some(existing) = self.locks.get(&lock.name) {
            if existing.expires_at >= now {
                return Ok(false);
            }
        }
        self.locks.insert(lock.name.clone(), lock.clone());
        Ok(true)
    }

    fn renew_lock(
        &mut self,
        name: &str,
        holder: &str,
        token: &str,
        expires_at: UnixMillis,
    ) -> Result<bool, StorageError> {
        match self.locks.get_mut(name) {
            Some(lock) if lock.holder == holder && lock.token == token => {
                lock.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn release_lock(
        &mut self,
        name: &str,
        holder: &str,
        token: &str,
    ) -> Result<bool, StorageError> {
        match self.locks.get(name) {
            Some(lock) if lock.holder == holder && lock.token == token => {
                self.locks.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn lock_record(&self, name: &str) -> Result<Option<LockRecord>, StorageError> {
        Ok(self.locks.get(name).cloned())
    }
}
