#![forbid(unsafe_code)]

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use quorum_contracts::dao::{ConsolidationCursor, CursorStatus, HistoryOp, LockRecord};
use quorum_contracts::{BlockNumber, UnixMillis};

use crate::backend::{HistoryEntry, RowChange, StoreBackend, StoredRow, Table};
use crate::store::StorageError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite backend shared by the consolidator, the election monitor and the operator CLI.
pub struct SqliteBackend {
    conn: Connection,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").finish_non_exhaustive()
    }
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let backend = Self { conn };
        backend.init_schema()?;
        Ok(backend)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        for table in Table::ALL {
            let name = table.as_str();
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {name} (
                    key TEXT PRIMARY KEY,
                    part TEXT NOT NULL,
                    body TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{name}_part ON {name}(part);"
            ))?;
        }
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                tbl TEXT NOT NULL,
                op TEXT NOT NULL,
                key TEXT NOT NULL,
                part TEXT NOT NULL,
                before TEXT,
                after TEXT
            );
            CREATE TABLE IF NOT EXISTS consolidation_cursor (
                version TEXT PRIMARY KEY,
                latest_block INTEGER NOT NULL,
                latest_offset INTEGER NOT NULL,
                status TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS block_time (
                block INTEGER PRIMARY KEY,
                time INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_block_time_time ON block_time(time);
            CREATE TABLE IF NOT EXISTS consolidation_lock (
                name TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                token TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }
}

fn encode(value: &Option<Value>) -> Result<Option<String>, StorageError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(StorageError::from)
}

fn decode(table: &'static str, raw: Option<String>) -> Result<Option<Value>, StorageError> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| StorageError::CorruptRow {
            table,
            reason: e.to_string(),
        })
    })
    .transpose()
}

fn stored_row(table: Table, row: &Row<'_>) -> Result<StoredRow, StorageError> {
    let body: String = row.get(2)?;
    Ok(StoredRow {
        key: row.get(0)?,
        part: row.get(1)?,
        body: serde_json::from_str(&body).map_err(|e| StorageError::CorruptRow {
            table: table.as_str(),
            reason: e.to_string(),
        })?,
    })
}

fn write_change(conn: &Connection, change: &RowChange) -> Result<(), StorageError> {
    let name = change.table.as_str();
    match &change.after {
        Some(body) => {
            conn.execute(
                &format!(
                    "INSERT INTO {name} (key, part, body) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET part = excluded.part, body = excluded.body"
                ),
                params![change.key, change.part, serde_json::to_string(body)?],
            )?;
        }
        None => {
            conn.execute(
                &format!("DELETE FROM {name} WHERE key = ?1"),
                params![change.key],
            )?;
        }
    }
    Ok(())
}

fn write_cursor(conn: &Connection, cursor: &ConsolidationCursor) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO consolidation_cursor (version, latest_block, latest_offset, status)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(version) DO UPDATE SET
            latest_block = excluded.latest_block,
            latest_offset = excluded.latest_offset,
            status = excluded.status",
        params![
            cursor.version,
            cursor.latest_block.0,
            cursor.latest_offset,
            cursor.status.as_str()
        ],
    )?;
    Ok(())
}

impl StoreBackend for SqliteBackend {
    fn get_row(&self, table: Table, key: &str) -> Result<Option<StoredRow>, StorageError> {
        let name = table.as_str();
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT key, part, body FROM {name} WHERE key = ?1"))?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(stored_row(table, row)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, table: Table, part: Option<&str>) -> Result<Vec<StoredRow>, StorageError> {
        let name = table.as_str();
        let mut out = Vec::new();
        match part {
            Some(part) => {
                let mut stmt = self.conn.prepare_cached(&format!(
                    "SELECT key, part, body FROM {name} WHERE part = ?1 ORDER BY key"
                ))?;
                let mut rows = stmt.query(params![part])?;
                while let Some(row) = rows.next()? {
                    out.push(stored_row(table, row)?);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare_cached(&format!("SELECT key, part, body FROM {name} ORDER BY key"))?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    out.push(stored_row(table, row)?);
                }
            }
        }
        Ok(out)
    }

    fn apply(&mut self, change: &RowChange, capture: bool) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        write_change(&tx, change)?;
        if capture {
            tx.execute(
                "INSERT INTO history (tbl, op, key, part, before, after)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    change.table.as_str(),
                    change.op.as_str(),
                    change.key,
                    change.part,
                    encode(&change.before)?,
                    encode(&change.after)?
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn history(&self) -> Result<Vec<HistoryEntry>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT seq, tbl, op, key, part, before, after FROM history ORDER BY seq",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let tbl: String = row.get(1)?;
            let op: String = row.get(2)?;
            let table = Table::parse(&tbl).ok_or_else(|| StorageError::CorruptRow {
                table: "history",
                reason: format!("unknown table {tbl}"),
            })?;
            let op = HistoryOp::parse(&op).ok_or_else(|| StorageError::CorruptRow {
                table: "history",
                reason: format!("unknown op {op}"),
            })?;
            out.push(HistoryEntry {
                seq: row.get::<_, i64>(0)? as u64,
                change: RowChange {
                    table,
                    op,
                    key: row.get(3)?,
                    part: row.get(4)?,
                    before: decode("history", row.get(5)?)?,
                    after: decode("history", row.get(6)?)?,
                },
            });
        }
        Ok(out)
    }

    fn purge_history(
        &mut self,
        cursor: Option<&ConsolidationCursor>,
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM history", [])?;
        if let Some(cursor) = cursor {
            write_cursor(&tx, cursor)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn cursor(&self, version: &str) -> Result<Option<ConsolidationCursor>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT latest_block, latest_offset, status FROM consolidation_cursor
                 WHERE version = ?1",
                params![version],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as u64,
                        row.get::<_, i64>(1)? as u32,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((block, offset, status)) = row else {
            return Ok(None);
        };
        let status = CursorStatus::parse(&status).ok_or_else(|| StorageError::CorruptRow {
            table: "consolidation_cursor",
            reason: format!("unknown status {status}"),
        })?;
        Ok(Some(ConsolidationCursor {
            version: version.to_string(),
            latest_block: BlockNumber(block),
            latest_offset: offset,
            status,
        }))
    }

    fn put_block_time(
        &mut self,
        block: BlockNumber,
        time: UnixMillis,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO block_time (block, time) VALUES (?1, ?2)
             ON CONFLICT(block) DO UPDATE SET time = excluded.time",
            params![block.0, time.0],
        )?;
        Ok(())
    }

    fn block_time(&self, block: BlockNumber) -> Result<Option<UnixMillis>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT time FROM block_time WHERE block = ?1",
                params![block.0],
                |row| row.get::<_, i64>(0).map(|v| v as u64),
            )
            .optional()?
            .map(UnixMillis))
    }

    fn latest_block_at_time(
        &self,
        time: UnixMillis,
    ) -> Result<Option<BlockNumber>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT block FROM block_time WHERE time <= ?1 ORDER BY block DESC LIMIT 1",
                params![time.0],
                |row| row.get::<_, i64>(0).map(|v| v as u64),
            )
            .optional()?
            .map(BlockNumber))
    }

    fn try_acquire_lock(
        &mut self,
        lock: &LockRecord,
        now: UnixMillis,
    ) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            "INSERT INTO consolidation_lock (name, holder, token, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                token = excluded.token,
                expires_at = excluded.expires_at
             WHERE consolidation_lock.expires_at < ?5",
            params![lock.name, lock.holder, lock.token, lock.expires_at.0, now.0],
        )?;
        Ok(changed == 1)
    }

    fn renew_lock(
        &mut self,
        name: &str,
        holder: &str,
        token: &str,
        expires_at: UnixMillis,
    ) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            "UPDATE consolidation_lock SET expires_at = ?4
             WHERE name = ?1 AND holder = ?2 AND token = ?3",
            params![name, holder, token, expires_at.0],
        )?;
        Ok(changed == 1)
    }

    fn release_lock(
        &mut self,
        name: &str,
        holder: &str,
        token: &str,
    ) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            "DELETE FROM consolidation_lock WHERE name = ?1 AND holder = ?2 AND token = ?3",
            params![name, holder, token],
        )?;
        Ok(changed == 1)
    }

    fn lock_record(&self, name: &str) -> Result<Option<LockRecord>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT name, holder, token, expires_at FROM consolidation_lock WHERE name = ?1",
                params![name],
                |row| {
                    Ok(LockRecord {
                        name: row.get(0)?,
                        holder: row.get(1)?,
                        token: row.get(2)?,
                        expires_at: UnixMillis(row.get::<_, i64>(3)? as u64),
                    })
                },
            )
            .optional()?)
    }
}
