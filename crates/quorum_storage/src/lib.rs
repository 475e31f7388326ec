#![forbid(unsafe_code)]

pub mod backend;
pub mod memory;
pub mod repo;
pub mod sqlite;
pub mod store;

pub use backend::{HistoryEntry, RowChange, StoreBackend, Table};
pub use memory::MemoryBackend;
pub use repo::{ConsolidationRepo, DaoReader, DaoRepo, ElectionRepo, LockRepo, NftStateRepo};
pub use sqlite::SqliteBackend;
pub use store::{DaoStore, StorageError};

pub type MemoryStore = DaoStore<MemoryBackend>;
pub type SqliteStore = DaoStore<SqliteBackend>;
