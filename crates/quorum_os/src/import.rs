#![forbid(unsafe_code)]

//! Seeds NFT and collection state from a consolidated RMRK dump.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use quorum_contracts::change::{ChangeField, ChangeRecord};
use quorum_contracts::dao::{Collection, ConsolidationCursor, Nft};
use quorum_contracts::BlockNumber;
use quorum_storage::{ConsolidationRepo, NftStateRepo, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("dump is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("dump entry {id} is invalid: {reason}")]
    InvalidEntry { id: String, reason: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Dumps list entities either as an array or as an object keyed by id.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Entries<T> {
    List(Vec<T>),
    Keyed(BTreeMap<String, T>),
}

impl<T> Default for Entries<T> {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl<T> Entries<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::List(items) => items,
            Self::Keyed(map) => map.into_values().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DumpWire {
    #[serde(default)]
    nfts: Entries<NftWire>,
    #[serde(default)]
    collections: Entries<CollectionWire>,
    last_block: u64,
}

#[derive(Debug, Deserialize)]
struct ChangeWire {
    field: String,
    #[serde(default)]
    old: Value,
    #[serde(default)]
    new: Value,
    #[serde(default)]
    caller: Option<String>,
    block: u64,
}

#[derive(Debug, Deserialize)]
struct NftWire {
    id: String,
    collection: String,
    block: u64,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    rootowner: String,
    #[serde(default)]
    burned: String,
    #[serde(default)]
    changes: Vec<ChangeWire>,
}

#[derive(Debug, Deserialize)]
struct CollectionWire {
    id: String,
    block: u64,
    issuer: String,
    #[serde(default)]
    changes: Vec<ChangeWire>,
}

/// Parsed dump ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NftDump {
    pub nfts: Vec<Nft>,
    pub collections: Vec<Collection>,
    pub last_block: BlockNumber,
}

impl NftDump {
    pub fn from_json(raw: &str) -> Result<Self, ImportError> {
        let wire: DumpWire = serde_json::from_str(raw)?;
        let nfts = wire
            .nfts
            .into_vec()
            .into_iter()
            .map(|nft| {
                if nft.id.is_empty() || nft.collection.is_empty() {
                    return Err(ImportError::InvalidEntry {
                        id: nft.id,
                        reason: "nft must name its id and collection".to_string(),
                    });
                }
                Ok(Nft {
                    id: nft.id,
                    collection: nft.collection,
                    block: BlockNumber(nft.block),
                    owner: nft.owner,
                    root_owner: nft.rootowner,
                    burned: nft.burned,
                    changes: nft.changes.into_iter().map(change_record).collect(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let collections = wire
            .collections
            .into_vec()
            .into_iter()
            .map(|collection| Collection {
                id: collection.id,
                block: BlockNumber(collection.block),
                issuer: collection.issuer,
                changes: collection.changes.into_iter().map(change_record).collect(),
            })
            .collect();
        Ok(Self {
            nfts,
            collections,
            last_block: BlockNumber(wire.last_block),
        })
    }
}

fn change_record(wire: ChangeWire) -> ChangeRecord {
    ChangeRecord {
        block: BlockNumber(wire.block),
        field: ChangeField::from(wire.field),
        old: value_text(wire.old),
        new: value_text(wire.new),
        caller: wire.caller,
    }
}

fn value_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub nfts: usize,
    pub collections: usize,
    pub next_block: BlockNumber,
}

/// Upserts the dump, then points the cursor at the block after it and purges history.
pub fn import_dump<S>(store: &mut S, dump: &NftDump, version: &str) -> Result<ImportSummary, ImportError>
where
    S: ConsolidationRepo + NftStateRepo,
{
    for collection in &dump.collections {
        store.upsert_collection(collection)?;
    }
    for nft in &dump.nfts {
        store.upsert_nft(nft)?;
    }
    let next_block = dump.last_block.next();
    store.commit_cursor(&ConsolidationCursor::processing_from(version, next_block))?;
    info!(
        nfts = dump.nfts.len(),
        collections = dump.collections.len(),
        next_block = next_block.0,
        "imported NFT state"
    );
    Ok(ImportSummary {
        nfts: dump.nfts.len(),
        collections: dump.collections.len(),
        next_block,
    })
}
