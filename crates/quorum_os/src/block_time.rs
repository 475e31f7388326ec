#![forbid(unsafe_code)]

use tracing::{debug, info};

use quorum_contracts::{BlockNumber, UnixMillis};
use quorum_storage::{ConsolidationRepo, StorageError};

use crate::chain::{ChainClient, ChainError};
use crate::{lock_store, SharedStore, StorePoisoned};

#[derive(Debug, thiserror::Error)]
pub enum BlockTimeError {
    #[error("start block {start} is after end block {end}")]
    EmptyRange { start: BlockNumber, end: BlockNumber },
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Poisoned(#[from] StorePoisoned),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTimeSync {
    pub start: BlockNumber,
    pub end: BlockNumber,
    pub synced: u64,
}

/// Resolves one block's timestamp and upserts it.
pub async fn fetch_and_save_block_time<S: ConsolidationRepo>(
    store: &SharedStore<S>,
    chain: &dyn ChainClient,
    block: BlockNumber,
) -> Result<UnixMillis, BlockTimeError> {
    let time = chain.block_time(block).await?;
    lock_store(store)?.put_block_time(block, time)?;
    Ok(time)
}

/// Back-fills block times for `start..=end`. `end` defaults to the finalized head.
pub async fn sync_block_times<S: ConsolidationRepo>(
    store: &SharedStore<S>,
    chain: &dyn ChainClient,
    start: BlockNumber,
    end: Option<BlockNumber>,
) -> Result<BlockTimeSync, BlockTimeError> {
    let end = match end {
        Some(end) => end,
        None => chain.finalized_head().await?,
    };
    if start > end {
        return Err(BlockTimeError::EmptyRange { start, end });
    }
    info!(start = start.0, end = end.0, "syncing block timestamps");
    let mut synced = 0;
    let mut block = start;
    while block <= end {
        let time = fetch_and_save_block_time(store, chain, block).await?;
        debug!(block = block.0, time = time.0, "saved block time");
        synced += 1;
        block = block.next();
    }
    Ok(BlockTimeSync { start, end, synced })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::chain::{ChainBlock, TxOutcome};
    use crate::shared_store;
    use quorum_storage::{DaoReader, ElectionRepo, MemoryStore};

    struct TenBlocks;

    #[async_trait]
    impl ChainClient for TenBlocks {
        async fn finalized_head(&self) -> Result<BlockNumber, ChainError> {
            Ok(BlockNumber(10))
        }

        async fn fetch_block(&self, block: BlockNumber) -> Result<ChainBlock, ChainError> {
            if block.0 > 10 {
                return Err(ChainError::BlockNotFound(block));
            }
            Ok(ChainBlock {
                number: block,
                timestamp: (block.0 != 4).then_some(UnixMillis(1_000 + block.0 * 6_000)),
                remarks: Vec::new(),
            })
        }

        async fn sign_and_send_remark(
            &self,
            _seed: &str,
            _remark: &str,
        ) -> Result<TxOutcome, ChainError> {
            Err(ChainError::Signer("read-only".to_string()))
        }
    }

    #[tokio::test]
    async fn at_block_time_01_range_defaults_to_finalized_head() {
        let store = shared_store(MemoryStore::new_in_memory());
        let chain = Arc::new(TenBlocks);
        let sync = sync_block_times(&store, chain.as_ref(), BlockNumber(7), None)
            .await
            .unwrap();
        assert_eq!(sync.synced, 4);
        let guard = store.lock().unwrap();
        assert_eq!(
            guard.block_time(BlockNumber(10)).unwrap(),
            Some(UnixMillis(61_000))
        );
        assert_eq!(
            guard.latest_block_at_time(UnixMillis(50_000)).unwrap(),
            Some(BlockNumber(8))
        );
    }

    #[tokio::test]
    async fn at_block_time_02_missing_timestamp_stops_the_sync() {
        let store = shared_store(MemoryStore::new_in_memory());
        let err = sync_block_times(&store, &TenBlocks, BlockNumber(3), Some(BlockNumber(5)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BlockTimeError::Chain(ChainError::MissingTimestamp(BlockNumber(4)))
        ));
        assert_eq!(
            store.lock().unwrap().block_time(BlockNumber(3)).unwrap(),
            Some(UnixMillis(19_000))
        );
    }

    #[tokio::test]
    async fn at_block_time_03_inverted_range_is_refused() {
        let store = shared_store(MemoryStore::new_in_memory());
        let err = sync_block_times(&store, &TenBlocks, BlockNumber(9), Some(BlockNumber(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, BlockTimeError::EmptyRange { .. }));
    }
}
