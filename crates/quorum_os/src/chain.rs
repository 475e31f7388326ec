#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use quorum_contracts::remark::Remark;
use quorum_contracts::{BlockNumber, UnixMillis};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("chain transport: {0}")]
    Transport(String),
    #[error("block {0} is not available")]
    BlockNotFound(BlockNumber),
    #[error("Unable to determine block timestamp for block {0}")]
    MissingTimestamp(BlockNumber),
    #[error("malformed chain response: {0}")]
    Malformed(String),
    #[error("signer: {0}")]
    Signer(String),
}

/// One finalized block reduced to what consolidation needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChainBlock {
    pub number: BlockNumber,
    pub timestamp: Option<UnixMillis>,
    /// Remarks carrying one of the listening prefixes, in extrinsic order.
    pub remarks: Vec<Remark>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub hash: String,
    pub success: bool,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn finalized_head(&self) -> Result<BlockNumber, ChainError>;

    async fn fetch_block(&self, block: BlockNumber) -> Result<ChainBlock, ChainError>;

    async fn block_time(&self, block: BlockNumber) -> Result<UnixMillis, ChainError> {
        self.fetch_block(block)
            .await?
            .timestamp
            .ok_or(ChainError::MissingTimestamp(block))
    }

    /// Signs `remark` with `seed` as a `system.remark` extrinsic and waits for finality.
    async fn sign_and_send_remark(&self, seed: &str, remark: &str)
        -> Result<TxOutcome, ChainError>;
}

/// Polls the finalized head and forwards every advance. The channel closes after
/// the first error is delivered or when the receiver is dropped.
pub fn subscribe_finalized_heads(
    client: Arc<dyn ChainClient>,
    poll_interval: Duration,
) -> mpsc::Receiver<Result<BlockNumber, ChainError>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        let mut last_seen: Option<BlockNumber> = None;
        loop {
            ticker.tick().await;
            match client.finalized_head().await {
                Ok(head) => {
                    if last_seen.is_some_and(|seen| head <= seen) {
                        continue;
                    }
                    last_seen = Some(head);
                    debug!(head = head.0, "new finalized head");
                    if tx.send(Ok(head)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "finalized head poll failed");
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct ScriptedHeads {
        heads: Mutex<Vec<Result<BlockNumber, ChainError>>>,
    }

    #[async_trait]
    impl ChainClient for ScriptedHeads {
        async fn finalized_head(&self) -> Result<BlockNumber, ChainError> {
            let mut heads = self.heads.lock().unwrap();
            if heads.is_empty() {
                return Err(ChainError::Transport("script exhausted".to_string()));
            }
            heads.remove(0)
        }

        async fn fetch_block(&self, block: BlockNumber) -> Result<ChainBlock, ChainError> {
            Ok(ChainBlock {
                number: block,
                timestamp: None,
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
    async fn at_chain_01_poller_forwards_only_advancing_heads() {
        let client = Arc::new(ScriptedHeads {
            heads: Mutex::new(vec![
                Ok(BlockNumber(5)),
                Ok(BlockNumber(5)),
                Ok(BlockNumber(4)),
                Ok(BlockNumber(7)),
            ]),
        });
        let mut rx = subscribe_finalized_heads(client, Duration::from_millis(1));
        assert_eq!(rx.recv().await, Some(Ok(BlockNumber(5))));
        assert_eq!(rx.recv().await, Some(Ok(BlockNumber(7))));
        assert!(matches!(rx.recv().await, Some(Err(ChainError::Transport(_)))));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn at_chain_02_block_time_requires_timestamp() {
        let client = ScriptedHeads {
            heads: Mutex::new(Vec::new()),
        };
        assert_eq!(
            client.block_time(BlockNumber(3)).await,
            Err(ChainError::MissingTimestamp(BlockNumber(3)))
        );
    }
}
