#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use quorum_contracts::dao::{Collection, CursorStatus, Vote, VoteChange};
use quorum_contracts::envelope::{encode_component, render_remark, InteractionKind};
use quorum_contracts::remark::{ExtraCall, Remark};
use quorum_contracts::{BlockNumber, UnixMillis};
use quorum_engines::Ss58Codec;
use quorum_os::import::{import_dump, NftDump};
use quorum_os::{
    shared_store, ChainBlock, ChainClient, ChainError, ConsolidationConfig, ConsolidationLoop,
    DaoMetrics, DispatchHandler, HeadOutcome, InteractionOutcome, SharedStore, TxOutcome,
};
use quorum_storage::{
    ConsolidationRepo, DaoReader, DaoRepo, MemoryStore, NftStateRepo, SqliteStore,
};

const CUSTODIAN: &str = "HeyRMRK7L7APFpBrBqeY62dNhFKVGP4JgwQpcog2VTb3RMU";
const CUSTODIAN_DOT: &str = "165euNLWLkMi591G385bnHVn5ixjNu81voq9bFX56nGcV2B7";
const CUSTODIAN_HEX: &str = "0xe0b9bdcc45111c7c23b354318607f4cbda8e7f017d500aa15402b1a16a36497a";
const PROPOSER: &str = "HjtDiyd4A7wG8Dz54Nkrze1B5AGbXGJbfhr6qiMQv4tVRvh";
const VOTER: &str = "CaKpMFfFVXQrRRNDtMxiiPeiYBCYikNzrBmpuZUvmdQKrUR";
const PROPOSAL_ID: &str = "ABCDE12345";

/// Serves scripted remarks; every block is timestamped `number * 6000`.
struct ScriptedChain {
    head: BlockNumber,
    remarks: BTreeMap<u64, Vec<Remark>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedChain {
    fn new(head: u64, remarks: Vec<Remark>) -> Self {
        let mut by_block: BTreeMap<u64, Vec<Remark>> = BTreeMap::new();
        for remark in remarks {
            by_block.entry(remark.block.0).or_default().push(remark);
        }
        Self {
            head: BlockNumber(head),
            remarks: by_block,
            gate: None,
        }
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn finalized_head(&self) -> Result<BlockNumber, ChainError> {
        Ok(self.head)
    }

    async fn fetch_block(&self, block: BlockNumber) -> Result<ChainBlock, ChainError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if block > self.head {
            return Err(ChainError::BlockNotFound(block));
        }
        let mut remarks = self.remarks.get(&block.0).cloned().unwrap_or_default();
        // Chain order is not guaranteed to match offsets.
        remarks.reverse();
        Ok(ChainBlock {
            number: block,
            timestamp: Some(UnixMillis(block.0 * 6_000)),
            remarks,
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

fn remark(block: u64, offset: u32, caller: &str, raw: String, calls: Vec<ExtraCall>) -> Remark {
    Remark {
        block: BlockNumber(block),
        offset,
        caller: caller.to_string(),
        remark: raw,
        extra_calls: calls,
    }
}

fn json_remark(kind: InteractionKind, payload: serde_json::Value) -> String {
    render_remark(&kind, &encode_component(&payload.to_string()))
}

fn register(block: u64) -> Remark {
    remark(
        block,
        0,
        CUSTODIAN,
        json_remark(
            InteractionKind::Register,
            json!({"proposalFee": "100", "voteFee": "1", "recertifyFee": "0", "maxOptions": 3}),
        ),
        Vec::new(),
    )
}

fn propose(block: u64) -> Remark {
    remark(
        block,
        0,
        PROPOSER,
        json_remark(
            InteractionKind::Propose,
            json!({
                "id": PROPOSAL_ID,
                "custodian": CUSTODIAN_DOT,
                "name": "Treasury",
                "description": "",
                "collections": ["col-1"],
                "options": {"0": "yes", "1": "no"},
                "endDate": 2_000_000,
                "nftWeight": true,
                "electorate": false
            }),
        ),
        vec![ExtraCall::transfer(CUSTODIAN_HEX, 100, PROPOSER)],
    )
}

fn vote(block: u64, offset: u32, option: &str) -> Remark {
    remark(
        block,
        offset,
        VOTER,
        render_remark(&InteractionKind::Vote, &format!("{PROPOSAL_ID}::{option}")),
        vec![ExtraCall::transfer(CUSTODIAN, 1, VOTER)],
    )
}

fn scripted_remarks() -> Vec<Remark> {
    vec![
        register(100),
        propose(101),
        remark(101, 1, PROPOSER, "RMRK::MINT::2.0.0::x".to_string(), Vec::new()),
        vote(102, 0, "0"),
        vote(102, 1, "7"),
        vote(103, 0, "1"),
    ]
}

fn seed_collections<S: ConsolidationRepo + NftStateRepo>(store: &mut S) {
    let dump = NftDump {
        nfts: Vec::new(),
        collections: vec![Collection {
            id: "col-1".to_string(),
            block: BlockNumber(90),
            issuer: PROPOSER.to_string(),
            changes: Vec::new(),
        }],
        last_block: BlockNumber(99),
    };
    import_dump(store, &dump, "2.0.0").unwrap();
}

fn consolidation_loop<S: DaoRepo + 'static>(
    store: SharedStore<S>,
    chain: ScriptedChain,
) -> ConsolidationLoop<S> {
    ConsolidationLoop::new(
        store,
        Arc::new(chain),
        DispatchHandler::new(Arc::new(Ss58Codec::kusama()), DaoMetrics::new().unwrap()),
        ConsolidationConfig::mvp_v1(),
    )
}

#[tokio::test]
async fn at_consolidation_db_01_register_propose_vote_end_to_end_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let mut sqlite = SqliteStore::open_sqlite(&dir.path().join("dao.sqlite")).unwrap();
    seed_collections(&mut sqlite);
    let store = shared_store(sqlite);
    let metrics = DaoMetrics::new().unwrap();
    let lp = ConsolidationLoop::new(
        store.clone(),
        Arc::new(ScriptedChain::new(103, scripted_remarks())),
        DispatchHandler::new(Arc::new(Ss58Codec::kusama()), metrics.clone()),
        ConsolidationConfig::mvp_v1(),
    );
    assert_eq!(lp.recover().unwrap(), 0);

    let outcome = lp.on_new_head(BlockNumber(103)).await.unwrap();
    assert_eq!(
        outcome,
        HeadOutcome::Consolidated {
            from: BlockNumber(100),
            to: BlockNumber(103),
            applied: 4,
            rejected: 1
        }
    );

    let guard = store.lock().unwrap();
    let custodian = guard.custodian(CUSTODIAN).unwrap().unwrap();
    assert_eq!(custodian.max_options, 3);
    let proposal = guard.proposal(PROPOSAL_ID).unwrap().unwrap();
    assert_eq!(proposal.custodian, CUSTODIAN);
    assert_eq!(proposal.start_date, UnixMillis(101 * 6_000));
    assert_eq!(proposal.snapshot, UnixMillis(2_000_000));
    let stored = guard.vote(&Vote::key(PROPOSAL_ID, VOTER)).unwrap().unwrap();
    assert_eq!(stored.option, 1);
    assert_eq!(stored.block, BlockNumber(103));
    assert_eq!(
        stored.changes,
        vec![VoteChange {
            block: BlockNumber(102),
            option: 0
        }]
    );
    let cursor = guard.consolidation_cursor().unwrap().unwrap();
    assert_eq!(cursor.latest_block, BlockNumber(104));
    assert_eq!(cursor.status, CursorStatus::Processing);
    assert!(guard.history_entries().unwrap().is_empty());
    assert_eq!(
        guard.block_time(BlockNumber(102)).unwrap(),
        Some(UnixMillis(612_000))
    );
    drop(guard);

    assert_eq!(
        metrics.outcome_count(&InteractionKind::Vote, InteractionOutcome::Succeeded),
        2
    );
    assert_eq!(
        metrics.outcome_count(&InteractionKind::Vote, InteractionOutcome::Failed),
        1
    );
    assert_eq!(
        metrics.outcome_count(&InteractionKind::Propose, InteractionOutcome::Succeeded),
        1
    );
    assert_eq!(metrics.latest_consolidated(), 103);
    assert_eq!(metrics.target(), 103);
}

#[tokio::test]
async fn at_consolidation_db_02_second_head_during_range_is_skipped() {
    let mut memory = MemoryStore::new_in_memory();
    seed_collections(&mut memory);
    let store = shared_store(memory);
    let gate = Arc::new(Notify::new());
    let lp = consolidation_loop(
        store.clone(),
        ScriptedChain::new(100, vec![register(100)]).gated(gate.clone()),
    );

    let (first, second, ()) = tokio::join!(
        lp.on_new_head(BlockNumber(100)),
        lp.on_new_head(BlockNumber(100)),
        async { gate.notify_one() },
    );
    assert!(matches!(
        first.unwrap(),
        HeadOutcome::Consolidated { applied: 1, .. }
    ));
    assert_eq!(second.unwrap(), HeadOutcome::SkippedInFlight);
    assert!(store.lock().unwrap().custodian(CUSTODIAN).unwrap().is_some());
}

#[tokio::test]
async fn at_consolidation_db_03_interrupted_block_is_rolled_back_before_resuming() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dao.sqlite");
    let mut sqlite = SqliteStore::open_sqlite(&path).unwrap();
    seed_collections(&mut sqlite);
    let store = shared_store(sqlite);
    let lp = consolidation_loop(store.clone(), ScriptedChain::new(101, scripted_remarks()));
    lp.recover().unwrap();
    lp.on_new_head(BlockNumber(101)).await.unwrap();

    // A crash after writing part of block 102 leaves its history behind.
    {
        let mut guard = store.lock().unwrap();
        guard
            .save_vote(&Vote {
                id: Vote::key(PROPOSAL_ID, VOTER),
                proposal_id: PROPOSAL_ID.to_string(),
                caller: VOTER.to_string(),
                option: 0,
                block: BlockNumber(102),
                changes: Vec::new(),
            })
            .unwrap();
        assert!(!guard.history_entries().unwrap().is_empty());
    }
    drop(lp);
    drop(store);

    let reopened = shared_store(SqliteStore::open_sqlite(&path).unwrap());
    let lp = consolidation_loop(reopened.clone(), ScriptedChain::new(103, scripted_remarks()));
    assert!(lp.recover().unwrap() >= 1);
    assert!(reopened
        .lock()
        .unwrap()
        .vote(&Vote::key(PROPOSAL_ID, VOTER))
        .unwrap()
        .is_none());

    lp.on_new_head(BlockNumber(103)).await.unwrap();
    let stored = reopened
        .lock()
        .unwrap()
        .vote(&Vote::key(PROPOSAL_ID, VOTER))
        .unwrap()
        .unwrap();
    assert_eq!(stored.option, 1);
    assert_eq!(stored.changes.len(), 1);
}

#[tokio::test]
async fn at_consolidation_db_04_up_to_date_head_reads_no_blocks() {
    let mut memory = MemoryStore::new_in_memory();
    seed_collections(&mut memory);
    let store = shared_store(memory);
    let lp = consolidation_loop(store.clone(), ScriptedChain::new(100, vec![register(100)]));
    lp.on_new_head(BlockNumber(100)).await.unwrap();
    assert_eq!(
        lp.on_new_head(BlockNumber(99)).await.unwrap(),
        HeadOutcome::UpToDate
    );
    let custodian = store.lock().unwrap().custodian(CUSTODIAN).unwrap().unwrap();
    assert!(custodian.changes.is_empty());
}
