#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use quorum_contracts::dao::{
    ConsolidationCursor, CursorStatus, Custodian, HistoryOp, Proposal, ProposalOptions, Vote,
};
use quorum_contracts::{Balance, BlockNumber, UnixMillis};
use quorum_storage::{
    ConsolidationRepo, DaoReader, DaoStore, ElectionRepo, StorageError, StoreBackend, Table,
};

fn custodian(id: &str, block: u64, max_options: u32) -> Custodian {
    Custodian {
        id: id.to_string(),
        block: BlockNumber(block),
        proposal_fee: Balance(10),
        vote_fee: Balance(1),
        recertify_fee: Balance(5),
        max_options,
        changes: Vec::new(),
    }
}

fn proposal(id: &str, custodian: &str) -> Proposal {
    Proposal {
        id: id.to_string(),
        custodian: custodian.to_string(),
        name: "Treasury spend".to_string(),
        description: String::new(),
        collections: vec!["col-1".to_string()],
        options: ProposalOptions(BTreeMap::from([
            (0, "yes".to_string()),
            (1, "no".to_string()),
        ])),
        passing_threshold: None,
        start_date: UnixMillis(1_000),
        snapshot: UnixMillis(5_000),
        end_date: UnixMillis(5_000),
        nft_weight: false,
        electorate: false,
        owner: "Owner".to_string(),
        block: BlockNumber(2),
    }
}

fn processing_at(block: u64) -> ConsolidationCursor {
    ConsolidationCursor::processing_from("2.0.0", BlockNumber(block))
}

fn backends() -> Vec<(&'static str, Box<dyn FnOnce() -> Box<dyn Scenario>>)> {
    vec![
        (
            "memory",
            Box::new(|| Box::new(DaoStore::new_in_memory()) as Box<dyn Scenario>),
        ),
        (
            "sqlite",
            Box::new(|| Box::new(DaoStore::open_sqlite_in_memory().unwrap()) as Box<dyn Scenario>),
        ),
    ]
}

/// Object-safe view over `DaoStore<B>` so each test runs against both backends.
trait Scenario {
    fn repo(&mut self) -> &mut dyn ConsolidationRepo;
    fn delete_custodian(&mut self, id: &str) -> Result<bool, StorageError>;
}

impl<B: StoreBackend> Scenario for DaoStore<B> {
    fn repo(&mut self) -> &mut dyn ConsolidationRepo {
        self
    }

    fn delete_custodian(&mut self, id: &str) -> Result<bool, StorageError> {
        self.delete_row(Table::Custodian, id)
    }
}

#[test]
fn at_db_cons_01_capture_only_while_processing() {
    for (name, make) in backends() {
        let mut s = make();
        s.repo().save_custodian(&custodian("A", 1, 2)).unwrap();
        assert!(s.repo().history_entries().unwrap().is_empty(), "{name}");

        s.repo().commit_cursor(&processing_at(2)).unwrap();
        s.repo().save_custodian(&custodian("B", 2, 2)).unwrap();
        let history = s.repo().history_entries().unwrap();
        assert_eq!(history.len(), 1, "{name}");
        assert_eq!(history[0].change.op, HistoryOp::Insert);
        assert_eq!(history[0].change.table, Table::Custodian);
    }
}

#[test]
fn at_db_cons_02_replay_restores_pre_block_state() {
    for (name, make) in backends() {
        let mut s = make();
        s.repo().save_custodian(&custodian("A", 1, 2)).unwrap();
        s.repo().save_custodian(&custodian("B", 1, 3)).unwrap();
        s.repo().commit_cursor(&processing_at(5)).unwrap();

        // Interrupted block: one update, one insert, one delete.
        let replaced = custodian("A", 5, 9).superseding(s.repo().custodian("A").unwrap());
        s.repo().save_custodian(&replaced).unwrap();
        s.repo().save_custodian(&custodian("C", 5, 4)).unwrap();
        assert!(s.delete_custodian("B").unwrap());

        let ops: Vec<HistoryOp> = s
            .repo()
            .history_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.change.op)
            .collect();
        assert_eq!(
            ops,
            vec![HistoryOp::Update, HistoryOp::Insert, HistoryOp::Delete],
            "{name}"
        );

        assert_eq!(s.repo().replay_and_purge_history().unwrap(), 3);
        assert_eq!(s.repo().custodian("A").unwrap(), Some(custodian("A", 1, 2)));
        assert_eq!(s.repo().custodian("B").unwrap(), Some(custodian("B", 1, 3)));
        assert_eq!(s.repo().custodian("C").unwrap(), None);
        assert!(s.repo().history_entries().unwrap().is_empty(), "{name}");
    }
}

#[test]
fn at_db_cons_03_replay_is_safe_to_repeat() {
    for (name, make) in backends() {
        let mut s = make();
        s.repo().commit_cursor(&processing_at(1)).unwrap();
        s.repo().save_custodian(&custodian("A", 1, 2)).unwrap();
        assert_eq!(s.repo().replay_and_purge_history().unwrap(), 1);
        assert_eq!(s.repo().replay_and_purge_history().unwrap(), 0, "{name}");
        assert_eq!(s.repo().custodian("A").unwrap(), None);
    }
}

#[test]
fn at_db_cons_04_commit_block_purges_history_and_moves_cursor() {
    for (name, make) in backends() {
        let mut s = make();
        s.repo().commit_cursor(&processing_at(7)).unwrap();
        s.repo().save_custodian(&custodian("A", 7, 2)).unwrap();
        s.repo().commit_cursor(&processing_at(8)).unwrap();

        assert!(s.repo().history_entries().unwrap().is_empty(), "{name}");
        let cursor = s.repo().consolidation_cursor().unwrap().unwrap();
        assert_eq!(cursor.latest_block, BlockNumber(8));
        assert_eq!(cursor.latest_offset, 0);
        assert_eq!(cursor.status, CursorStatus::Processing);
        assert_eq!(s.repo().replay_and_purge_history().unwrap(), 0);
        assert!(s.repo().custodian("A").unwrap().is_some());
    }
}

#[test]
fn at_db_cons_05_proposal_id_is_unique() {
    for (name, make) in backends() {
        let mut s = make();
        s.repo().save_custodian(&custodian("C", 1, 2)).unwrap();
        s.repo().insert_proposal(&proposal("ABCDE12345", "C")).unwrap();
        let err = s
            .repo()
            .insert_proposal(&proposal("ABCDE12345", "C"))
            .unwrap_err();
        assert!(
            matches!(err, StorageError::DuplicateKey { table: "proposals", .. }),
            "{name}: {err}"
        );
    }
}

#[test]
fn at_db_cons_06_votes_require_their_proposal() {
    for (name, make) in backends() {
        let mut s = make();
        let vote = Vote {
            id: Vote::key("ABCDE12345", "Voter"),
            proposal_id: "ABCDE12345".to_string(),
            caller: "Voter".to_string(),
            option: 0,
            block: BlockNumber(3),
            changes: Vec::new(),
        };
        let err = s.repo().save_vote(&vote).unwrap_err();
        assert!(
            matches!(err, StorageError::ForeignKeyViolation { table: "votes", .. }),
            "{name}: {err}"
        );

        s.repo().save_custodian(&custodian("C", 1, 2)).unwrap();
        s.repo().insert_proposal(&proposal("ABCDE12345", "C")).unwrap();
        s.repo().save_vote(&vote).unwrap();
        let votes = s.repo().votes_for_proposal("ABCDE12345").unwrap();
        assert_eq!(votes, vec![vote]);
    }
}

#[test]
fn at_db_cons_07_latest_block_at_time_picks_highest_block_not_after() {
    let mut memory = DaoStore::new_in_memory();
    let mut sqlite = DaoStore::open_sqlite_in_memory().unwrap();
    for (block, time) in [(10, 1_000), (11, 7_000), (12, 13_000)] {
        memory
            .put_block_time(BlockNumber(block), UnixMillis(time))
            .unwrap();
        sqlite
            .put_block_time(BlockNumber(block), UnixMillis(time))
            .unwrap();
    }
    for (time, expected) in [
        (999, None),
        (1_000, Some(BlockNumber(10))),
        (12_999, Some(BlockNumber(11))),
        (50_000, Some(BlockNumber(12))),
    ] {
        assert_eq!(
            memory.latest_block_at_time(UnixMillis(time)).unwrap(),
            expected
        );
        assert_eq!(
            sqlite.latest_block_at_time(UnixMillis(time)).unwrap(),
            expected
        );
    }
    assert_eq!(
        sqlite.block_time(BlockNumber(11)).unwrap(),
        Some(UnixMillis(7_000))
    );
}

#[test]
fn at_db_cons_08_sqlite_file_survives_reopen_mid_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dao.sqlite");
    {
        let mut s = DaoStore::open_sqlite(&path).unwrap();
        s.save_custodian(&custodian("A", 1, 2)).unwrap();
        s.commit_cursor(&processing_at(4)).unwrap();
        s.save_custodian(&custodian("B", 4, 2)).unwrap();
    }
    let mut reopened = DaoStore::open_sqlite(&path).unwrap();
    assert_eq!(reopened.history_entries().unwrap().len(), 1);
    assert_eq!(reopened.replay_and_purge_history().unwrap(), 1);
    assert!(reopened.custodian("A").unwrap().is_some());
    assert!(reopened.custodian("B").unwrap().is_none());
    assert_eq!(
        reopened.consolidation_cursor().unwrap().unwrap().latest_block,
        BlockNumber(4)
    );
}
