#![forbid(unsafe_code)]

use quorum_contracts::dao::{
    Collection, ConsolidationCursor, Custodian, ElectionResult, LockRecord, Nft, Proposal,
    ResultQueueEntry, ResultSubmission, Vote,
};
use quorum_contracts::{BlockNumber, UnixMillis};

use crate::backend::{HistoryEntry, StoreBackend, Table};
use crate::store::{DaoStore, StorageError, WriteMode};

/// Read-only view the interaction parsers and the vote inspector consult.
pub trait DaoReader {
    fn custodian(&self, id: &str) -> Result<Option<Custodian>, StorageError>;
    fn proposal(&self, id: &str) -> Result<Option<Proposal>, StorageError>;
    fn vote(&self, id: &str) -> Result<Option<Vote>, StorageError>;
    fn votes_for_proposal(&self, proposal_id: &str) -> Result<Vec<Vote>, StorageError>;
    fn collection(&self, id: &str) -> Result<Option<Collection>, StorageError>;
    fn nfts_in_collection(&self, collection_id: &str) -> Result<Vec<Nft>, StorageError>;
    fn block_time(&self, block: BlockNumber) -> Result<Option<UnixMillis>, StorageError>;
    fn consolidation_cursor(&self) -> Result<Option<ConsolidationCursor>, StorageError>;
}

/// Typed repository interface for consolidated DAO state and the cursor.
pub trait ConsolidationRepo: DaoReader {
    fn save_custodian(&mut self, custodian: &Custodian) -> Result<(), StorageError>;
    fn insert_proposal(&mut self, proposal: &Proposal) -> Result<(), StorageError>;
    fn save_vote(&mut self, vote: &Vote) -> Result<(), StorageError>;
    fn save_result(&mut self, result: &ElectionResult) -> Result<(), StorageError>;
    fn put_block_time(&mut self, block: BlockNumber, time: UnixMillis)
        -> Result<(), StorageError>;
    /// Writes the cursor and empties the history log atomically.
    fn commit_cursor(&mut self, cursor: &ConsolidationCursor) -> Result<(), StorageError>;
    fn replay_and_purge_history(&mut self) -> Result<usize, StorageError>;
    fn history_entries(&self) -> Result<Vec<HistoryEntry>, StorageError>;
}

/// Typed repository interface for imported NFT state.
pub trait NftStateRepo {
    fn upsert_collection(&mut self, collection: &Collection) -> Result<(), StorageError>;
    fn upsert_nft(&mut self, nft: &Nft) -> Result<(), StorageError>;
}

/// Typed repository interface for the election monitor.
pub trait ElectionRepo: DaoReader {
    fn proposals_by_custodian(&self, custodian: &str) -> Result<Vec<Proposal>, StorageError>;
    fn queue_entry(&self, proposal_id: &str) -> Result<Option<ResultQueueEntry>, StorageError>;
    fn queue_entries(&self, custodian: &str) -> Result<Vec<ResultQueueEntry>, StorageError>;
    fn put_queue_entry(&mut self, entry: &ResultQueueEntry) -> Result<(), StorageError>;
    fn insert_submission(&mut self, submission: &ResultSubmission) -> Result<(), StorageError>;
    fn submission(&self, proposal_id: &str) -> Result<Option<ResultSubmission>, StorageError>;
    fn latest_block_at_time(&self, time: UnixMillis)
        -> Result<Option<BlockNumber>, StorageError>;
}

/// Typed repository interface for named role locks.
pub trait LockRepo {
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

/// Everything a full process needs from its store.
pub trait DaoRepo: ConsolidationRepo + NftStateRepo + ElectionRepo + LockRepo + Send {}

impl<T> DaoRepo for T where T: ConsolidationRepo + NftStateRepo + ElectionRepo + LockRepo + Send {}

impl<B: StoreBackend> DaoReader for DaoStore<B> {
    fn custodian(&self, id: &str) -> Result<Option<Custodian>, StorageError> {
        self.read(Table::Custodian, id)
    }

    fn proposal(&self, id: &str) -> Result<Option<Proposal>, StorageError> {
        self.read(Table::Proposal, id)
    }

    fn vote(&self, id: &str) -> Result<Option<Vote>, StorageError> {
        self.read(Table::Vote, id)
    }

    fn votes_for_proposal(&self, proposal_id: &str) -> Result<Vec<Vote>, StorageError> {
        self.read_all(Table::Vote, Some(proposal_id))
    }

    fn collection(&self, id: &str) -> Result<Option<Collection>, StorageError> {
        self.read(Table::Collection, id)
    }

    fn nfts_in_collection(&self, collection_id: &str) -> Result<Vec<Nft>, StorageError> {
        self.read_all(Table::Nft, Some(collection_id))
    }

    fn block_time(&self, block: BlockNumber) -> Result<Option<UnixMillis>, StorageError> {
        self.backend().block_time(block)
    }

    fn consolidation_cursor(&self) -> Result<Option<ConsolidationCursor>, StorageError> {
        self.backend().cursor(self.protocol_version())
    }
}

impl<B: StoreBackend> ConsolidationRepo for DaoStore<B> {
    fn save_custodian(&mut self, custodian: &Custodian) -> Result<(), StorageError> {
        self.write(
            Table::Custodian,
            &custodian.id,
            "",
            custodian,
            WriteMode::Upsert,
        )?;
        Ok(())
    }

    fn insert_proposal(&mut self, proposal: &Proposal) -> Result<(), StorageError> {
        if self.custodian(&proposal.custodian)?.is_none() {
            return Err(StorageError::ForeignKeyViolation {
                table: Table::Proposal.as_str(),
                key: proposal.custodian.clone(),
            });
        }
        self.write(
            Table::Proposal,
            &proposal.id,
            &proposal.custodian,
            proposal,
            WriteMode::Insert,
        )?;
        Ok(())
    }

    fn save_vote(&mut self, vote: &Vote) -> Result<(), StorageError> {
        if self.proposal(&vote.proposal_id)?.is_none() {
            return Err(StorageError::ForeignKeyViolation {
                table: Table::Vote.as_str(),
                key: vote.proposal_id.clone(),
            });
        }
        self.write(
            Table::Vote,
            &vote.id,
            &vote.proposal_id,
            vote,
            WriteMode::Upsert,
        )?;
        Ok(())
    }

    fn save_result(&mut self, result: &ElectionResult) -> Result<(), StorageError> {
        if self.proposal(&result.proposal_id)?.is_none() {
            return Err(StorageError::ForeignKeyViolation {
                table: Table::Result.as_str(),
                key: result.proposal_id.clone(),
            });
        }
        self.write(
            Table::Result,
            &result.id,
            &result.proposal_id,
            result,
            WriteMode::Upsert,
        )?;
        Ok(())
    }

    fn put_block_time(
        &mut self,
        block: BlockNumber,
        time: UnixMillis,
    ) -> Result<(), StorageError> {
        self.backend_mut().put_block_time(block, time)
    }

    fn commit_cursor(&mut self, cursor: &ConsolidationCursor) -> Result<(), StorageError> {
        self.commit_block(cursor)
    }

    fn replay_and_purge_history(&mut self) -> Result<usize, StorageError> {
        self.replay_history()
    }

    fn history_entries(&self) -> Result<Vec<HistoryEntry>, StorageError> {
        self.history()
    }
}

impl<B: StoreBackend> NftStateRepo for DaoStore<B> {
    fn upsert_collection(&mut self, collection: &Collection) -> Result<(), StorageError> {
        self.write(
            Table::Collection,
            &collection.id,
            "",
            collection,
            WriteMode::Upsert,
        )?;
        Ok(())
    }

    fn upsert_nft(&mut self, nft: &Nft) -> Result<(), StorageError> {
        self.write(
            Table::Nft,
            &nft.id,
            &nft.collection,
            nft,
            WriteMode::Upsert,
        )?;
        Ok(())
    }
}

impl<B: StoreBackend> ElectionRepo for DaoStore<B> {
    fn proposals_by_custodian(&self, custodian: &str) -> Result<Vec<Proposal>, StorageError> {
        self.read_all(Table::Proposal, Some(custodian))
    }

    fn queue_entry(&self, proposal_id: &str) -> Result<Option<ResultQueueEntry>, StorageError> {
        self.read(Table::ResultQueue, proposal_id)
    }

    fn queue_entries(&self, custodian: &str) -> Result<Vec<ResultQueueEntry>, StorageError> {
        self.read_all(Table::ResultQueue, Some(custodian))
    }

    fn put_queue_entry(&mut self, entry: &ResultQueueEntry) -> Result<(), StorageError> {
        self.write(
            Table::ResultQueue,
            &entry.proposal_id,
            &entry.custodian,
            entry,
            WriteMode::Upsert,
        )?;
        Ok(())
    }

    fn insert_submission(&mut self, submission: &ResultSubmission) -> Result<(), StorageError> {
        self.write(
            Table::Submission,
            &submission.proposal_id,
            &submission.custodian,
            submission,
            WriteMode::Insert,
        )?;
        Ok(())
    }

    fn submission(&self, proposal_id: &str) -> Result<Option<ResultSubmission>, StorageError> {
        self.read(Table::Submission, proposal_id)
    }

    fn latest_block_at_time(
        &self,
        time: UnixMillis,
    ) -> Result<Option<BlockNumber>, StorageError> {
        self.backend().latest_block_at_time(time)
    }
}

impl<B: StoreBackend> LockRepo for DaoStore<B> {
    fn try_acquire_lock(
        &mut self,
        lock: &LockRecord,
        now: UnixMillis,
    ) -> Result<bool, StorageError> {
        self.backend_mut().try_acquire_lock(lock, now)
    }

    fn renew_lock(
        &mut self,
        name: &str,
        holder: &str,
        token: &str,
        expires_at: UnixMillis,
    ) -> Result<bool, StorageError> {
        self.backend_mut().renew_lock(name, holder, token, expires_at)
    }

    fn release_lock(
        &mut self,
        name: &str,
        holder: &str,
        token: &str,
    ) -> Result<bool, StorageError> {
        self.backend_mut().release_lock(name, holder, token)
    }

    fn lock_record(&self, name: &str) -> Result<Option<LockRecord>, StorageError> {
        self.backend().lock_record(name)
    }
}
