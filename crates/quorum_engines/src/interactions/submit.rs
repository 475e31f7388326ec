#![forbid(unsafe_code)]

use quorum_contracts::dao::ElectionResult;
use quorum_contracts::envelope::{InteractionKind, RemarkEnvelope};
use quorum_contracts::payload::SubmitPayload;
use quorum_contracts::remark::Remark;
use quorum_storage::{ConsolidationRepo, DaoReader, StorageError};

use super::{InteractionError, Rejection};

/// SUBMIT mirrors a custodian's attested result into consolidated state. It never
/// recomputes the tally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitInteraction {
    pub result: ElectionResult,
}

impl SubmitInteraction {
    pub fn from_remark(remark: &Remark, reader: &dyn DaoReader) -> Result<Self, InteractionError> {
        let envelope = RemarkEnvelope::expect(&remark.remark, &InteractionKind::Submit)?;
        let payload = SubmitPayload::from_json(envelope.json_payload()?)?;

        let Some(proposal) = reader.proposal(&payload.proposal_id)? else {
            return Err(Rejection::UnknownProposal(payload.proposal_id).into());
        };
        if proposal.custodian != remark.caller {
            return Err(Rejection::NotProposalCustodian {
                proposal: proposal.id,
                caller: remark.caller.clone(),
            }
            .into());
        }
        if reader.custodian(&remark.caller)?.is_none() {
            return Err(Rejection::UnknownCustodian(remark.caller.clone()).into());
        }
        if let Some(option) = payload
            .count
            .keys()
            .copied()
            .find(|key| !proposal.options.contains(*key))
        {
            return Err(Rejection::CountOptionUnknown {
                option,
                proposal: proposal.id,
            }
            .into());
        }
        if let Some(option) = payload
            .winning_options
            .iter()
            .copied()
            .find(|key| !payload.count.contains_key(key))
        {
            return Err(Rejection::WinnerNotCounted(option).into());
        }

        Ok(Self {
            result: ElectionResult {
                id: ElectionResult::key(&proposal.id, &remark.caller, remark.block),
                proposal_id: proposal.id,
                custodian: remark.caller.clone(),
                count: payload.count,
                winning_options: payload.winning_options,
                threshold_denominator: payload.threshold_denominator,
                recertify: payload.recertify,
                block: remark.block,
            },
        })
    }

    pub fn save(self, repo: &mut dyn ConsolidationRepo) -> Result<(), StorageError> {
        repo.save_result(&self.result)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::interactions::fixtures::{
        proposal, remark, seeded_store, BLOCK, CUSTODIAN, PROPOSAL_ID,
    };
    use quorum_storage::MemoryStore;

    fn store_with_proposal() -> MemoryStore {
        let mut store = seeded_store();
        store.insert_proposal(&proposal()).unwrap();
        store
    }

    fn submit_remark(caller: &str, count: &[(u32, u64)], winners: &[u32]) -> Remark {
        let payload = SubmitPayload {
            proposal_id: PROPOSAL_ID.to_string(),
            count: count.iter().copied().collect::<BTreeMap<_, _>>(),
            winning_options: winners.to_vec(),
            threshold_denominator: count.iter().map(|(_, w)| w).sum(),
            recertify: false,
        };
        remark(caller, payload.to_remark().unwrap(), Vec::new())
    }

    fn rejection(store: &MemoryStore, r: &Remark) -> Rejection {
        match SubmitInteraction::from_remark(r, store) {
            Err(InteractionError::Rejected(r)) => r,
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn at_submit_01_valid_result_is_mirrored() {
        let mut store = store_with_proposal();
        let parsed =
            SubmitInteraction::from_remark(&submit_remark(CUSTODIAN, &[(0, 3), (1, 1)], &[0]), &store)
                .unwrap();
        assert_eq!(
            parsed.result.id,
            ElectionResult::key(PROPOSAL_ID, CUSTODIAN, BLOCK)
        );
        assert_eq!(parsed.result.threshold_denominator, 4);
        parsed.save(&mut store).unwrap();
    }

    #[test]
    fn at_submit_02_only_the_listed_custodian_may_submit() {
        let store = store_with_proposal();
        let r = rejection(&store, &submit_remark("Mallory", &[(0, 1)], &[0]));
        assert_eq!(
            r.to_string(),
            "PROPOSAL ABCDE12345 does not list CUSTODIAN Mallory"
        );
    }

    #[test]
    fn at_submit_03_count_keys_must_be_proposal_options() {
        let store = store_with_proposal();
        assert_eq!(
            rejection(&store, &submit_remark(CUSTODIAN, &[(0, 1), (9, 1)], &[0])),
            Rejection::CountOptionUnknown {
                option: 9,
                proposal: PROPOSAL_ID.to_string()
            }
        );
    }

    #[test]
    fn at_submit_04_winners_must_be_counted() {
        let store = store_with_proposal();
        assert_eq!(
            rejection(&store, &submit_remark(CUSTODIAN, &[(0, 1)], &[1])),
            Rejection::WinnerNotCounted(1)
        );
    }

    #[test]
    fn at_submit_05_unknown_proposal() {
        let store = seeded_store();
        assert_eq!(
            rejection(&store, &submit_remark(CUSTODIAN, &[], &[])),
            Rejection::UnknownProposal(PROPOSAL_ID.to_string())
        );
    }
}
