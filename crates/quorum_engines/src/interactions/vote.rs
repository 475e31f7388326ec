#![forbid(unsafe_code)]

use quorum_contracts::dao::{parse_option_key, Vote};
use quorum_contracts::envelope::{decode_component, InteractionKind, RemarkEnvelope};
use quorum_contracts::remark::Remark;
use quorum_contracts::AddressCodec;
use quorum_storage::{ConsolidationRepo, DaoReader, StorageError};

use super::payment::has_fee_transfer;
use super::{InteractionError, Rejection};

/// VOTE fills the caller's single slot on a proposal. Payload is positional:
/// `<proposalId>::<percent-encoded option key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteInteraction {
    pub vote: Vote,
}

impl VoteInteraction {
    pub fn from_remark(
        remark: &Remark,
        reader: &dyn DaoReader,
        codec: &dyn AddressCodec,
    ) -> Result<Self, InteractionError> {
        let envelope = RemarkEnvelope::expect(&remark.remark, &InteractionKind::Vote)?;
        let Some(proposal_id) = envelope.field(0) else {
            return Err(Rejection::MissingProposalId.into());
        };
        let Some(encoded_option) = envelope.field(1) else {
            return Err(Rejection::MissingOption.into());
        };
        let decoded = decode_component(encoded_option)?;
        let option = parse_option_key(&decoded).ok_or(Rejection::MalformedOption(decoded))?;

        let Some(proposal) = reader.proposal(proposal_id)? else {
            return Err(Rejection::UnknownProposal(proposal_id.to_string()).into());
        };
        if !proposal.options.contains(option) {
            return Err(Rejection::OptionNotAvailable {
                option,
                proposal: proposal.id,
            }
            .into());
        }

        let Some(custodian) = reader.custodian(&proposal.custodian)? else {
            return Err(Rejection::ProposalCustodianMissing {
                custodian: proposal.custodian,
                proposal: proposal.id,
            }
            .into());
        };

        if !has_fee_transfer(&remark.extra_calls, &custodian.id, custodian.vote_fee, codec) {
            return Err(Rejection::MissingPayment.into());
        }

        let Some(block_time) = reader.block_time(remark.block)? else {
            return Err(Rejection::MissingBlockTime(remark.block).into());
        };
        if block_time >= proposal.end_date {
            return Err(Rejection::VoteAfterEnd.into());
        }

        Ok(Self {
            vote: Vote {
                id: Vote::key(&proposal.id, &remark.caller),
                proposal_id: proposal.id,
                caller: remark.caller.clone(),
                option,
                block: remark.block,
                changes: Vec::new(),
            },
        })
    }

    /// Upserts the slot; a superseded choice moves to the vote's history.
    pub fn save(self, repo: &mut dyn ConsolidationRepo) -> Result<(), StorageError> {
        let previous = repo.vote(&self.vote.id)?;
        repo.save_vote(&self.vote.superseding(previous))
    }
}
