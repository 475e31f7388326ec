#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use tracing::debug;

use quorum_contracts::dao::Proposal;
use quorum_contracts::payload::SubmitPayload;
use quorum_contracts::BlockNumber;
use quorum_storage::{DaoReader, StorageError};

use crate::inspector::{VoteInspector, VoteSummary};

#[derive(Debug, thiserror::Error)]
pub enum TallyError {
    #[error("Proposal {0} is missing collections")]
    MissingCollections(String),
    #[error("maxTurnout must be set if electorate is true (proposal {0})")]
    MissingMaxTurnout(String),
    #[error("denominator should only be 0 if there are no votes (proposal {0})")]
    ZeroDenominator(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Builds a result from weighted vote summaries.
///
/// `max_turnout` is the denominator for electorate proposals and ignored otherwise.
/// Winners are every option tied at the top weight, filtered by the passing threshold.
pub fn build_result(
    proposal: &Proposal,
    summaries: &[VoteSummary],
    max_turnout: Option<u64>,
    recertify: bool,
) -> Result<SubmitPayload, TallyError> {
    let mut count: BTreeMap<u32, u64> = BTreeMap::new();
    for summary in summaries.iter().filter(|s| s.weight > 0) {
        *count.entry(summary.option).or_default() += summary.weight;
    }

    let threshold_denominator = if proposal.electorate {
        max_turnout.ok_or_else(|| TallyError::MissingMaxTurnout(proposal.id.clone()))?
    } else {
        count.values().sum()
    };

    if !count.is_empty() && threshold_denominator == 0 {
        return Err(TallyError::ZeroDenominator(proposal.id.clone()));
    }

    let max = count.values().copied().max().unwrap_or(0);
    let mut winning_options: Vec<u32> = count
        .iter()
        .filter(|(_, weight)| **weight == max)
        .map(|(option, _)| *option)
        .collect();

    if let Some(threshold) = proposal.passing_threshold {
        winning_options.retain(|option| {
            let weight = count.get(option).copied().unwrap_or(0);
            weight as f64 / threshold_denominator as f64 * 100.0 >= threshold
        });
    }

    Ok(SubmitPayload {
        proposal_id: proposal.id.clone(),
        count,
        winning_options,
        threshold_denominator,
        recertify,
    })
}

/// Inspects every referenced collection at `snapshot_block` and tallies the stored votes.
pub fn tally_proposal(
    reader: &dyn DaoReader,
    proposal: &Proposal,
    snapshot_block: BlockNumber,
    recertify: bool,
) -> Result<SubmitPayload, TallyError> {
    if proposal.collections.is_empty() {
        return Err(TallyError::MissingCollections(proposal.id.clone()));
    }
    let votes = reader.votes_for_proposal(&proposal.id)?;
    let mut inspector = VoteInspector::new(&votes, snapshot_block);
    for collection_id in &proposal.collections {
        let nfts = reader.nfts_in_collection(collection_id)?;
        inspector.process_collection(&nfts);
    }

    let max_turnout = proposal.electorate.then(|| {
        if proposal.nft_weight {
            inspector.total_unburned_nfts()
        } else {
            inspector.total_owners_of_unburned_nfts()
        }
    });
    let summaries = inspector.vote_summaries(proposal.nft_weight);
    debug!(
        proposal = %proposal.id,
        snapshot_block = snapshot_block.0,
        votes = votes.len(),
        counted = summaries.len(),
        "tallied proposal"
    );
    build_result(proposal, &summaries, max_turnout, recertify)
}
