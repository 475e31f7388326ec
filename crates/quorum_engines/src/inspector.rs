#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use quorum_contracts::dao::{Nft, Vote};
use quorum_contracts::BlockNumber;

use crate::point_in_time::{nft_burned_at, nft_root_owner_at};

/// One counted vote: the chosen option and the weight it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteSummary {
    pub vote_id: String,
    pub option: u32,
    pub weight: u64,
}

#[derive(Debug, Clone)]
struct QualifiedVote {
    option: u32,
    nfts: BTreeSet<String>,
}

/// Matches votes to the NFTs their callers held at the snapshot block.
///
/// Collections are fed one at a time; totals accumulate across all of them.
#[derive(Debug, Clone)]
pub struct VoteInspector<'a> {
    votes_by_caller: BTreeMap<&'a str, Vec<&'a Vote>>,
    snapshot_block: BlockNumber,
    qualified: BTreeMap<&'a str, QualifiedVote>,
    total_unburned_nfts: u64,
    owners_of_unburned: BTreeSet<String>,
}

impl<'a> VoteInspector<'a> {
    pub fn new(votes: &'a [Vote], snapshot_block: BlockNumber) -> Self {
        let mut votes_by_caller: BTreeMap<&str, Vec<&Vote>> = BTreeMap::new();
        for vote in votes {
            votes_by_caller.entry(&vote.caller).or_default().push(vote);
        }
        Self {
            votes_by_caller,
            snapshot_block,
            qualified: BTreeMap::new(),
            total_unburned_nfts: 0,
            owners_of_unburned: BTreeSet::new(),
        }
    }

    pub fn snapshot_block(&self) -> BlockNumber {
        self.snapshot_block
    }

    pub fn process_collection(&mut self, nfts: &[Nft]) {
        for nft in nfts {
            match nft_burned_at(nft, self.snapshot_block) {
                // Minted after the snapshot.
                None => continue,
                Some(true) => continue,
                Some(false) => {}
            }
            self.total_unburned_nfts += 1;

            let Some(root_owner) = nft_root_owner_at(nft, self.snapshot_block) else {
                warn!(
                    nft = %nft.id,
                    block = self.snapshot_block.0,
                    "unable to determine root owner of NFT at snapshot block"
                );
                continue;
            };

            if let Some(votes) = self.votes_by_caller.get(root_owner) {
                for &vote in votes {
                    self.qualified
                        .entry(vote.id.as_str())
                        .or_insert_with(|| QualifiedVote {
                            option: vote.option,
                            nfts: BTreeSet::new(),
                        })
                        .nfts
                        .insert(nft.id.clone());
                }
            }
            self.owners_of_unburned.insert(root_owner.to_string());
        }
    }

    pub fn total_unburned_nfts(&self) -> u64 {
        self.total_unburned_nfts
    }

    pub fn total_owners_of_unburned_nfts(&self) -> u64 {
        self.owners_of_unburned.len() as u64
    }

    /// Weight is the qualifying NFT count when `nft_weight`, else one per voter.
    /// Votes with no qualifying NFT are absent.
    pub fn vote_summaries(&self, nft_weight: bool) -> Vec<VoteSummary> {
        self.qualified
            .iter()
            .filter(|(_, q)| !q.nfts.is_empty())
            .map(|(vote_id, q)| VoteSummary {
                vote_id: vote_id.to_string(),
                option: q.option,
                weight: if nft_weight { q.nfts.len() as u64 } else { 1 },
            })
            .collect()
    }
}
