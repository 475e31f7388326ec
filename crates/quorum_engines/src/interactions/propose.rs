#![forbid(unsafe_code)]

use quorum_contracts::dao::Proposal;
use quorum_contracts::envelope::{InteractionKind, RemarkEnvelope};
use quorum_contracts::payload::ProposePayload;
use quorum_contracts::remark::Remark;
use quorum_contracts::AddressCodec;
use quorum_storage::{ConsolidationRepo, DaoReader, StorageError};

use super::payment::has_fee_transfer;
use super::{InteractionError, Rejection};
use crate::point_in_time::collection_issuer_at;

/// PROPOSE opens a proposal under a registered custodian.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposeInteraction {
    pub proposal: Proposal,
}

impl ProposeInteraction {
    /// Checks run in a fixed order so each failure is reproducible on its own:
    /// uniqueness, custodian, option limit, payment, collection ownership,
    /// block time, start/end order, start against block time.
    pub fn from_remark(
        remark: &Remark,
        reader: &dyn DaoReader,
        codec: &dyn AddressCodec,
    ) -> Result<Self, InteractionError> {
        let envelope = RemarkEnvelope::expect(&remark.remark, &InteractionKind::Propose)?;
        let payload = ProposePayload::from_json(envelope.json_payload()?)?;
        let custodian_id = codec
            .normalize(&payload.custodian)
            .ok_or_else(|| Rejection::InvalidAddress(payload.custodian.clone()))?;

        if reader.proposal(&payload.id)?.is_some() {
            return Err(Rejection::DuplicateProposal(payload.id).into());
        }

        let Some(custodian) = reader.custodian(&custodian_id)? else {
            return Err(Rejection::UnknownCustodian(custodian_id).into());
        };

        if payload.options.len() > custodian.max_options as usize {
            return Err(Rejection::TooManyOptions {
                max: custodian.max_options,
                got: payload.options.len(),
            }
            .into());
        }

        if !has_fee_transfer(
            &remark.extra_calls,
            &custodian.id,
            custodian.proposal_fee,
            codec,
        ) {
            return Err(Rejection::MissingPayment.into());
        }

        for collection_id in &payload.collections {
            let collection = reader.collection(collection_id)?;
            let issuer = collection
                .as_ref()
                .and_then(|c| collection_issuer_at(c, remark.block));
            match issuer {
                None => {
                    return Err(Rejection::CollectionNotYetCreated(collection_id.clone()).into())
                }
                Some(issuer) if issuer != remark.caller => {
                    return Err(Rejection::NotCollectionIssuer(collection_id.clone()).into())
                }
                Some(_) => {}
            }
        }

        let Some(block_time) = reader.block_time(remark.block)? else {
            return Err(Rejection::MissingBlockTime(remark.block).into());
        };

        // Zero timestamps count as unset.
        let start_date = payload
            .start_date
            .filter(|d| d.0 != 0)
            .unwrap_or(block_time);
        let snapshot = payload
            .snapshot
            .filter(|d| d.0 != 0)
            .unwrap_or(payload.end_date);

        if start_date > payload.end_date {
            return Err(Rejection::StartAfterEnd.into());
        }
        if start_date < block_time {
            return Err(Rejection::StartBeforeBlockTime.into());
        }

        Ok(Self {
            proposal: Proposal {
                id: payload.id,
                custodian: custodian.id,
                name: payload.name,
                description: payload.description,
                collections: payload.collections,
                options: payload.options,
                passing_threshold: payload.passing_threshold,
                start_date,
                snapshot,
                end_date: payload.end_date,
                nft_weight: payload.nft_weight,
                electorate: payload.electorate,
                owner: remark.caller.clone(),
                block: remark.block,
            },
        })
    }

    pub fn save(self, repo: &mut dyn ConsolidationRepo) -> Result<(), StorageError> {
        repo.insert_proposal(&self.proposal)
    }
}
