#![forbid(unsafe_code)]

use quorum_contracts::dao::Custodian;
use quorum_contracts::envelope::{InteractionKind, RemarkEnvelope};
use quorum_contracts::payload::RegisterPayload;
use quorum_contracts::remark::Remark;
use quorum_storage::{ConsolidationRepo, StorageError};

use super::InteractionError;

/// REGISTER creates or wholesale replaces the caller's custodian record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterInteraction {
    pub custodian: Custodian,
}

impl RegisterInteraction {
    pub fn from_remark(remark: &Remark) -> Result<Self, InteractionError> {
        let envelope = RemarkEnvelope::expect(&remark.remark, &InteractionKind::Register)?;
        let payload = RegisterPayload::from_json(envelope.json_payload()?)?;
        Ok(Self {
            custodian: Custodian {
                id: remark.caller.clone(),
                block: remark.block,
                proposal_fee: payload.proposal_fee,
                vote_fee: payload.vote_fee,
                recertify_fee: payload.recertify_fee,
                max_options: payload.max_options,
                changes: Vec::new(),
            },
        })
    }

    pub fn save(self, repo: &mut dyn ConsolidationRepo) -> Result<(), StorageError> {
        let previous = repo.custodian(&self.custodian.id)?;
        repo.save_custodian(&self.custodian.superseding(previous))
    }
}
