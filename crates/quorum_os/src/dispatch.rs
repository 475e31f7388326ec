#![forbid(unsafe_code)]

use std::sync::Arc;

use tracing::{debug, info, warn};

use quorum_contracts::envelope::{InteractionKind, RemarkEnvelope};
use quorum_contracts::remark::Remark;
use quorum_contracts::{AddressCodec, ReasonCodeId};
use quorum_engines::{Interaction, InteractionError};
use quorum_storage::{ConsolidationRepo, StorageError};

use crate::metrics::{DaoMetrics, InteractionOutcome};

/// What happened to one remark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied {
        kind: InteractionKind,
        subject: String,
    },
    Rejected {
        kind: InteractionKind,
        reason_code: ReasonCodeId,
        reason: String,
    },
    /// Not an RMRKDAO remark, or one this version does not handle. Not counted.
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Unparseable,
    ForeignPrefix,
    UnsupportedVersion,
    UnknownInteraction,
}

/// Routes a remark to its interaction parser and applies accepted ones.
///
/// Rejections are logged and counted but never fail the block. Storage errors
/// always propagate.
#[derive(Clone)]
pub struct DispatchHandler {
    codec: Arc<dyn AddressCodec>,
    metrics: DaoMetrics,
}

impl DispatchHandler {
    pub fn new(codec: Arc<dyn AddressCodec>, metrics: DaoMetrics) -> Self {
        Self { codec, metrics }
    }

    pub fn metrics(&self) -> &DaoMetrics {
        &self.metrics
    }

    pub fn dispatch<R: ConsolidationRepo>(
        &self,
        remark: &Remark,
        repo: &mut R,
    ) -> Result<DispatchOutcome, StorageError> {
        let Ok(envelope) = RemarkEnvelope::split(&remark.remark) else {
            debug!(block = remark.block.0, offset = remark.offset, "skipping unparseable remark");
            return Ok(DispatchOutcome::Skipped(SkipReason::Unparseable));
        };
        if !envelope.has_protocol_prefix() {
            return Ok(DispatchOutcome::Skipped(SkipReason::ForeignPrefix));
        }
        if !envelope.is_supported_major() {
            info!(
                block = remark.block.0,
                offset = remark.offset,
                version = envelope.version,
                "Only processes version 2.0.0"
            );
            return Ok(DispatchOutcome::Skipped(SkipReason::UnsupportedVersion));
        }
        let kind = envelope.kind;
        if let InteractionKind::Unknown(raw) = &kind {
            debug!(block = remark.block.0, offset = remark.offset, interaction = %raw, "unknown interaction");
            return Ok(DispatchOutcome::Skipped(SkipReason::UnknownInteraction));
        }

        let interaction = match Interaction::parse(&kind, remark, &*repo, self.codec.as_ref()) {
            Ok(interaction) => interaction,
            Err(InteractionError::Rejected(rejection)) => {
                warn!(
                    interaction = %kind,
                    block = remark.block.0,
                    offset = remark.offset,
                    caller = %remark.caller,
                    reason_code = rejection.reason_code().0,
                    reason = %rejection,
                    "Invalid interaction"
                );
                self.metrics
                    .record_outcome(&kind, InteractionOutcome::Failed);
                return Ok(DispatchOutcome::Rejected {
                    kind,
                    reason_code: rejection.reason_code(),
                    reason: rejection.to_string(),
                });
            }
            Err(InteractionError::Storage(err)) => return Err(err),
        };

        let subject = interaction.subject().to_string();
        interaction.apply(repo)?;
        info!(
            interaction = %kind,
            block = remark.block.0,
            offset = remark.offset,
            subject = %subject,
            "Processed interaction"
        );
        self.metrics
            .record_outcome(&kind, InteractionOutcome::Succeeded);
        Ok(DispatchOutcome::Applied { kind, subject })
    }
}
