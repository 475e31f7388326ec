#![forbid(unsafe_code)]

//! Turns raw RMRKDAO remarks into validated domain changes.
//!
//! Each parser reads the store but never writes it; `Interaction::apply` is the only
//! write path, so a rejected remark leaves no trace beyond a log line and a counter.

pub mod payment;
pub mod propose;
pub mod register;
pub mod submit;
pub mod vote;

use quorum_contracts::envelope::{EnvelopeError, InteractionKind};
use quorum_contracts::remark::Remark;
use quorum_contracts::{AddressCodec, BlockNumber, ContractViolation, ReasonCodeId};
use quorum_storage::{ConsolidationRepo, DaoReader, StorageError};

pub use propose::ProposeInteraction;
pub use register::RegisterInteraction;
pub use submit::SubmitInteraction;
pub use vote::VoteInteraction;

pub mod reason_codes {
    use quorum_contracts::ReasonCodeId;

    // RMRKDAO interaction reason-code namespace.
    pub const DAO_OK_APPLIED: ReasonCodeId = ReasonCodeId(0x4441_0001);

    pub const DAO_ENVELOPE_INVALID: ReasonCodeId = ReasonCodeId(0x4441_0010);
    pub const DAO_PAYLOAD_INVALID: ReasonCodeId = ReasonCodeId(0x4441_0011);
    pub const DAO_PROPOSAL_NOT_UNIQUE: ReasonCodeId = ReasonCodeId(0x4441_0012);
    pub const DAO_CUSTODIAN_UNKNOWN: ReasonCodeId = ReasonCodeId(0x4441_0013);
    pub const DAO_OPTION_LIMIT: ReasonCodeId = ReasonCodeId(0x4441_0014);
    pub const DAO_PAYMENT_MISSING: ReasonCodeId = ReasonCodeId(0x4441_0015);
    pub const DAO_COLLECTION_NOT_OWNED: ReasonCodeId = ReasonCodeId(0x4441_0016);
    pub const DAO_BLOCK_TIME_MISSING: ReasonCodeId = ReasonCodeId(0x4441_0017);
    pub const DAO_DATES_INVALID: ReasonCodeId = ReasonCodeId(0x4441_0018);
    pub const DAO_PROPOSAL_UNKNOWN: ReasonCodeId = ReasonCodeId(0x4441_0019);
    pub const DAO_OPTION_INVALID: ReasonCodeId = ReasonCodeId(0x4441_001A);
    pub const DAO_VOTE_CLOSED: ReasonCodeId = ReasonCodeId(0x4441_001B);
    pub const DAO_RESULT_INVALID: ReasonCodeId = ReasonCodeId(0x4441_001C);

    pub const DAO_INTERACTION_UNIMPLEMENTED: ReasonCodeId = ReasonCodeId(0x4441_00F1);
}

/// Why a remark was not applied. Always recoverable: the block carries on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("{0}")]
    Envelope(#[from] EnvelopeError),
    #[error("{0}")]
    Payload(#[from] ContractViolation),
    #[error("Invalid address {0}")]
    InvalidAddress(String),
    #[error("Non-unique PROPOSAL id {0}")]
    DuplicateProposal(String),
    #[error("Custodian ({0}) does not exist")]
    UnknownCustodian(String),
    #[error("CUSTODIAN only allows a max of {max} but the PROPOSAL has {got}")]
    TooManyOptions { max: u32, got: usize },
    #[error("Missing valid balance transfer")]
    MissingPayment,
    #[error("Collection {0} does not exist yet")]
    CollectionNotYetCreated(String),
    #[error("PROPOSAL caller was not the issuer of collection {0} at time of PROPOSE interaction")]
    NotCollectionIssuer(String),
    #[error("Unable to find block time for block {0}")]
    MissingBlockTime(BlockNumber),
    #[error("Start time cannot be after end time")]
    StartAfterEnd,
    #[error("Start time cannot be before remark's block time")]
    StartBeforeBlockTime,
    #[error("Missing proposal id")]
    MissingProposalId,
    #[error("Missing option")]
    MissingOption,
    #[error("Option {0} is not a non-negative integer")]
    MalformedOption(String),
    #[error("Proposal ({0}) does not exist")]
    UnknownProposal(String),
    #[error("Option {option} is not available in PROPOSAL {proposal}")]
    OptionNotAvailable { option: u32, proposal: String },
    #[error("CUSTODIAN {custodian} does not exist for PROPOSAL {proposal}")]
    ProposalCustodianMissing { custodian: String, proposal: String },
    #[error("Cannot vote on or after PROPOSAL's endDate")]
    VoteAfterEnd,
    #[error("PROPOSAL {proposal} does not list CUSTODIAN {caller}")]
    NotProposalCustodian { proposal: String, caller: String },
    #[error("{option} not found in PROPOSAL {proposal} options")]
    CountOptionUnknown { option: u32, proposal: String },
    #[error("{0} not found in RESULT count object")]
    WinnerNotCounted(u32),
    #[error("{0} is not implemented")]
    Unimplemented(InteractionKind),
}

impl Rejection {
    pub fn reason_code(&self) -> ReasonCodeId {
        match self {
            Self::Envelope(_) => reason_codes::DAO_ENVELOPE_INVALID,
            Self::Payload(_) | Self::InvalidAddress(_) | Self::MalformedOption(_) => {
                reason_codes::DAO_PAYLOAD_INVALID
            }
            Self::DuplicateProposal(_) => reason_codes::DAO_PROPOSAL_NOT_UNIQUE,
            Self::UnknownCustodian(_) | Self::ProposalCustodianMissing { .. } => {
                reason_codes::DAO_CUSTODIAN_UNKNOWN
            }
            Self::TooManyOptions { .. } => reason_codes::DAO_OPTION_LIMIT,
            Self::MissingPayment => reason_codes::DAO_PAYMENT_MISSING,
            Self::CollectionNotYetCreated(_) | Self::NotCollectionIssuer(_) => {
                reason_codes::DAO_COLLECTION_NOT_OWNED
            }
            Self::MissingBlockTime(_) => reason_codes::DAO_BLOCK_TIME_MISSING,
            Self::StartAfterEnd | Self::StartBeforeBlockTime => reason_codes::DAO_DATES_INVALID,
            Self::MissingProposalId | Self::UnknownProposal(_) => {
                reason_codes::DAO_PROPOSAL_UNKNOWN
            }
            Self::MissingOption | Self::OptionNotAvailable { .. } => {
                reason_codes::DAO_OPTION_INVALID
            }
            Self::VoteAfterEnd => reason_codes::DAO_VOTE_CLOSED,
            Self::NotProposalCustodian { .. }
            | Self::CountOptionUnknown { .. }
            | Self::WinnerNotCounted(_) => reason_codes::DAO_RESULT_INVALID,
            Self::Unimplemented(_) => reason_codes::DAO_INTERACTION_UNIMPLEMENTED,
        }
    }
}

/// Parser failure. `Rejected` is a malformed interaction; `Storage` is infrastructure
/// and must not be swallowed.
#[derive(Debug, thiserror::Error)]
pub enum InteractionError {
    #[error("rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<EnvelopeError> for InteractionError {
    fn from(value: EnvelopeError) -> Self {
        Self::Rejected(Rejection::Envelope(value))
    }
}

impl From<ContractViolation> for InteractionError {
    fn from(value: ContractViolation) -> Self {
        Self::Rejected(Rejection::Payload(value))
    }
}

/// A validated interaction ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Register(RegisterInteraction),
    Propose(ProposeInteraction),
    Vote(VoteInteraction),
    Submit(SubmitInteraction),
}

impl Interaction {
    /// Parses `remark` as `kind`. Deregister and unknown kinds never parse.
    pub fn parse(
        kind: &InteractionKind,
        remark: &Remark,
        reader: &dyn DaoReader,
        codec: &dyn AddressCodec,
    ) -> Result<Self, InteractionError> {
        match kind {
            InteractionKind::Register => {
                Ok(Self::Register(RegisterInteraction::from_remark(remark)?))
            }
            InteractionKind::Propose => Ok(Self::Propose(ProposeInteraction::from_remark(
                remark, reader, codec,
            )?)),
            InteractionKind::Vote => Ok(Self::Vote(VoteInteraction::from_remark(
                remark, reader, codec,
            )?)),
            InteractionKind::Submit => {
                Ok(Self::Submit(SubmitInteraction::from_remark(remark, reader)?))
            }
            InteractionKind::Deregister | InteractionKind::Unknown(_) => {
                Err(Rejection::Unimplemented(kind.clone()).into())
            }
        }
    }

    /// Entity key the interaction writes, for logging.
    pub fn subject(&self) -> &str {
        match self {
            Self::Register(i) => &i.custodian.id,
            Self::Propose(i) => &i.proposal.id,
            Self::Vote(i) => &i.vote.id,
            Self::Submit(i) => &i.result.id,
        }
    }

    pub fn apply(self, repo: &mut dyn ConsolidationRepo) -> Result<(), StorageError> {
        match self {
            Self::Register(i) => i.save(repo),
            Self::Propose(i) => i.save(repo),
            Self::Vote(i) => i.save(repo),
            Self::Submit(i) => i.save(repo),
        }
    }
}
