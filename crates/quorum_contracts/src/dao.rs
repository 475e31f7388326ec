#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::balance::Balance;
use crate::change::ChangeRecord;
use crate::common::{BlockNumber, ContractViolation, UnixMillis, Validate};

pub const MAX_TEXT_LEN: usize = 10_000;
pub const PROPOSAL_ID_LEN: usize = 10;

/// Prior state of a custodian, kept when a Register replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodianSnapshot {
    pub block: BlockNumber,
    pub proposal_fee: Balance,
    pub vote_fee: Balance,
    pub recertify_fee: Balance,
    pub max_options: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Custodian {
    pub id: String,
    pub block: BlockNumber,
    pub proposal_fee: Balance,
    pub vote_fee: Balance,
    pub recertify_fee: Balance,
    pub max_options: u32,
    #[serde(default)]
    pub changes: Vec<CustodianSnapshot>,
}

impl Custodian {
    pub fn snapshot(&self) -> CustodianSnapshot {
        CustodianSnapshot {
            block: self.block,
            proposal_fee: self.proposal_fee,
            vote_fee: self.vote_fee,
            recertify_fee: self.recertify_fee,
            max_options: self.max_options,
        }
    }

    /// Carries the previous record's history forward and appends the previous record itself.
    pub fn superseding(mut self, previous: Option<Custodian>) -> Self {
        if let Some(previous) = previous {
            let snapshot = previous.snapshot();
            self.changes = previous.changes;
            self.changes.push(snapshot);
        }
        self
    }
}

/// Option keys are non-negative integers; the map may be sparse.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalOptions(pub BTreeMap<u32, String>);

impl ProposalOptions {
    /// Accepts `{"0": "yes", "1": "no"}` or the dense array form `["yes", "no"]`.
    pub fn from_json(value: &Value) -> Result<Self, ContractViolation> {
        let mut options = BTreeMap::new();
        match value {
            Value::Object(map) => {
                for (key, text) in map {
                    let key = parse_option_key(key).ok_or(ContractViolation::InvalidValue {
                        field: "options",
                        reason: "Keys must be non-negative integer string",
                    })?;
                    options.insert(key, option_text(text)?);
                }
            }
            Value::Array(items) => {
                for (i, text) in items.iter().enumerate() {
                    let key = u32::try_from(i).map_err(|_| ContractViolation::InvalidValue {
                        field: "options",
                        reason: "Too many options",
                    })?;
                    options.insert(key, option_text(text)?);
                }
            }
            _ => {
                return Err(ContractViolation::InvalidValue {
                    field: "options",
                    reason: "Value must be a object dictionary",
                })
            }
        }
        let options = Self(options);
        options.validate()?;
        Ok(options)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, key: u32) -> bool {
        self.0.contains_key(&key)
    }
}

impl Validate for ProposalOptions {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.len() < 2 {
            return Err(ContractViolation::InvalidValue {
                field: "options",
                reason: "Must have at least 2 options",
            });
        }
        if self.0.values().any(|v| v.chars().count() > MAX_TEXT_LEN) {
            return Err(ContractViolation::InvalidValue {
                field: "options",
                reason: "Options cannot have a text length larger than 10000",
            });
        }
        Ok(())
    }
}

/// Parses a non-negative integer option key without sign or whitespace.
pub fn parse_option_key(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

fn option_text(value: &Value) -> Result<String, ContractViolation> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or(ContractViolation::InvalidValue {
            field: "options",
            reason: "Option values must be strings",
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub custodian: String,
    pub name: String,
    pub description: String,
    pub collections: Vec<String>,
    pub options: ProposalOptions,
    pub passing_threshold: Option<f64>,
    pub start_date: UnixMillis,
    pub snapshot: UnixMillis,
    pub end_date: UnixMillis,
    pub nft_weight: bool,
    pub electorate: bool,
    pub owner: String,
    pub block: BlockNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteChange {
    pub block: BlockNumber,
    pub option: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: String,
    pub proposal_id: String,
    pub caller: String,
    pub option: u32,
    pub block: BlockNumber,
    #[serde(default)]
    pub changes: Vec<VoteChange>,
}

impl Vote {
    pub fn key(proposal_id: &str, caller: &str) -> String {
        format!("{proposal_id}-{caller}")
    }

    /// Applies `self` over an existing vote slot, pushing the superseded choice to history.
    pub fn superseding(mut self, previous: Option<Vote>) -> Self {
        if let Some(previous) = previous {
            self.changes = previous.changes;
            self.changes.push(VoteChange {
                block: previous.block,
                option: previous.option,
            });
        }
        self
    }
}

/// Attested tally outcome for one proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResult {
    pub id: String,
    pub proposal_id: String,
    pub custodian: String,
    pub count: BTreeMap<u32, u64>,
    pub winning_options: Vec<u32>,
    pub threshold_denominator: u64,
    pub recertify: bool,
    pub block: BlockNumber,
}

impl ElectionResult {
    pub fn key(proposal_id: &str, custodian: &str, block: BlockNumber) -> String {
        format!("{proposal_id}-{custodian}-{}", block.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub block: BlockNumber,
    pub issuer: String,
    #[serde(default)]
    pub changes: Vec<ChangeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nft {
    pub id: String,
    pub collection: String,
    pub block: BlockNumber,
    pub owner: String,
    pub root_owner: String,
    /// Empty when the NFT was never burned.
    #[serde(default)]
    pub burned: String,
    #[serde(default)]
    pub changes: Vec<ChangeRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorStatus {
    Processing,
    Complete,
}

impl CursorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Complete => "complete",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "processing" => Some(Self::Processing),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Where consolidation resumes: the next block, the offset of the last attempted
/// remark within it, and whether that attempt finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationCursor {
    pub version: String,
    pub latest_block: BlockNumber,
    pub latest_offset: u32,
    pub status: CursorStatus,
}

impl ConsolidationCursor {
    pub fn processing_from(version: &str, block: BlockNumber) -> Self {
        Self {
            version: version.to_string(),
            latest_block: block,
            latest_offset: 0,
            status: CursorStatus::Processing,
        }
    }

    /// True when a remark at `(block, offset)` has already been applied.
    pub fn covers(&self, block: BlockNumber, offset: u32) -> bool {
        let at = (block, offset);
        let cursor = (self.latest_block, self.latest_offset);
        match self.status {
            CursorStatus::Complete => at <= cursor,
            CursorStatus::Processing => at < cursor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOp {
    Insert,
    Update,
    Delete,
}

impl HistoryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub name: String,
    pub holder: String,
    pub token: String,
    pub expires_at: UnixMillis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    AboutToSubmit,
    ResultSubmitted,
    FailedToSubmit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultQueueEntry {
    pub proposal_id: String,
    pub custodian: String,
    pub status: QueueStatus,
    pub updated_at: UnixMillis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSubmission {
    pub proposal_id: String,
    pub custodian: String,
    pub tx_hash: String,
    pub submitted_at: UnixMillis,
}
