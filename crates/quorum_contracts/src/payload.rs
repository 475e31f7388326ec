#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::balance::Balance;
use crate::common::{ContractViolation, UnixMillis, Validate};
use crate::dao::{ElectionResult, ProposalOptions, MAX_TEXT_LEN, PROPOSAL_ID_LEN};
use crate::envelope::{encode_component, render_remark, InteractionKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterWire {
    proposal_fee: Value,
    vote_fee: Value,
    recertify_fee: Value,
    max_options: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterPayload {
    pub proposal_fee: Balance,
    pub vote_fee: Balance,
    pub recertify_fee: Balance,
    pub max_options: u32,
}

impl RegisterPayload {
    pub fn from_json(value: Value) -> Result<Self, ContractViolation> {
        let wire: RegisterWire =
            serde_json::from_value(value).map_err(|_| ContractViolation::InvalidValue {
                field: "register",
                reason: "payload must carry proposalFee, voteFee, recertifyFee, maxOptions",
            })?;
        let max_options = wire
            .max_options
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(ContractViolation::InvalidValue {
                field: "maxOptions",
                reason: "Value must be a non-negative integer",
            })?;
        Ok(Self {
            proposal_fee: Balance::from_json("proposalFee", &wire.proposal_fee)?,
            vote_fee: Balance::from_json("voteFee", &wire.vote_fee)?,
            recertify_fee: Balance::from_json("recertifyFee", &wire.recertify_fee)?,
            max_options,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProposeWire {
    id: String,
    custodian: String,
    name: String,
    #[serde(default)]
    description: String,
    collections: Vec<String>,
    options: Value,
    #[serde(default)]
    passing_threshold: Option<f64>,
    #[serde(default)]
    start_date: Option<u64>,
    #[serde(default)]
    snapshot: Option<u64>,
    end_date: u64,
    nft_weight: bool,
    electorate: bool,
}

/// Structurally valid Propose payload. The custodian address is still in its
/// submitted form; normalization happens in the interaction parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposePayload {
    pub id: String,
    pub custodian: String,
    pub name: String,
    pub description: String,
    pub collections: Vec<String>,
    pub options: ProposalOptions,
    pub passing_threshold: Option<f64>,
    pub start_date: Option<UnixMillis>,
    pub snapshot: Option<UnixMillis>,
    pub end_date: UnixMillis,
    pub nft_weight: bool,
    pub electorate: bool,
}

impl ProposePayload {
    pub fn from_json(value: Value) -> Result<Self, ContractViolation> {
        let wire: ProposeWire =
            serde_json::from_value(value).map_err(|_| ContractViolation::InvalidValue {
                field: "propose",
                reason: "payload does not match the PROPOSE schema",
            })?;
        let payload = Self {
            options: ProposalOptions::from_json(&wire.options)?,
            id: wire.id,
            custodian: wire.custodian,
            name: wire.name,
            description: wire.description,
            collections: wire.collections,
            passing_threshold: wire.passing_threshold,
            start_date: wire.start_date.map(UnixMillis),
            snapshot: wire.snapshot.map(UnixMillis),
            end_date: UnixMillis(wire.end_date),
            nft_weight: wire.nft_weight,
            electorate: wire.electorate,
        };
        payload.validate()?;
        Ok(payload)
    }
}

impl Validate for ProposePayload {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.id.len() != PROPOSAL_ID_LEN || !self.id.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(ContractViolation::InvalidValue {
                field: "id",
                reason: "must be 10 alphanumeric characters",
            });
        }
        if self.name.trim().is_empty() || self.name.chars().count() > MAX_TEXT_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "name",
                reason: "must be non-empty and at most 10000 characters",
            });
        }
        if self.description.chars().count() > MAX_TEXT_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "description",
                reason: "must be at most 10000 characters",
            });
        }
        if self.custodian.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "custodian",
                reason: "must not be empty",
            });
        }
        if let Some(threshold) = self.passing_threshold {
            if !threshold.is_finite() {
                return Err(ContractViolation::NotFinite {
                    field: "passingThreshold",
                });
            }
            if !(0.0..=100.0).contains(&threshold) {
                return Err(ContractViolation::InvalidRange {
                    field: "passingThreshold",
                    min: 0.0,
                    max: 100.0,
                    got: threshold,
                });
            }
        }
        self.options.validate()
    }
}

/// Wire form of a Submit payload; also what the election monitor emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayload {
    pub proposal_id: String,
    pub count: BTreeMap<u32, u64>,
    pub winning_options: Vec<u32>,
    pub threshold_denominator: u64,
    pub recertify: bool,
}

impl SubmitPayload {
    pub fn from_json(value: Value) -> Result<Self, ContractViolation> {
        let payload: Self =
            serde_json::from_value(value).map_err(|_| ContractViolation::InvalidValue {
                field: "submit",
                reason: "payload does not match the SUBMIT schema",
            })?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn to_remark(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(render_remark(&InteractionKind::Submit, &encode_component(&json)))
    }
}

impl Validate for SubmitPayload {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.proposal_id.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "proposalId",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

impl From<&ElectionResult> for SubmitPayload {
    fn from(result: &ElectionResult) -> Self {
        Self {
            proposal_id: result.proposal_id.clone(),
            count: result.count.clone(),
            winning_options: result.winning_options.clone(),
            threshold_denominator: result.threshold_denominator,
            recertify: result.recertify,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{RemarkEnvelope, PROTOCOL_PREFIX};
    use serde_json::json;

    fn propose_json() -> Value {
        json!({
            "id": "ABCDE12345",
            "custodian": "Custodian",
            "name": "Treasury",
            "description": "",
            "collections": ["col-1"],
            "options": {"0": "yes", "1": "no"},
            "endDate": 2000,
            "nftWeight": true,
            "electorate": false
        })
    }

    #[test]
    fn at_payload_01_register_parses_string_and_number_fees() {
        let p = RegisterPayload::from_json(json!({
            "proposalFee": "1000000000000",
            "voteFee": 5,
            "recertifyFee": "0",
            "maxOptions": 4
        }))
        .unwrap();
        assert_eq!(p.proposal_fee, Balance(1_000_000_000_000));
        assert_eq!(p.vote_fee, Balance(5));
        assert_eq!(p.max_options, 4);
    }

    #[test]
    fn at_payload_02_register_rejects_negative_fee() {
        let err = RegisterPayload::from_json(json!({
            "proposalFee": "-1",
            "voteFee": "1",
            "recertifyFee": "1",
            "maxOptions": 2
        }))
        .unwrap_err();
        assert_eq!(
            err,
            ContractViolation::InvalidValue {
                field: "proposalFee",
                reason: "Value cannot be negative",
            }
        );
    }

    #[test]
    fn at_payload_03_propose_defaults_and_threshold_range() {
        let p = ProposePayload::from_json(propose_json()).unwrap();
        assert_eq!(p.start_date, None);
        assert_eq!(p.snapshot, None);
        let mut raw = propose_json();
        raw["passingThreshold"] = json!(101);
        assert!(matches!(
            ProposePayload::from_json(raw),
            Err(ContractViolation::InvalidRange {
                field: "passingThreshold",
                ..
            })
        ));
    }

    #[test]
    fn at_payload_04_propose_id_must_be_ten_alphanumerics() {
        let mut raw = propose_json();
        raw["id"] = json!("ABCDE-1234");
        assert!(matches!(
            ProposePayload::from_json(raw),
            Err(ContractViolation::InvalidValue { field: "id", .. })
        ));
    }

    #[test]
    fn at_payload_05_submit_renders_parseable_remark() {
        let payload = SubmitPayload {
            proposal_id: "ABCDE12345".to_string(),
            count: BTreeMap::from([(0, 3), (1, 1)]),
            winning_options: vec![0],
            threshold_denominator: 4,
            recertify: false,
        };
        let remark = payload.to_remark().unwrap();
        assert!(remark.starts_with(&format!("{PROTOCOL_PREFIX}::SUBMIT::2.0.0::")));
        let env = RemarkEnvelope::expect(&remark, &InteractionKind::Submit).unwrap();
        let decoded = SubmitPayload::from_json(env.json_payload().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn at_payload_06_submit_rejects_negative_count_key() {
        let err = SubmitPayload::from_json(json!({
            "proposalId": "ABCDE12345",
            "count": {"-1": 1},
            "winningOptions": [],
            "thresholdDenominator": 1,
            "recertify": false
        }));
        assert!(err.is_err());
    }
}
