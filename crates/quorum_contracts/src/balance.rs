#![forbid(unsafe_code)]

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::common::ContractViolation;

/// Non-negative chain balance below 2^128, carried on the wire as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Balance(pub u128);

const U64_LIMIT: f64 = 18_446_744_073_709_551_616.0;

impl Balance {
    pub fn parse_decimal(field: &'static str, raw: &str) -> Result<Self, ContractViolation> {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix('-') {
            if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ContractViolation::InvalidValue {
                    field,
                    reason: "Value cannot be negative",
                });
            }
        }
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ContractViolation::InvalidValue {
                field,
                reason: "Value must be a non-negative integer",
            });
        }
        trimmed
            .parse::<u128>()
            .map(Self)
            .map_err(|_| ContractViolation::InvalidValue {
                field,
                reason: "Value is larger than max u128",
            })
    }

    /// Accepts a decimal string or a JSON integer.
    pub fn from_json(field: &'static str, value: &Value) -> Result<Self, ContractViolation> {
        match value {
            Value::String(raw) => Self::parse_decimal(field, raw),
            Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    return Ok(Self(v as u128));
                }
                if n.as_i64().is_some() {
                    return Err(ContractViolation::InvalidValue {
                        field,
                        reason: "Value cannot be negative",
                    });
                }
                // Without arbitrary precision, integers past u64 have already lost digits.
                match n.as_f64() {
                    Some(v) if v.is_finite() && v.fract() == 0.0 && v >= U64_LIMIT => {
                        Err(ContractViolation::InvalidValue {
                            field,
                            reason: "Values above 2^64 must be sent as decimal strings",
                        })
                    }
                    _ => Err(ContractViolation::InvalidValue {
                        field,
                        reason: "Value must be a non-negative integer",
                    }),
                }
            }
            _ => Err(ContractViolation::InvalidValue {
                field,
                reason: "Value must be a non-negative integer",
            }),
        }
    }
}

impl std::fmt::Display for Balance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Balance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Balance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json("balance", &value).map_err(serde::de::Error::custom)
    }
}
