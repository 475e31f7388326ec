#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::BlockNumber;

/// Field tag of a change-log record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeField {
    Issuer,
    RootOwner,
    Owner,
    Burned,
    Other(String),
}

impl ChangeField {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Issuer => "issuer",
            Self::RootOwner => "rootowner",
            Self::Owner => "owner",
            Self::Burned => "burned",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for ChangeField {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "issuer" => Self::Issuer,
            "rootowner" => Self::RootOwner,
            "owner" => Self::Owner,
            "burned" => Self::Burned,
            _ => Self::Other(raw),
        }
    }
}

impl From<ChangeField> for String {
    fn from(field: ChangeField) -> Self {
        field.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub block: BlockNumber,
    pub field: ChangeField,
    #[serde(default)]
    pub old: String,
    #[serde(default)]
    pub new: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
}

impl ChangeRecord {
    pub fn v1(block: BlockNumber, field: ChangeField, old: &str, new: &str) -> Self {
        Self {
            block,
            field,
            old: old.to_string(),
            new: new.to_string(),
            caller: None,
        }
    }
}
