#![forbid(unsafe_code)]

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;

pub const PROTOCOL_PREFIX: &str = "RMRKDAO";
pub const PROTOCOL_VERSION: &str = "2.0.0";
pub const DELIMITER: &str = "::";

/// Prefixes requested from the chain client. Only `PROTOCOL_PREFIX` remarks are dispatched.
pub const LISTENING_PREFIXES: [&str; 4] = ["rmrk", "RMRK", "rmrkdao", "RMRKDAO"];

/// Characters `encodeURIComponent` leaves untouched.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    Register,
    Propose,
    Vote,
    Submit,
    Deregister,
    Unknown(String),
}

impl InteractionKind {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "REGISTER" => Self::Register,
            "PROPOSE" => Self::Propose,
            "VOTE" => Self::Vote,
            "SUBMIT" => Self::Submit,
            "DEREGISTER" => Self::Deregister,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Register => "REGISTER",
            Self::Propose => "PROPOSE",
            Self::Vote => "VOTE",
            Self::Submit => "SUBMIT",
            Self::Deregister => "DEREGISTER",
            Self::Unknown(raw) => raw.as_str(),
        }
    }
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Invalid remark - expected PREFIX::TYPE::VERSION")]
    Truncated,
    #[error("Invalid remark - does not start with {}", PROTOCOL_PREFIX)]
    InvalidPrefix,
    #[error("The op code needs to be {expected}, but it is {got}")]
    WrongInteraction { expected: String, got: String },
    #[error("This remark was issued under version {got} instead of {}", PROTOCOL_VERSION)]
    UnsupportedVersion { got: String },
    #[error("Invalid remark - missing payload")]
    MissingPayload,
    #[error("Invalid remark - payload is not valid UTF-8")]
    InvalidEncoding,
    #[error("Invalid remark - payload JSON: {0}")]
    InvalidJson(String),
}

/// A memo split at `::` into its fixed header and positional payload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemarkEnvelope<'a> {
    pub prefix: &'a str,
    /// Case-insensitive routing tag.
    pub kind: InteractionKind,
    /// The type segment exactly as written.
    pub raw_kind: &'a str,
    pub version: &'a str,
    pub payload: Vec<&'a str>,
}

impl<'a> RemarkEnvelope<'a> {
    /// Splits without checking prefix or version. Used for routing.
    pub fn split(raw: &'a str) -> Result<Self, EnvelopeError> {
        let mut parts = raw.split(DELIMITER);
        let (Some(prefix), Some(kind), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(EnvelopeError::Truncated);
        };
        Ok(Self {
            prefix,
            kind: InteractionKind::parse(kind),
            raw_kind: kind,
            version,
            payload: parts.collect(),
        })
    }

    /// Splits and enforces prefix, exact interaction type and exact version.
    pub fn expect(raw: &'a str, expected: &InteractionKind) -> Result<Self, EnvelopeError> {
        let envelope = Self::split(raw).map_err(|_| EnvelopeError::InvalidPrefix)?;
        if !envelope.prefix.eq_ignore_ascii_case(PROTOCOL_PREFIX) {
            return Err(EnvelopeError::InvalidPrefix);
        }
        if envelope.raw_kind != expected.as_str() {
            return Err(EnvelopeError::WrongInteraction {
                expected: expected.as_str().to_string(),
                got: envelope.raw_kind.to_string(),
            });
        }
        if envelope.version != PROTOCOL_VERSION {
            return Err(EnvelopeError::UnsupportedVersion {
                got: envelope.version.to_string(),
            });
        }
        Ok(envelope)
    }

    pub fn has_protocol_prefix(&self) -> bool {
        self.prefix.eq_ignore_ascii_case(PROTOCOL_PREFIX)
    }

    /// True when the version's leading numeric value is exactly 2 (`2`, `2.0`, `2.0.0`).
    pub fn is_supported_major(&self) -> bool {
        leading_float(self.version) == Some(2.0)
    }

    pub fn field(&self, index: usize) -> Option<&'a str> {
        self.payload.get(index).copied().filter(|v| !v.is_empty())
    }

    pub fn json_payload<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        let encoded = self.field(0).ok_or(EnvelopeError::MissingPayload)?;
        let decoded = decode_component(encoded)?;
        serde_json::from_str(&decoded).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))
    }
}

pub fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, URI_COMPONENT).to_string()
}

pub fn decode_component(raw: &str) -> Result<String, EnvelopeError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|v| v.into_owned())
        .map_err(|_| EnvelopeError::InvalidEncoding)
}

pub fn render_remark(kind: &InteractionKind, payload: &str) -> String {
    format!(
        "{PROTOCOL_PREFIX}{DELIMITER}{}{DELIMITER}{PROTOCOL_VERSION}{DELIMITER}{payload}",
        kind.as_str()
    )
}

fn leading_float(raw: &str) -> Option<f64> {
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in raw.char_indices() {
        if c.is_ascii_digit() {
            end = i + 1;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
        } else {
            break;
        }
    }
    raw[..end].parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_env_01_expect_accepts_case_insensitive_prefix() {
        let raw = "rmrkdao::VOTE::2.0.0::ABCDEFGHIJ::1";
        let env = RemarkEnvelope::expect(raw, &InteractionKind::Vote).unwrap();
        assert_eq!(env.payload, vec!["ABCDEFGHIJ", "1"]);
    }

    #[test]
    fn at_env_02_expect_rejects_foreign_prefix() {
        let err = RemarkEnvelope::expect("RMRK::VOTE::2.0.0::x", &InteractionKind::Vote)
            .unwrap_err();
        assert_eq!(err, EnvelopeError::InvalidPrefix);
    }

    #[test]
    fn at_env_03_expect_rejects_other_interaction() {
        let err = RemarkEnvelope::expect("RMRKDAO::PROPOSE::2.0.0::x", &InteractionKind::Vote)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "The op code needs to be VOTE, but it is PROPOSE"
        );
    }

    #[test]
    fn at_env_04_version_must_match_exactly() {
        let err = RemarkEnvelope::expect("RMRKDAO::VOTE::2.0::x::1", &InteractionKind::Vote)
            .unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::UnsupportedVersion {
                got: "2.0".to_string()
            }
        );
    }

    #[test]
    fn at_env_05_major_gate_reads_leading_number() {
        let ok = RemarkEnvelope::split("RMRKDAO::VOTE::2.0.0").unwrap();
        assert!(ok.is_supported_major());
        let newer = RemarkEnvelope::split("RMRKDAO::VOTE::2.1.0").unwrap();
        assert!(!newer.is_supported_major());
        let old = RemarkEnvelope::split("RMRKDAO::VOTE::1.0.0").unwrap();
        assert!(!old.is_supported_major());
    }

    #[test]
    fn at_env_06_component_encoding_matches_uri_component() {
        let raw = r#"{"a":"b c","d":[1,2]}"#;
        let encoded = encode_component(raw);
        assert_eq!(
            encoded,
            "%7B%22a%22%3A%22b%20c%22%2C%22d%22%3A%5B1%2C2%5D%7D"
        );
        assert_eq!(decode_component(&encoded).unwrap(), raw);
        assert_eq!(encode_component("a-b_c.d!e~f*g'h(i)"), "a-b_c.d!e~f*g'h(i)");
    }

    #[test]
    fn at_env_07_json_payload_decodes_object() {
        let raw = render_remark(
            &InteractionKind::Register,
            &encode_component(r#"{"maxOptions":3}"#),
        );
        let env = RemarkEnvelope::expect(&raw, &InteractionKind::Register).unwrap();
        let value: serde_json::Value = env.json_payload().unwrap();
        assert_eq!(value["maxOptions"], 3);
    }

    #[test]
    fn at_env_08_unknown_kind_is_explicit_and_routing_ignores_case() {
        let env = RemarkEnvelope::split("RMRKDAO::delegate::2.0.0::x").unwrap();
        assert_eq!(env.kind, InteractionKind::Unknown("delegate".to_string()));
        let lower = RemarkEnvelope::split("RMRKDAO::vote::2.0.0").unwrap();
        assert_eq!(lower.kind, InteractionKind::Vote);
        assert_eq!(lower.raw_kind, "vote");
    }

    #[test]
    fn at_env_09_expect_requires_exact_type_casing() {
        let err = RemarkEnvelope::expect("RMRKDAO::register::2.0.0::x", &InteractionKind::Register)
            .unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::WrongInteraction {
                expected: "REGISTER".to_string(),
                got: "register".to_string(),
            }
        );
        assert_eq!(
            err.to_string(),
            "The op code needs to be REGISTER, but it is register"
        );
    }
}
