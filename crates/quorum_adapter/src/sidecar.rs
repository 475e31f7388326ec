#![forbid(unsafe_code)]

//! Chain client over a Substrate API Sidecar, plus an HTTP signer for broadcasts.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use quorum_contracts::envelope::LISTENING_PREFIXES;
use quorum_contracts::AddressCodec;
use quorum_contracts::remark::{ExtraCall, Remark};
use quorum_contracts::{BlockNumber, UnixMillis};
use quorum_engines::Ss58Codec;
use quorum_os::{ChainBlock, ChainClient, ChainError, TxOutcome};

const REMARK_CALLS: [&str; 2] = ["remark", "remarkWithEvent"];
const BATCH_CALLS: [&str; 3] = ["batch", "batchAll", "forceBatch"];

pub struct SidecarChainClient {
    agent: ureq::Agent,
    base_url: String,
    signer_url: Option<String>,
    codec: Ss58Codec,
}

impl SidecarChainClient {
    /// Signers come back re-encoded in `address_format`.
    pub fn new(
        base_url: &str,
        signer_url: Option<String>,
        timeout: Duration,
        address_format: u16,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer_url,
            codec: Ss58Codec::new(address_format),
        }
    }

    /// `Ok(None)` when the sidecar does not know the resource yet.
    async fn get_json(&self, path: &str) -> Result<Option<Value>, ChainError> {
        let agent = self.agent.clone();
        let url = format!("{}{path}", self.base_url);
        tokio::task::spawn_blocking(move || match agent.get(&url).call() {
            Ok(resp) => resp
                .into_json::<Value>()
                .map(Some)
                .map_err(|e| ChainError::Malformed(format!("{url}: {e}"))),
            Err(ureq::Error::Status(400 | 404, _)) => Ok(None),
            Err(ureq::Error::Status(code, _)) => Err(ChainError::Transport(format!(
                "{url} failed with http status {code}"
            ))),
            Err(ureq::Error::Transport(err)) => Err(ChainError::Transport(err.to_string())),
        })
        .await
        .map_err(|e| ChainError::Transport(format!("sidecar request task failed: {e}")))?
    }
}

#[derive(Debug, Deserialize)]
struct SignerResponse {
    hash: String,
    success: bool,
}

#[async_trait]
impl ChainClient for SidecarChainClient {
    async fn finalized_head(&self) -> Result<BlockNumber, ChainError> {
        let head = self
            .get_json("/blocks/head")
            .await?
            .ok_or_else(|| ChainError::Malformed("sidecar has no finalized head".to_string()))?;
        block_number(head.get("number"))
            .ok_or_else(|| ChainError::Malformed("head is missing its number".to_string()))
    }

    async fn fetch_block(&self, block: BlockNumber) -> Result<ChainBlock, ChainError> {
        let Some(raw) = self.get_json(&format!("/blocks/{}", block.0)).await? else {
            return Err(ChainError::BlockNotFound(block));
        };
        let parsed = chain_block_from_sidecar(&raw, &self.codec)?;
        debug!(
            block = parsed.number.0,
            remarks = parsed.remarks.len(),
            "fetched block from sidecar"
        );
        Ok(parsed)
    }

    async fn sign_and_send_remark(
        &self,
        seed: &str,
        remark: &str,
    ) -> Result<TxOutcome, ChainError> {
        let Some(signer_url) = self.signer_url.clone() else {
            return Err(ChainError::Signer("no signer endpoint configured".to_string()));
        };
        let agent = self.agent.clone();
        let body = json!({ "seed": seed, "remark": remark });
        tokio::task::spawn_blocking(move || match agent.post(&signer_url).send_json(body) {
            Ok(resp) => resp
                .into_json::<SignerResponse>()
                .map(|r| TxOutcome {
                    hash: r.hash,
                    success: r.success,
                })
                .map_err(|e| ChainError::Signer(format!("unreadable signer response: {e}"))),
            Err(ureq::Error::Status(code, _)) => Err(ChainError::Signer(format!(
                "signer failed with http status {code}"
            ))),
            Err(ureq::Error::Transport(err)) => Err(ChainError::Transport(err.to_string())),
        })
        .await
        .map_err(|e| ChainError::Transport(format!("signer request task failed: {e}")))?
    }
}

/// Sidecar renders numbers as decimal strings; plain JSON numbers are accepted too.
fn block_number(value: Option<&Value>) -> Option<BlockNumber> {
    match value? {
        Value::String(s) => s.parse().ok().map(BlockNumber),
        Value::Number(n) => n.as_u64().map(BlockNumber),
        _ => None,
    }
}

fn call_name(call: &Value) -> (&str, &str) {
    let method = call.get("method");
    let pallet = method
        .and_then(|m| m.get("pallet"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let name = method
        .and_then(|m| m.get("method"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    (pallet, name)
}

/// Undecodable signers are kept verbatim and fail address checks downstream.
fn signer(extrinsic: &Value, codec: &Ss58Codec) -> String {
    let signer = extrinsic.get("signature").and_then(|s| s.get("signer"));
    let raw = match signer {
        Some(Value::String(id)) => id.clone(),
        Some(other) => other
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        None => String::new(),
    };
    codec.normalize(&raw).unwrap_or(raw)
}

/// Remark bytes arrive `0x`-hex encoded; anything that does not decode is kept as text.
fn remark_text(raw: &str) -> String {
    raw.strip_prefix("0x")
        .and_then(|h| hex::decode(h).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| raw.to_string())
}

fn arg_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

/// Non-remark calls of a batch, flattened to `{call, value, caller}`. Transfers
/// render their value as `dest,amount`.
fn extra_call(call: &Value, caller: &str) -> ExtraCall {
    let (pallet, method) = call_name(call);
    let args = call.get("args").cloned().unwrap_or(Value::Null);
    let value = match (args.get("dest"), args.get("value")) {
        (Some(dest), Some(amount)) => format!("{},{}", arg_text(dest), arg_text(amount)),
        _ => args.to_string(),
    };
    ExtraCall {
        call: format!("{pallet}.{method}"),
        value,
        caller: caller.to_string(),
    }
}

fn is_remark_call(call: &Value) -> bool {
    let (pallet, method) = call_name(call);
    pallet == "system" && REMARK_CALLS.contains(&method)
}

fn listened(text: &str) -> bool {
    LISTENING_PREFIXES.iter().any(|prefix| text.starts_with(prefix))
}

/// Extracts the block's timestamp and its protocol remarks. Offsets count every
/// remark call in extrinsic order, so filtering never renumbers a position.
pub fn chain_block_from_sidecar(raw: &Value, codec: &Ss58Codec) -> Result<ChainBlock, ChainError> {
    let number = block_number(raw.get("number"))
        .ok_or_else(|| ChainError::Malformed("block is missing its number".to_string()))?;
    let extrinsics = raw
        .get("extrinsics")
        .and_then(Value::as_array)
        .ok_or_else(|| ChainError::Malformed(format!("block {} has no extrinsics", number.0)))?;

    let mut timestamp = None;
    let mut remarks = Vec::new();
    let mut offset = 0u32;
    for extrinsic in extrinsics {
        let (pallet, method) = call_name(extrinsic);
        if pallet == "timestamp" && method == "set" {
            let now = extrinsic.get("args").and_then(|a| a.get("now"));
            timestamp = block_number(now).map(|n| UnixMillis(n.0));
            continue;
        }
        if extrinsic.get("success").and_then(Value::as_bool) == Some(false) {
            continue;
        }
        let caller = signer(extrinsic, codec);
        let calls: Vec<&Value> = if pallet == "utility" && BATCH_CALLS.contains(&method) {
            extrinsic
                .get("args")
                .and_then(|a| a.get("calls"))
                .and_then(Value::as_array)
                .map(|calls| calls.iter().collect())
                .unwrap_or_default()
        } else {
            vec![extrinsic]
        };
        let extra_calls: Vec<ExtraCall> = calls
            .iter()
            .filter(|call| !is_remark_call(call))
            .map(|call| extra_call(call, &caller))
            .collect();
        for call in calls.iter().filter(|call| is_remark_call(call)) {
            let raw_remark = call
                .get("args")
                .and_then(|a| a.get("remark"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let text = remark_text(raw_remark);
            if listened(&text) {
                remarks.push(Remark {
                    block: number,
                    offset,
                    caller: caller.clone(),
                    remark: text,
                    extra_calls: extra_calls.clone(),
                });
            }
            offset += 1;
        }
    }
    Ok(ChainBlock {
        number,
        timestamp,
        remarks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOTER: &str = "CaKpMFfFVXQrRRNDtMxiiPeiYBCYikNzrBmpuZUvmdQKrUR";

    fn hex_remark(text: &str) -> String {
        format!("0x{}", hex::encode(text))
    }

    fn block() -> Value {
        json!({
            "number": "15000001",
            "extrinsics": [
                {
                    "method": {"pallet": "timestamp", "method": "set"},
                    "signature": null,
                    "args": {"now": "1663066800000"},
                    "success": true
                },
                {
                    "method": {"pallet": "system", "method": "remark"},
                    "signature": {"signer": {"id": VOTER}},
                    "args": {"remark": hex_remark("hello")},
                    "success": true
                },
                {
                    "method": {"pallet": "utility", "method": "batchAll"},
                    "signature": {"signer": {"id": VOTER}},
                    "args": {"calls": [
                        {
                            "method": {"pallet": "system", "method": "remark"},
                            "args": {"remark": hex_remark("RMRKDAO::VOTE::2.0.0::ABCDE12345::0")}
                        },
                        {
                            "method": {"pallet": "balances", "method": "transferKeepAlive"},
                            "args": {"dest": {"id": "HeyRMRK7L7APFpBrBqeY62dNhFKVGP4JgwQpcog2VTb3RMU"}, "value": "1000"}
                        }
                    ]},
                    "success": true
                },
                {
                    "method": {"pallet": "system", "method": "remark"},
                    "signature": {"signer": {"id": VOTER}},
                    "args": {"remark": hex_remark("RMRKDAO::VOTE::2.0.0::ABCDE12345::1")},
                    "success": false
                }
            ]
        })
    }

    #[test]
    fn at_sidecar_01_batch_remarks_carry_co_batched_transfers() {
        let parsed = chain_block_from_sidecar(&block(), &Ss58Codec::kusama()).unwrap();
        assert_eq!(parsed.number, BlockNumber(15_000_001));
        assert_eq!(parsed.timestamp, Some(UnixMillis(1_663_066_800_000)));
        assert_eq!(parsed.remarks.len(), 1);
        let remark = &parsed.remarks[0];
        assert_eq!(remark.offset, 1);
        assert_eq!(remark.caller, VOTER);
        assert_eq!(remark.remark, "RMRKDAO::VOTE::2.0.0::ABCDE12345::0");
        assert_eq!(
            remark.extra_calls[0].as_transfer(),
            Some(("HeyRMRK7L7APFpBrBqeY62dNhFKVGP4JgwQpcog2VTb3RMU", "1000"))
        );
    }

    #[test]
    fn at_sidecar_02_block_without_timestamp_still_parses() {
        let parsed =
            chain_block_from_sidecar(&json!({"number": 7, "extrinsics": []}), &Ss58Codec::kusama())
                .unwrap();
        assert_eq!(parsed.timestamp, None);
        assert!(parsed.remarks.is_empty());
    }

    #[test]
    fn at_sidecar_03_missing_extrinsics_is_malformed() {
        assert!(matches!(
            chain_block_from_sidecar(&json!({"number": "7"}), &Ss58Codec::kusama()),
            Err(ChainError::Malformed(_))
        ));
    }

    #[test]
    fn at_sidecar_05_signers_are_re_encoded_in_configured_format() {
        let raw = json!({
            "number": "9",
            "extrinsics": [{
                "method": {"pallet": "system", "method": "remark"},
                "signature": {"signer": {"id": "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY"}},
                "args": {"remark": hex_remark("RMRKDAO::REGISTER::2.0.0::x")},
                "success": true
            }]
        });
        let kusama = chain_block_from_sidecar(&raw, &Ss58Codec::kusama()).unwrap();
        assert_eq!(
            kusama.remarks[0].caller,
            "HNZata7iMYWmk5RvZRTiAsSDhV8366zq2YGb3tLH5Upf74F"
        );
        let generic = chain_block_from_sidecar(&raw, &Ss58Codec::new(42)).unwrap();
        assert_eq!(
            generic.remarks[0].caller,
            "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY"
        );
    }

    #[tokio::test]
    async fn at_sidecar_04_signing_without_endpoint_fails() {
        let client =
            SidecarChainClient::new("http://127.0.0.1:9", None, Duration::from_secs(1), 2);
        assert!(matches!(
            client.sign_and_send_remark("//Alice", "RMRKDAO::SUBMIT::2.0.0::x").await,
            Err(ChainError::Signer(_))
        ));
    }
}
