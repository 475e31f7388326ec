#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::BlockNumber;

const TRANSFER_CALLS: [&str; 3] = [
    "balances.transfer",
    "balances.transferKeepAlive",
    "balances.transferAllowDeath",
];

/// A call co-batched with a remark in the same extrinsic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraCall {
    pub call: String,
    pub value: String,
    #[serde(default)]
    pub caller: String,
}

impl ExtraCall {
    pub fn transfer(dest: &str, amount: u128, caller: &str) -> Self {
        Self {
            call: TRANSFER_CALLS[0].to_string(),
            value: format!("{dest},{amount}"),
            caller: caller.to_string(),
        }
    }

    /// `(destination, amount)` when this call moves balance.
    pub fn as_transfer(&self) -> Option<(&str, &str)> {
        if !TRANSFER_CALLS.contains(&self.call.as_str()) {
            return None;
        }
        self.value.split_once(',')
    }
}

/// One remark as delivered by the chain client, positioned by `(block, offset)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remark {
    pub block: BlockNumber,
    pub offset: u32,
    pub caller: String,
    pub remark: String,
    #[serde(default)]
    pub extra_calls: Vec<ExtraCall>,
}

impl Remark {
    pub fn position(&self) -> (BlockNumber, u32) {
        (self.block, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_remark_01_transfer_value_splits_dest_and_amount() {
        let call = ExtraCall::transfer("Dest", 42, "Caller");
        assert_eq!(call.as_transfer(), Some(("Dest", "42")));
    }

    #[test]
    fn at_remark_02_non_transfer_calls_are_ignored() {
        let call = ExtraCall {
            call: "system.remark".to_string(),
            value: "a,b".to_string(),
            caller: String::new(),
        };
        assert_eq!(call.as_transfer(), None);
    }
}
