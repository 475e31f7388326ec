#![forbid(unsafe_code)]

use quorum_contracts::remark::ExtraCall;
use quorum_contracts::{AddressCodec, Balance};

/// True when one co-batched transfer pays at least `fee` to `custodian`.
///
/// The destination is normalized before comparing; amounts that do not parse as a
/// balance never count.
pub fn has_fee_transfer(
    calls: &[ExtraCall],
    custodian: &str,
    fee: Balance,
    codec: &dyn AddressCodec,
) -> bool {
    calls.iter().filter_map(ExtraCall::as_transfer).any(|(dest, amount)| {
        let Some(dest) = codec.normalize(dest.trim()) else {
            return false;
        };
        let Ok(amount) = Balance::parse_decimal("amount", amount) else {
            return false;
        };
        dest == custodian && amount >= fee
    })
}
