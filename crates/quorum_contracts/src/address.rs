#![forbid(unsafe_code)]

/// Converts an account address into the network's canonical display form.
pub trait AddressCodec: Send + Sync {
    /// `None` when `raw` is not a decodable account address.
    fn normalize(&self, raw: &str) -> Option<String>;

    fn same_account(&self, a: &str, b: &str) -> bool {
        match (self.normalize(a), self.normalize(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
