#![forbid(unsafe_code)]

use blake2::{Blake2b512, Digest};

use quorum_contracts::AddressCodec;

const CHECKSUM_PREFIX: &[u8] = b"SS58PRE";
const CHECKSUM_LEN: usize = 2;
const ACCOUNT_ID_LEN: usize = 32;

/// Kusama network format.
pub const KUSAMA_FORMAT: u16 = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Ss58Error {
    #[error("address is not valid base58")]
    BadBase58,
    #[error("address is not valid hex")]
    BadHex,
    #[error("unexpected address length {0}")]
    BadLength(usize),
    #[error("address format {0} is reserved")]
    ReservedFormat(u16),
    #[error("address checksum mismatch")]
    BadChecksum,
}

/// SS58 account codec that re-encodes every address into one network format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ss58Codec {
    format: u16,
}

impl Ss58Codec {
    pub fn new(format: u16) -> Self {
        Self { format }
    }

    pub fn kusama() -> Self {
        Self::new(KUSAMA_FORMAT)
    }

    pub fn format(&self) -> u16 {
        self.format
    }

    /// Accepts an SS58 address in any format or a `0x` hex account id.
    pub fn decode(raw: &str) -> Result<([u8; ACCOUNT_ID_LEN], Option<u16>), Ss58Error> {
        if let Some(hex_id) = raw.strip_prefix("0x") {
            let bytes = hex::decode(hex_id).map_err(|_| Ss58Error::BadHex)?;
            return Ok((account_id(&bytes)?, None));
        }

        let data = bs58::decode(raw)
            .into_vec()
            .map_err(|_| Ss58Error::BadBase58)?;
        let Some(&first) = data.first() else {
            return Err(Ss58Error::BadLength(0));
        };
        let (prefix_len, format) = match first {
            0..=63 => (1, u16::from(first)),
            64..=127 => {
                let Some(&second) = data.get(1) else {
                    return Err(Ss58Error::BadLength(data.len()));
                };
                let lower = (first << 2) | (second >> 6);
                let upper = second & 0b0011_1111;
                (2, u16::from(lower) | (u16::from(upper) << 8))
            }
            _ => return Err(Ss58Error::ReservedFormat(u16::from(first))),
        };
        if data.len() != prefix_len + ACCOUNT_ID_LEN + CHECKSUM_LEN {
            return Err(Ss58Error::BadLength(data.len()));
        }
        let body_len = prefix_len + ACCOUNT_ID_LEN;
        if checksum(&data[..body_len])[..CHECKSUM_LEN] != data[body_len..] {
            return Err(Ss58Error::BadChecksum);
        }
        Ok((account_id(&data[prefix_len..body_len])?, Some(format)))
    }

    pub fn encode(&self, account: &[u8; ACCOUNT_ID_LEN]) -> String {
        let ident = self.format & 0b0011_1111_1111_1111;
        let mut data = match ident {
            0..=63 => vec![ident as u8],
            _ => {
                let first = (((ident & 0b0000_0000_1111_1100) as u8) >> 2) | 0b0100_0000;
                let second = ((ident >> 8) as u8) | (((ident & 0b0000_0000_0000_0011) as u8) << 6);
                vec![first, second]
            }
        };
        data.extend_from_slice(account);
        let sum = checksum(&data);
        data.extend_from_slice(&sum[..CHECKSUM_LEN]);
        bs58::encode(data).into_string()
    }
}

impl AddressCodec for Ss58Codec {
    fn normalize(&self, raw: &str) -> Option<String> {
        Self::decode(raw.trim())
            .ok()
            .map(|(account, _)| self.encode(&account))
    }
}

fn account_id(bytes: &[u8]) -> Result<[u8; ACCOUNT_ID_LEN], Ss58Error> {
    <[u8; ACCOUNT_ID_LEN]>::try_from(bytes).map_err(|_| Ss58Error::BadLength(bytes.len()))
}

fn checksum(body: &[u8]) -> Vec<u8> {
    let mut hasher = Blake2b512::new();
    hasher.update(CHECKSUM_PREFIX);
    hasher.update(body);
    hasher.finalize().to_vec()
}
