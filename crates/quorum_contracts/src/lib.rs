#![forbid(unsafe_code)]

pub mod address;
pub mod balance;
pub mod change;
pub mod common;
pub mod dao;
pub mod envelope;
pub mod payload;
pub mod remark;

pub use address::AddressCodec;
pub use balance::Balance;
pub use common::{BlockNumber, ContractViolation, ReasonCodeId, UnixMillis, Validate};
