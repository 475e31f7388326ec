#![forbid(unsafe_code)]

pub mod replay;
pub mod vault_cli;
