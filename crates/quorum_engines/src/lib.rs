#![forbid(unsafe_code)]

pub mod inspector;
pub mod interactions;
pub mod point_in_time;
pub mod secret_vault;
pub mod ss58;
pub mod tally;

pub use interactions::{Interaction, InteractionError, Rejection};
pub use secret_vault::{SecretStore, SecretValue, SecretVault, VaultError};
pub use ss58::Ss58Codec;
