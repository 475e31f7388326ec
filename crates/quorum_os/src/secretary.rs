#![forbid(unsafe_code)]

use std::sync::Arc;

use tracing::{info, warn};

use quorum_contracts::payload::SubmitPayload;
use quorum_engines::{SecretStore, VaultError};

use crate::chain::{ChainClient, ChainError, TxOutcome};

#[derive(Debug, thiserror::Error)]
pub enum SecretaryError {
    #[error("custodian seed {0} is not in the secret store")]
    MissingSeed(String),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error("unable to encode RESULT: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Submits attested results on chain as the custodian.
pub struct SecretaryOfState {
    chain: Arc<dyn ChainClient>,
    secrets: Arc<dyn SecretStore>,
    seed_id: String,
    custodian: String,
}

impl SecretaryOfState {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        secrets: Arc<dyn SecretStore>,
        seed_id: impl Into<String>,
        custodian: impl Into<String>,
    ) -> Self {
        Self {
            chain,
            secrets,
            seed_id: seed_id.into(),
            custodian: custodian.into(),
        }
    }

    pub fn custodian(&self) -> &str {
        &self.custodian
    }

    /// Fails early when the seed cannot be resolved.
    pub fn ensure_ready(&self) -> Result<(), SecretaryError> {
        self.seed().map(|_| ())
    }

    fn seed(&self) -> Result<String, SecretaryError> {
        self.secrets
            .resolve_seed(&self.seed_id)?
            .ok_or_else(|| SecretaryError::MissingSeed(self.seed_id.clone()))
    }

    /// Signs and broadcasts `RMRKDAO::SUBMIT::2.0.0::<result>`. A finalized but
    /// failed extrinsic is returned as an unsuccessful outcome, not an error.
    pub async fn submit_result(&self, result: &SubmitPayload) -> Result<TxOutcome, SecretaryError> {
        let remark = result.to_remark()?;
        let seed = self.seed()?;
        let outcome = self.chain.sign_and_send_remark(&seed, &remark).await?;
        if outcome.success {
            info!(
                proposal = %result.proposal_id,
                hash = %outcome.hash,
                "SUBMIT extrinsic finalized on chain"
            );
        } else {
            warn!(
                proposal = %result.proposal_id,
                hash = %outcome.hash,
                "Transaction extrinsic failed"
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::chain::ChainBlock;
    use quorum_contracts::envelope::{InteractionKind, RemarkEnvelope};
    use quorum_contracts::BlockNumber;
    use quorum_engines::SecretValue;

    #[derive(Default)]
    struct RecordingChain {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChainClient for RecordingChain {
        async fn finalized_head(&self) -> Result<BlockNumber, ChainError> {
            Ok(BlockNumber(1))
        }

        async fn fetch_block(&self, block: BlockNumber) -> Result<ChainBlock, ChainError> {
            Err(ChainError::BlockNotFound(block))
        }

        async fn sign_and_send_remark(
            &self,
            seed: &str,
            remark: &str,
        ) -> Result<TxOutcome, ChainError> {
            self.sent
                .lock()
                .unwrap()
                .push((seed.to_string(), remark.to_string()));
            Ok(TxOutcome {
                hash: "0xabc".to_string(),
                success: true,
            })
        }
    }

    struct OneSecret(SecretValue);

    impl SecretStore for OneSecret {
        fn resolve(&self, secret_id: &str) -> Result<Option<SecretValue>, VaultError> {
            Ok((secret_id == "custodian_seed").then(|| self.0.clone()))
        }
    }

    fn result() -> SubmitPayload {
        SubmitPayload {
            proposal_id: "ABCDE12345".to_string(),
            count: BTreeMap::from([(0, 2), (1, 1)]),
            winning_options: vec![0],
            threshold_denominator: 3,
            recertify: false,
        }
    }

    #[tokio::test]
    async fn at_secretary_01_binary_seed_is_sent_base64() {
        let chain = Arc::new(RecordingChain::default());
        let secretary = SecretaryOfState::new(
            chain.clone(),
            Arc::new(OneSecret(SecretValue::Binary(vec![1, 2, 3]))),
            "custodian_seed",
            "Custodian",
        );
        let outcome = secretary.submit_result(&result()).await.unwrap();
        assert!(outcome.success);
        let sent = chain.sent.lock().unwrap();
        assert_eq!(sent[0].0, "AQID");
        let envelope = RemarkEnvelope::expect(&sent[0].1, &InteractionKind::Submit).unwrap();
        let decoded: serde_json::Value = envelope.json_payload().unwrap();
        assert_eq!(decoded["proposalId"], "ABCDE12345");
    }

    #[test]
    fn at_secretary_02_unknown_seed_fails_early() {
        let secretary = SecretaryOfState::new(
            Arc::new(RecordingChain::default()),
            Arc::new(OneSecret(SecretValue::Text("//Alice".to_string()))),
            "other_seed",
            "Custodian",
        );
        assert!(matches!(
            secretary.ensure_ready(),
            Err(SecretaryError::MissingSeed(id)) if id == "other_seed"
        ));
    }
}
