#![forbid(unsafe_code)]

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use quorum_contracts::envelope::InteractionKind;
use quorum_contracts::BlockNumber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionOutcome {
    Succeeded,
    Failed,
}

impl InteractionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("metrics text is not utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Process-local registry for the consolidator and monitor.
#[derive(Clone)]
pub struct DaoMetrics {
    registry: Registry,
    interaction_outcome: IntCounterVec,
    latest_consolidated_block: IntGauge,
    target_block: IntGauge,
}

impl DaoMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let interaction_outcome = IntCounterVec::new(
            Opts::new(
                "rmrkdao_interaction_outcome_total",
                "RMRKDAO interaction outcome (succeeded or failed by type)",
            ),
            &["interaction", "outcome"],
        )?;
        let latest_consolidated_block = IntGauge::new(
            "latest_consolidated_block",
            "Last Kusama block consolidated",
        )?;
        let target_block = IntGauge::new("target_block", "The current target block")?;
        registry.register(Box::new(interaction_outcome.clone()))?;
        registry.register(Box::new(latest_consolidated_block.clone()))?;
        registry.register(Box::new(target_block.clone()))?;
        Ok(Self {
            registry,
            interaction_outcome,
            latest_consolidated_block,
            target_block,
        })
    }

    pub fn record_outcome(&self, kind: &InteractionKind, outcome: InteractionOutcome) {
        self.interaction_outcome
            .with_label_values(&[kind.as_str(), outcome.as_str()])
            .inc();
    }

    pub fn outcome_count(&self, kind: &InteractionKind, outcome: InteractionOutcome) -> u64 {
        self.interaction_outcome
            .with_label_values(&[kind.as_str(), outcome.as_str()])
            .get()
    }

    pub fn set_latest_consolidated(&self, block: BlockNumber) {
        self.latest_consolidated_block.set(gauge_value(block));
    }

    pub fn latest_consolidated(&self) -> i64 {
        self.latest_consolidated_block.get()
    }

    pub fn set_target(&self, block: BlockNumber) {
        self.target_block.set(gauge_value(block));
    }

    pub fn target(&self) -> i64 {
        self.target_block.get()
    }

    /// Prometheus text exposition of every registered family.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn gauge_value(block: BlockNumber) -> i64 {
    i64::try_from(block.0).unwrap_or(i64::MAX)
}
