//! Protection domain - private submission, fee bidding and inclusion tracking

mod bundle;
mod fee_bidding;
mod mempool;
mod optimizer;

pub use bundle::{BlockRange, Bundle, BundleState};
pub use fee_bidding::{BiddingStrategy, FeeBidPolicy, NetworkConditions};
pub use mempool::{MempoolObserver, MempoolRisk, MempoolRiskPolicy, MempoolSignal, RiskDecision};
pub use optimizer::{BundleSummary, ProtectionConfig, ProtectionOptimizer};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::shared::errors::AdapterError;

/// Dry-run result of a bundle against current chain state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimResult {
    pub success: bool,
    pub revert_reason: Option<String>,
    /// Output of each swap, in plan order
    pub swap_outputs: Vec<f64>,
    /// Execution cost per operation in plan order, accounting-token units.
    /// Empty when the channel cannot attribute costs.
    pub operation_costs: Vec<f64>,
}

impl SimResult {
    pub fn reverted(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            revert_reason: Some(reason.into()),
            swap_outputs: Vec::new(),
            operation_costs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionHandle {
    pub bundle_id: String,
    /// Identifier assigned by the channel
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleStatus {
    Included { block: u64 },
    Pending,
    Expired,
    /// Rejected by the relay / builder after acceptance
    Dropped,
}

/// Private order-flow channel (relay / builder endpoint)
#[async_trait]
pub trait SubmissionChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Bundles must never reach the public mempool
    fn is_private(&self) -> bool;

    async fn current_block(&self) -> Result<u64, AdapterError>;

    async fn network_conditions(&self) -> Result<NetworkConditions, AdapterError>;

    async fn simulate(&self, bundle: &Bundle) -> Result<SimResult, AdapterError>;

    async fn submit(&self, bundle: &Bundle, target: BlockRange) -> Result<SubmissionHandle, AdapterError>;

    async fn status(&self, handle: &SubmissionHandle) -> Result<BundleStatus, AdapterError>;
}
